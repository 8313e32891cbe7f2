//! 可分离高斯平滑.

use ndarray::{Array3, ArrayView3};

use super::{clamped, try_for_each_slice_mut};
use crate::error::Cancelled;
use crate::progress::{Progress, Ticker};

/// 归一化一维高斯核, 半径为 `ceil(3σ)` (至少为 1). `sigma_px` 以体素为单位.
pub fn gaussian_kernel(sigma_px: f64) -> Vec<f64> {
    let r = (3.0 * sigma_px).ceil().max(1.0) as isize;
    let two_s2 = 2.0 * sigma_px * sigma_px;
    let mut k: Vec<f64> = (-r..=r).map(|i| (-((i * i) as f64) / two_s2).exp()).collect();
    let sum: f64 = k.iter().sum();
    k.iter_mut().for_each(|v| *v /= sum);
    k
}

/// 沿 `axis` 与 `kernel` 卷积, 边界复制.
fn convolve_axis(
    input: ArrayView3<f64>,
    axis: usize,
    kernel: &[f64],
    ticker: &Ticker,
) -> Result<Array3<f64>, Cancelled> {
    let shape = input.dim();
    let (_, ny, nx) = shape;
    let n = [shape.0, shape.1, shape.2][axis];
    let r = (kernel.len() / 2) as isize;
    let mut out = Array3::zeros(shape);
    try_for_each_slice_mut(&mut out, |z, mut slice| {
        for y in 0..ny {
            for x in 0..nx {
                let mut idx = [z, y, x];
                let c = idx[axis];
                let mut acc = 0.0;
                for (k, w) in kernel.iter().enumerate() {
                    idx[axis] = clamped(c, k as isize - r, n);
                    acc += w * input[(idx[0], idx[1], idx[2])];
                }
                slice[(y, x)] = acc;
            }
            ticker.tick(nx)?;
        }
        Ok(())
    })?;
    Ok(out)
}

/// 需要平滑的方向及其体素单位标准差.
fn smoothing_axes(element_size_um: [f64; 3], sigma_um: f64) -> Vec<(usize, f64)> {
    element_size_um
        .iter()
        .enumerate()
        .map(|(a, e)| (a, sigma_um / e))
        .filter(|(_, s)| *s >= 0.01)
        .collect()
}

/// 一次三维平滑需要的一维卷积次数.
pub(crate) fn smoothing_passes(element_size_um: [f64; 3], sigma_um: f64) -> usize {
    smoothing_axes(element_size_um, sigma_um).len()
}

/// 与 [`gaussian_smooth`] 相同, 但向外部提供的计数器汇报进度.
pub(crate) fn gaussian_smooth_ticked(
    input: ArrayView3<f64>,
    element_size_um: [f64; 3],
    sigma_um: f64,
    ticker: &Ticker,
) -> Result<Array3<f64>, Cancelled> {
    // 逆序 (x, y, z) 处理, 使第一次卷积沿连续内存进行.
    let mut cur: Option<Array3<f64>> = None;
    for &(axis, sigma) in smoothing_axes(element_size_um, sigma_um).iter().rev() {
        let kernel = gaussian_kernel(sigma);
        let src = cur.as_ref().map_or(input.view(), |a| a.view());
        cur = Some(convolve_axis(src, axis, &kernel, ticker)?);
    }
    Ok(cur.unwrap_or_else(|| input.to_owned()))
}

/// 三维高斯平滑.
///
/// `sigma_um` 为物理标准差 (µm), 在每个方向上按体素尺寸换算为体素单位.
/// 换算后小于 0.01 体素的方向不做平滑. 边界按复制处理.
pub fn gaussian_smooth(
    input: ArrayView3<f64>,
    element_size_um: [f64; 3],
    sigma_um: f64,
    progress: Progress,
) -> Result<Array3<f64>, Cancelled> {
    let passes = smoothing_passes(element_size_um, sigma_um);
    let ticker = Ticker::new(progress, input.len() * passes);
    gaussian_smooth_ticked(input, element_size_um, sigma_um, &ticker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressState;
    use crate::progress::ProgressReporter;

    #[test]
    fn test_kernel_is_normalized() {
        let k = gaussian_kernel(1.5);
        assert_eq!(k.len(), 11);
        assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(k[0], k[10]);
        assert!(k[5] > k[4]);
    }

    #[test]
    fn test_constant_is_preserved_and_mass_spreads() {
        let ones = Array3::<f64>::ones((5, 6, 7));
        let s = gaussian_smooth(ones.view(), [1.0; 3], 1.0, None).unwrap();
        assert!(s.iter().all(|v| (v - 1.0).abs() < 1e-12));

        let mut delta = Array3::<f64>::zeros((9, 9, 9));
        delta[(4, 4, 4)] = 1.0;
        let s = gaussian_smooth(delta.view(), [1.0, 1.0, 1.0], 1.0, None).unwrap();
        assert!((s.sum() - 1.0).abs() < 1e-9);
        assert!(s[(4, 4, 4)] < 1.0);
        assert!((s[(4, 4, 3)] - s[(4, 3, 4)]).abs() < 1e-12);
    }

    #[test]
    fn test_anisotropic_sigma_skips_coarse_axis() {
        let mut delta = Array3::<f64>::zeros((5, 5, 5));
        delta[(2, 2, 2)] = 1.0;
        // z 方向体素尺寸极大, 换算后 σ 过小, 不做平滑.
        let s = gaussian_smooth(delta.view(), [1000.0, 1.0, 1.0], 1.0, None).unwrap();
        assert_eq!(s[(1, 2, 2)], 0.0);
        assert!(s[(2, 2, 1)] > 0.0);
    }

    #[test]
    fn test_cancel() {
        let state = ProgressState::new();
        state.abort();
        let a = Array3::<f64>::zeros((4, 4, 4));
        assert_eq!(
            gaussian_smooth(a.view(), [1.0; 3], 1.0, Some(&state)),
            Err(Cancelled)
        );
    }
}
