//! 立方邻域中值滤波.

use ndarray::{Array3, ArrayView3};

use super::try_for_each_slice_mut;
use crate::error::Cancelled;
use crate::progress::{Progress, Ticker};

/// 以 `(2w + 1)^3` 立方体为窗口的中值滤波, `w = half_width` (体素).
///
/// 窗口在边界处被裁剪, 只统计体数据内部的体素; 偶数个样本时取下中位数.
/// `half_width == 0` 时直接复制输入.
pub fn median_filter(
    input: ArrayView3<f64>,
    half_width: usize,
    progress: Progress,
) -> Result<Array3<f64>, Cancelled> {
    if half_width == 0 {
        return Ok(input.to_owned());
    }
    let (nz, ny, nx) = input.dim();
    let w = half_width;
    let ticker = Ticker::new(progress, input.len());
    let mut out = Array3::zeros(input.dim());
    try_for_each_slice_mut(&mut out, |z, mut slice| {
        let side = 2 * w + 1;
        let mut buf = Vec::with_capacity(side * side * side);
        let (z0, z1) = (z.saturating_sub(w), (z + w + 1).min(nz));
        for y in 0..ny {
            let (y0, y1) = (y.saturating_sub(w), (y + w + 1).min(ny));
            for x in 0..nx {
                let (x0, x1) = (x.saturating_sub(w), (x + w + 1).min(nx));
                buf.clear();
                for zz in z0..z1 {
                    for yy in y0..y1 {
                        for xx in x0..x1 {
                            buf.push(input[(zz, yy, xx)]);
                        }
                    }
                }
                let mid = (buf.len() - 1) / 2;
                let (_, m, _) = buf.select_nth_unstable_by(mid, f64::total_cmp);
                slice[(y, x)] = *m;
            }
            ticker.tick(nx)?;
        }
        Ok(())
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_salt_noise() {
        let mut a = Array3::<f64>::zeros((5, 5, 5));
        a[(2, 2, 2)] = 100.0;
        let m = median_filter(a.view(), 1, None).unwrap();
        assert!(m.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_preserves_step_edge() {
        let a = Array3::from_shape_fn((3, 3, 6), |(_, _, x)| if x < 3 { 0.0 } else { 1.0 });
        let m = median_filter(a.view(), 1, None).unwrap();
        assert_eq!(m, a);
    }

    #[test]
    fn test_zero_width_is_identity() {
        let a = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 12 + y * 4 + x) as f64);
        assert_eq!(median_filter(a.view(), 0, None).unwrap(), a);
    }
}
