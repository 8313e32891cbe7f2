//! 体数据重采样.

use ndarray::{Array3, ArrayView3};

use super::try_for_each_slice_mut;
use crate::error::Cancelled;
use crate::progress::{Progress, Ticker};
use crate::Idx3d;

/// 把形状为 `shape`, 体素尺寸为 `from_um` 的数据重采样到体素尺寸 `to_um` 后的形状.
/// 每个方向至少 1 个体素.
pub fn rescaled_shape(shape: Idx3d, from_um: [f64; 3], to_um: [f64; 3]) -> Idx3d {
    let n = |len: usize, i: usize| ((len as f64 * from_um[i] / to_um[i]).round() as usize).max(1);
    (n(shape.0, 0), n(shape.1, 1), n(shape.2, 2))
}

/// 一维线性插值的两个采样位置和权重.
#[inline]
fn lerp_taps(pos: f64, n: usize) -> (usize, usize, f64) {
    let p = pos.clamp(0.0, (n - 1) as f64);
    let i0 = p.floor() as usize;
    let i1 = (i0 + 1).min(n - 1);
    (i0, i1, p - i0 as f64)
}

/// 三线性重采样.
///
/// 输出体素 `j` 位于物理位置 `j * to_um`, 取值为输入数据在该位置的三线性插值,
/// 超出输入范围的位置钳制到边界.
pub fn rescale_linear(
    input: ArrayView3<f64>,
    from_um: [f64; 3],
    to_um: [f64; 3],
    progress: Progress,
) -> Result<Array3<f64>, Cancelled> {
    let (nz, ny, nx) = input.dim();
    let shape = rescaled_shape(input.dim(), from_um, to_um);
    if shape == input.dim() && from_um == to_um {
        return Ok(input.to_owned());
    }
    let ticker = Ticker::new(progress, shape.0 * shape.1 * shape.2);
    let mut out = Array3::zeros(shape);
    try_for_each_slice_mut(&mut out, |z, mut slice| {
        let (z0, z1, fz) = lerp_taps(z as f64 * to_um[0] / from_um[0], nz);
        for y in 0..shape.1 {
            let (y0, y1, fy) = lerp_taps(y as f64 * to_um[1] / from_um[1], ny);
            for x in 0..shape.2 {
                let (x0, x1, fx) = lerp_taps(x as f64 * to_um[2] / from_um[2], nx);
                let plane = |zz: usize| {
                    let a = input[(zz, y0, x0)] * (1.0 - fx) + input[(zz, y0, x1)] * fx;
                    let b = input[(zz, y1, x0)] * (1.0 - fx) + input[(zz, y1, x1)] * fx;
                    a * (1.0 - fy) + b * fy
                };
                slice[(y, x)] = plane(z0) * (1.0 - fz) + plane(z1) * fz;
            }
            ticker.tick(shape.2)?;
        }
        Ok(())
    })?;
    Ok(out)
}

/// 最近邻重采样标签数据到形状 `shape` (体素尺寸 `to_um`).
pub fn rescale_nearest(
    input: ArrayView3<i32>,
    from_um: [f64; 3],
    shape: Idx3d,
    to_um: [f64; 3],
    progress: Progress,
) -> Result<Array3<i32>, Cancelled> {
    if shape == input.dim() && from_um == to_um {
        return Ok(input.to_owned());
    }
    let (nz, ny, nx) = input.dim();
    let near = |j: usize, i: usize, n: usize| {
        ((j as f64 * to_um[i] / from_um[i]).round().max(0.0) as usize).min(n - 1)
    };
    let ticker = Ticker::new(progress, shape.0 * shape.1 * shape.2);
    let mut out = Array3::zeros(shape);
    try_for_each_slice_mut(&mut out, |z, mut slice| {
        let zz = near(z, 0, nz);
        for y in 0..shape.1 {
            let yy = near(y, 1, ny);
            for x in 0..shape.2 {
                slice[(y, x)] = input[(zz, yy, near(x, 2, nx))];
            }
            ticker.tick(shape.2)?;
        }
        Ok(())
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape() {
        assert_eq!(rescaled_shape((10, 20, 20), [2.0, 0.5, 0.5], [1.0; 3]), (20, 10, 10));
        assert_eq!(rescaled_shape((1, 1, 1), [1.0; 3], [5.0; 3]), (1, 1, 1));
    }

    #[test]
    fn test_linear_ramp_is_exact() {
        // f = z (µm), 体素尺寸 2 µm -> 1 µm.
        let a = Array3::from_shape_fn((5, 2, 2), |(z, _, _)| 2.0 * z as f64);
        let r = rescale_linear(a.view(), [2.0, 1.0, 1.0], [1.0; 3], None).unwrap();
        assert_eq!(r.dim(), (10, 2, 2));
        for z in 0..9 {
            assert!((r[(z, 1, 0)] - z as f64).abs() < 1e-12);
        }
        // 超出范围部分钳制.
        assert_eq!(r[(9, 0, 0)], 8.0);
    }

    #[test]
    fn test_nearest_round_trip() {
        let a = Array3::from_shape_fn((4, 4, 4), |(z, y, x)| (z + y + x) as i32);
        let up = rescale_nearest(a.view(), [1.0; 3], (8, 8, 8), [0.5; 3], None).unwrap();
        let down = rescale_nearest(up.view(), [0.5; 3], (4, 4, 4), [1.0; 3], None).unwrap();
        assert_eq!(down, a);
    }
}
