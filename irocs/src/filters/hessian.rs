//! Hessian 矩阵与其特征分解.

use nalgebra::Matrix3;
use ndarray::{Array3, Array4, ArrayView3};

use super::{clamped, try_for_each_slice_mut};
use crate::error::Cancelled;
use crate::progress::{Progress, Ticker};

/// 逐体素的最小 Hessian 特征值及其特征向量.
#[derive(Clone, Debug)]
pub struct HessianEigen {
    /// 最小 (最负) 特征值 `l1`.
    pub l1: Array3<f64>,

    /// `l1` 对应的单位特征向量 `v1`, 形状为 `(z, y, x, 3)`, 分量顺序为 `(z, y, x)`.
    pub v1: Array4<f64>,
}

/// 中心差分 Hessian 矩阵, 单位为 `1/µm²`. 边界复制.
#[inline]
fn hessian_at(data: &ArrayView3<f64>, (z, y, x): (usize, usize, usize), h: [f64; 3]) -> Matrix3<f64> {
    let (nz, ny, nx) = data.dim();
    let f = |dz: isize, dy: isize, dx: isize| {
        data[(clamped(z, dz, nz), clamped(y, dy, ny), clamped(x, dx, nx))]
    };
    let c = f(0, 0, 0);
    let dzz = (f(1, 0, 0) - 2.0 * c + f(-1, 0, 0)) / (h[0] * h[0]);
    let dyy = (f(0, 1, 0) - 2.0 * c + f(0, -1, 0)) / (h[1] * h[1]);
    let dxx = (f(0, 0, 1) - 2.0 * c + f(0, 0, -1)) / (h[2] * h[2]);
    let dzy = (f(1, 1, 0) - f(1, -1, 0) - f(-1, 1, 0) + f(-1, -1, 0)) / (4.0 * h[0] * h[1]);
    let dzx = (f(1, 0, 1) - f(1, 0, -1) - f(-1, 0, 1) + f(-1, 0, -1)) / (4.0 * h[0] * h[2]);
    let dyx = (f(0, 1, 1) - f(0, 1, -1) - f(0, -1, 1) + f(0, -1, -1)) / (4.0 * h[1] * h[2]);
    Matrix3::new(dzz, dzy, dzx, dzy, dyy, dyx, dzx, dyx, dxx)
}

/// 计算每个体素 Hessian 矩阵的最小特征值和对应特征向量.
///
/// 输入应当已经过高斯平滑. 特征向量的符号不确定.
pub fn hessian_eigen(
    data: ArrayView3<f64>,
    element_size_um: [f64; 3],
    progress: Progress,
) -> Result<HessianEigen, Cancelled> {
    let (nz, ny, nx) = data.dim();
    let ticker = Ticker::new(progress, data.len());
    let mut packed = Array3::from_elem(data.dim(), (0.0, [0.0; 3]));
    try_for_each_slice_mut(&mut packed, |z, mut slice| {
        for y in 0..ny {
            for x in 0..nx {
                let eig = hessian_at(&data, (z, y, x), element_size_um).symmetric_eigen();
                let i = eig.eigenvalues.imin();
                let v = eig.eigenvectors.column(i);
                let n = v.norm();
                let v = if n > 0.0 { v / n } else { v.into_owned() };
                slice[(y, x)] = (eig.eigenvalues[i], [v[0], v[1], v[2]]);
            }
            ticker.tick(nx)?;
        }
        Ok(())
    })?;

    let l1 = packed.mapv(|(l, _)| l);
    let v1 = Array4::from_shape_fn((nz, ny, nx, 3), |(z, y, x, c)| packed[(z, y, x)].1[c]);
    Ok(HessianEigen { l1, v1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_form() {
        // f = -3 z^2 + y^2 + 2 x^2 -> H = diag(-6, 2, 4).
        let a = Array3::from_shape_fn((7, 7, 7), |(z, y, x)| {
            let (z, y, x) = (z as f64 - 3.0, y as f64 - 3.0, x as f64 - 3.0);
            -3.0 * z * z + y * y + 2.0 * x * x
        });
        let he = hessian_eigen(a.view(), [1.0; 3], None).unwrap();
        assert!((he.l1[(3, 3, 3)] + 6.0).abs() < 1e-9);
        assert!((he.v1[(3, 3, 3, 0)].abs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_spacing_scales_curvature() {
        // 沿 x 的二次函数, x 方向体素尺寸 2 µm: f = -(2 i)^2 = -x_um^2, 二阶导为 -2.
        let a = Array3::from_shape_fn((3, 3, 9), |(_, _, x)| {
            let u = 2.0 * (x as f64 - 4.0);
            -u * u
        });
        let he = hessian_eigen(a.view(), [1.0, 1.0, 2.0], None).unwrap();
        assert!((he.l1[(1, 1, 4)] + 2.0).abs() < 1e-9);
        assert!((he.v1[(1, 1, 4, 2)].abs() - 1.0).abs() < 1e-9);
    }
}
