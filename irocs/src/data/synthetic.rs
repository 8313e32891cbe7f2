//! 合成测试体数据 (phantom).

use std::ops::Range;

use ndarray::Array3;

use super::{IntensityVolume, Segmentation};
use crate::error::ConfigError;
use crate::nucleus::Nucleus;
use crate::{Idx3d, Vec3};

/// 实心球. 体素尺寸为 1 µm, `center` 和 `radius` 以体素为单位.
pub fn solid_sphere(
    shape: Idx3d,
    center: [f64; 3],
    radius: f64,
    label: i32,
    background: i32,
) -> Segmentation {
    let r2 = radius * radius;
    let data = Array3::from_shape_fn(shape, |(z, y, x)| {
        let d2 = (z as f64 - center[0]).powi(2)
            + (y as f64 - center[1]).powi(2)
            + (x as f64 - center[2]).powi(2);
        if d2 <= r2 {
            label
        } else {
            background
        }
    });
    Segmentation::from_unit_grid(data)
}

/// 沿 z 轴方向的实心圆柱. `axis_yx` 和 `radius` 以体素为单位,
/// 圆柱覆盖 `z_range` 中的所有切片.
pub fn cylinder(
    shape: Idx3d,
    axis_yx: (f64, f64),
    radius: f64,
    z_range: Range<usize>,
    label: i32,
    background: i32,
    element_size_um: [f64; 3],
) -> Result<Segmentation, ConfigError> {
    let r2 = radius * radius;
    let data = Array3::from_shape_fn(shape, |(z, y, x)| {
        let d2 = (y as f64 - axis_yx.0).powi(2) + (x as f64 - axis_yx.1).powi(2);
        if z_range.contains(&z) && d2 <= r2 {
            label
        } else {
            background
        }
    });
    Segmentation::new(data, element_size_um)
}

/// 绕 z 轴 (过原点) 的螺旋排列细胞核.
///
/// 第 `i` 个细胞核位于 `z = z0_um + i * dz_um`, 角度 `θ = i * dtheta`,
/// 即 `(z, r sinθ, r cosθ)`.
pub fn helix_nuclei(
    n: usize,
    radius_um: f64,
    z0_um: f64,
    dz_um: f64,
    dtheta: f64,
    label: i32,
) -> Vec<Nucleus> {
    (0..n)
        .map(|i| {
            let theta = i as f64 * dtheta;
            Nucleus::new(
                Vec3::new(
                    z0_um + i as f64 * dz_um,
                    radius_um * theta.sin(),
                    radius_um * theta.cos(),
                ),
                label,
            )
        })
        .collect()
}

/// 细胞膜网格: 每隔 `cell` 个体素有一层亮的膜平面, 其余为暗的胞质.
///
/// 膜强度为 1, 胞质强度为 0.1.
pub fn membrane_lattice(
    shape: Idx3d,
    cell: usize,
    element_size_um: [f64; 3],
) -> Result<IntensityVolume, ConfigError> {
    let cell = cell.max(2);
    let data = Array3::from_shape_fn(shape, |(z, y, x)| {
        if z % cell == 0 || y % cell == 0 || x % cell == 0 {
            1.0
        } else {
            0.1
        }
    });
    IntensityVolume::new(data, element_size_um)
}

impl Segmentation {
    /// 体素尺寸为 1 µm 的体数据.
    fn from_unit_grid(data: Array3<i32>) -> Self {
        Self {
            transformation: super::scaling([1.0; 3]),
            data,
            element_size_um: [1.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VolumeAttr;

    #[test]
    fn test_phantoms() {
        let s = solid_sphere((11, 11, 11), [5.0; 3], 3.0, 2, 1);
        assert_eq!(s[(5, 5, 5)], 2);
        assert_eq!(s[(0, 0, 0)], 1);
        assert_eq!(s.count(2), 123);

        let c = cylinder((10, 9, 9), (4.0, 4.0), 2.0, 2..8, 3, 0, [2.0, 1.0, 1.0]).unwrap();
        assert_eq!(c[(1, 4, 4)], 0);
        assert_eq!(c[(2, 4, 4)], 3);
        assert_eq!(c[(7, 4, 6)], 3);
        assert_eq!(c[(8, 4, 4)], 0);
        assert_eq!(c.extent_um(), [20.0, 9.0, 9.0]);

        let h = helix_nuclei(4, 10.0, 5.0, 2.0, std::f64::consts::FRAC_PI_2, 2);
        assert!((h[1].position_um() - Vec3::new(7.0, 10.0, 0.0)).norm() < 1e-9);
    }
}
