//! 基于细胞核的根坐标系 (iRoCS).
//!
//! 与 [`ShellCoordinateTransform`](crate::sct::ShellCoordinateTransform) 使用同一根轴模型,
//! 但拟合数据是稀疏的表皮细胞核位置, 能量权重和迭代参数由调用方直接给出.

use crate::axis::{self, AxisCoordinates, AxisModel, DescentParams, EnergyWeights};
use crate::consts::MIN_EPIDERMIS_MARKERS;
use crate::error::{ConfigError, FitError};
use crate::progress::Progress;
use crate::Vec3;

/// iRoCS 拟合参数.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IrocsParams {
    /// 能量权重 `(κ, λ, μ)`.
    pub weights: EnergyWeights,

    /// 搜索半径 (µm). 到根轴距离大于该值的细胞核不参与数据项; 同时作为控制点间距.
    pub search_radius_um: f64,

    /// 最大迭代次数. 负数非法.
    pub n_iterations: i32,

    /// 梯度下降初始步长.
    pub tau: f64,
}

impl Default for IrocsParams {
    fn default() -> Self {
        Self {
            weights: EnergyWeights {
                kappa: 1.0,
                lambda: 0.5,
                mu: 0.5,
            },
            search_radius_um: 30.0,
            n_iterations: 1000,
            tau: 0.1,
        }
    }
}

impl IrocsParams {
    /// 检查参数合法性. 合法时返回迭代次数.
    pub fn check(&self) -> Result<usize, ConfigError> {
        let n = axis::check_optimization(&self.weights, self.tau, self.n_iterations)?;
        if !(self.search_radius_um.is_finite() && self.search_radius_um > 0.0) {
            return Err(ConfigError::NonPositive(
                "search_radius_um",
                self.search_radius_um,
            ));
        }
        Ok(n)
    }
}

/// 基于细胞核的根坐标系模型.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Irocs {
    axis: Option<AxisModel>,
}

impl Irocs {
    /// 未拟合的空模型.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已经拟合?
    #[inline]
    pub fn is_fitted(&self) -> bool {
        self.axis.is_some()
    }

    /// 底层根轴.
    #[inline]
    pub fn axis(&self) -> Option<&AxisModel> {
        self.axis.as_ref()
    }

    /// 以 `qc` 为起点, 对 `points` (表皮细胞核位置) 拟合根轴.
    ///
    /// 参数先于任何数据被检查. 点数少于 [`MIN_EPIDERMIS_MARKERS`] 时返回
    /// [`FitError::TooFewPoints`]; QC 位于 (按搜索半径扩展后的) 点云包围盒之外时返回
    /// [`FitError::QcOutsidePointCloud`]. 失败或取消时模型保持原状.
    pub fn fit(
        &mut self,
        points: &[Vec3],
        qc: Vec3,
        params: &IrocsParams,
        progress: Progress,
    ) -> Result<(), FitError> {
        let n_iterations = params.check()?;
        if points.len() < MIN_EPIDERMIS_MARKERS {
            return Err(FitError::TooFewPoints(points.len(), MIN_EPIDERMIS_MARKERS));
        }
        let pad = params.search_radius_um;
        let outside = (0..3).any(|a| {
            let (lo, hi) = points
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                    (lo.min(p[a]), hi.max(p[a]))
                });
            qc[a] < lo - pad || qc[a] > hi + pad
        });
        if outside {
            return Err(FitError::QcOutsidePointCloud([qc[0], qc[1], qc[2]]));
        }

        let descent = DescentParams {
            weights: params.weights,
            tau: params.tau,
            n_iterations,
            control_spacing_um: params.search_radius_um,
            search_radius_um: Some(params.search_radius_um),
        };
        let fitted = axis::fit_axis(points, qc, None, &descent, progress)?;
        log::info!(
            "iRoCS axis: {:.2} µm, {} control points",
            fitted.length_um(),
            fitted.controls().len()
        );
        self.axis = Some(fitted);
        Ok(())
    }

    /// 根轴长度 (µm).
    #[inline]
    pub fn axis_length_um(&self) -> Option<f64> {
        self.axis.as_ref().map(AxisModel::length_um)
    }

    /// 根轴上参数 `u ∈ [0, 1]` 处的位置 (µm).
    #[inline]
    pub fn axis_position(&self, u: f64) -> Option<Vec3> {
        self.axis.as_ref().map(|a| a.position(u))
    }

    /// 根轴上参数 `u` 处的方向.
    #[inline]
    pub fn axis_direction(&self, u: f64) -> Option<Vec3> {
        self.axis.as_ref().map(|a| a.direction(u))
    }

    /// 空间点的根坐标 `(l, r, φ)`.
    #[inline]
    pub fn get_coordinates(&self, pos_um: &Vec3) -> Option<AxisCoordinates> {
        self.axis.as_ref().map(|a| a.coordinates(pos_um))
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        use std::path::Path;

        use crate::persist::{self, AxisRecord, PersistError};

        const KIND: &str = "irocs";

        impl Irocs {
            /// 保存已拟合的模型.
            pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistError> {
                let axis = self.axis.as_ref().ok_or(PersistError::NotFitted)?;
                persist::save(path.as_ref(), KIND, &AxisRecord::from(axis))
            }

            /// 加载模型.
            pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
                let r: AxisRecord = persist::load(path.as_ref(), KIND)?;
                Ok(Self {
                    axis: Some(r.try_into()?),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::label;
    use crate::data::synthetic;
    use std::f64::consts::PI;

    fn helix() -> Vec<Vec3> {
        synthetic::helix_nuclei(8, 10.0, 10.0, 8.0, 0.75 * PI, label::EPIDERMIS)
            .iter()
            .map(|n| n.position_um())
            .collect()
    }

    fn scenario_params() -> IrocsParams {
        IrocsParams {
            weights: EnergyWeights {
                kappa: 1.0,
                lambda: 0.0,
                mu: 0.0,
            },
            search_radius_um: 30.0,
            n_iterations: 1000,
            tau: 0.1,
        }
    }

    #[test]
    fn test_check() {
        assert_eq!(IrocsParams::default().check(), Ok(1000));
        let p = IrocsParams {
            tau: 0.0,
            ..Default::default()
        };
        assert_eq!(p.check(), Err(ConfigError::NonPositiveTimeStep(0.0)));
        let p = IrocsParams {
            n_iterations: -3,
            ..Default::default()
        };
        assert_eq!(p.check(), Err(ConfigError::NegativeIterations(-3)));
        let p = IrocsParams {
            search_radius_um: 0.0,
            ..Default::default()
        };
        assert!(matches!(p.check(), Err(ConfigError::NonPositive(..))));
    }

    /// 螺旋排列的细胞核: 根轴方向恢复为螺旋轴方向.
    #[test]
    fn test_helix_axis_direction() {
        let mut rct = Irocs::new();
        let qc = Vec3::new(5.0, 0.0, 0.0);
        rct.fit(&helix(), qc, &scenario_params(), None).unwrap();

        let d = rct.axis_direction(0.0).unwrap().normalize();
        let angle = d.dot(&Vec3::x()).clamp(-1.0, 1.0).acos();
        assert!(angle < 0.05, "angle {angle}");
        assert_eq!(rct.axis_position(0.0), Some(qc));

        for p in helix() {
            let c = rct.get_coordinates(&p).unwrap();
            assert!((c.r - 10.0).abs() < 0.5, "{c:?}");
            assert!((c.l - (p[0] - 5.0)).abs() < 1.0, "{c:?}");
        }
    }

    #[test]
    fn test_rejects_before_touching_data() {
        let mut rct = Irocs::new();
        let bad = IrocsParams {
            tau: -1.0,
            ..scenario_params()
        };
        // 空点集也先报告参数错误.
        assert_eq!(
            rct.fit(&[], Vec3::zeros(), &bad, None),
            Err(FitError::Config(ConfigError::NonPositiveTimeStep(-1.0)))
        );
        assert!(!rct.is_fitted());
    }

    #[test]
    fn test_too_few_points_and_qc_outside() {
        let mut rct = Irocs::new();
        let points = helix();
        assert_eq!(
            rct.fit(&points[..3], Vec3::zeros(), &scenario_params(), None),
            Err(FitError::TooFewPoints(3, MIN_EPIDERMIS_MARKERS))
        );
        assert_eq!(
            rct.fit(&points, Vec3::new(-100.0, 0.0, 0.0), &scenario_params(), None),
            Err(FitError::QcOutsidePointCloud([-100.0, 0.0, 0.0]))
        );
        assert!(!rct.is_fitted());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_save_and_load() {
        let mut rct = Irocs::new();
        rct.fit(&helix(), Vec3::new(5.0, 0.0, 0.0), &scenario_params(), None)
            .unwrap();
        let path = std::env::temp_dir().join(format!("irocs-rct-{}.bin", std::process::id()));
        rct.save(&path).unwrap();
        let loaded = Irocs::load(&path).unwrap();
        assert_eq!(loaded, rct);

        // 种类不符.
        assert!(matches!(
            crate::sct::ShellCoordinateTransform::load(&path),
            Err(PersistError::WrongKind(..))
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
