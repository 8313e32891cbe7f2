//! 外壳坐标变换 (`ShellCoordinateTransform`).
//!
//! 从根表面点云拟合弯曲根轴及沿根轴变化的椭圆截面, 并提供任意空间点的
//! `(l, r, φ)` 根坐标查询和表面三角网格.

use itertools::izip;

use crate::axis::{self, AxisCoordinates, AxisModel, DescentParams, EnergyWeights};
use crate::consts::MIN_SHELL_POINTS;
use crate::error::{ConfigError, FitError};
use crate::progress::{self, Progress, StageList};
use crate::Vec3;

mod mesh;

pub use mesh::{check_sampling, SurfaceMesh, MIN_LATITUDES, MIN_LONGITUDES};

const FILTER: &str = "Filtering points";
const AXIS: &str = "Fitting root axis";
const RADII: &str = "Estimating cross-sections";
const MESH: &str = "Building surface mesh";

/// 估计椭圆半径时, 每个控制点至少需要的点数.
const MIN_SECTION_POINTS: usize = 3;

/// 外壳拟合参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShellFitParams {
    /// 控制点间距 (µm).
    pub segment_length_um: f64,

    /// 到 `domain_um` 边界距离小于该值的点不参与拟合 (µm).
    pub margin_um: f64,

    /// 点云所在体数据的物理范围 `(最小角, 最大角)` (µm). 为 `None` 时不剔除任何点.
    pub domain_um: Option<(Vec3, Vec3)>,

    /// 静止中心 (QC) 位置 (µm). 为 `None` 时由点云估计.
    pub qc_um: Option<Vec3>,

    /// 标架 `n` 方向的提示, 用于消除绕根轴的旋转歧义.
    pub x_direction: Option<Vec3>,
}

impl Default for ShellFitParams {
    fn default() -> Self {
        Self {
            segment_length_um: 10.0,
            margin_um: 0.0,
            domain_um: None,
            qc_um: None,
            x_direction: None,
        }
    }
}

impl ShellFitParams {
    /// 检查参数合法性.
    pub fn check(&self) -> Result<(), ConfigError> {
        if !(self.segment_length_um.is_finite() && self.segment_length_um > 0.0) {
            return Err(ConfigError::NonPositive(
                "segment_length_um",
                self.segment_length_um,
            ));
        }
        if !(self.margin_um.is_finite() && self.margin_um >= 0.0) {
            return Err(ConfigError::Negative("margin_um", self.margin_um));
        }
        Ok(())
    }

    /// 剔除靠近体数据边界的点.
    fn filter(&self, points: &[Vec3]) -> Vec<Vec3> {
        match self.domain_um {
            None => points.to_vec(),
            Some((lo, hi)) => {
                let m = self.margin_um;
                points
                    .iter()
                    .filter(|p| (0..3).all(|a| p[a] >= lo[a] + m && p[a] <= hi[a] - m))
                    .copied()
                    .collect()
            }
        }
    }
}

/// 点云包围盒 `(最小角, 最大角)`.
fn bounding_box(points: &[Vec3]) -> Option<(Vec3, Vec3)> {
    let first = points.first()?;
    Some(points.iter().fold((*first, *first), |(lo, hi), p| {
        (lo.inf(p), hi.sup(p))
    }))
}

/// 外壳坐标变换.
///
/// 新建时为空 (未拟合), 所有坐标查询返回 `None`. [`Self::fit_model`] 成功后模型被整体替换;
/// 失败或取消时保持调用前的状态.
#[derive(Clone, Debug, PartialEq)]
pub struct ShellCoordinateTransform {
    axis: Option<AxisModel>,
    weights: EnergyWeights,
    tau: f64,
    n_iterations: usize,
    n_latitudes: usize,
    n_longitudes: usize,
    mesh: SurfaceMesh,
}

impl Default for ShellCoordinateTransform {
    fn default() -> Self {
        Self {
            axis: None,
            weights: EnergyWeights::default(),
            tau: 0.5,
            n_iterations: 500,
            n_latitudes: 32,
            n_longitudes: 24,
            mesh: SurfaceMesh::default(),
        }
    }
}

impl ShellCoordinateTransform {
    /// 未拟合的空模型.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置能量权重, 初始步长和最大迭代次数. 只影响之后的拟合.
    pub fn set_optimization(
        &mut self,
        weights: EnergyWeights,
        tau: f64,
        n_iterations: i32,
    ) -> Result<(), ConfigError> {
        self.n_iterations = axis::check_optimization(&weights, tau, n_iterations)?;
        self.weights = weights;
        self.tau = tau;
        Ok(())
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

    /// 从点云拟合模型.
    ///
    /// 1. 剔除距离体数据边界小于 `margin_um` 的点;
    /// 2. 剩余点数少于 [`MIN_SHELL_POINTS`] 时返回 [`FitError::TooFewPoints`];
    /// 3. 给定的 QC 位于 (按 `segment_length_um` 扩展后的) 点云包围盒之外时返回
    ///    [`FitError::QcOutsidePointCloud`]; 未给定时取主方向上截面较小的一端;
    /// 4. 以 `segment_length_um` 为控制点间距最小化能量, 得到根轴;
    /// 5. 为每个控制点估计椭圆截面的两个半径, 然后重建表面网格.
    pub fn fit_model(
        &mut self,
        points: &[Vec3],
        params: &ShellFitParams,
        progress: Progress,
    ) -> Result<(), FitError> {
        params.check()?;
        let mut stages = StageList::new();
        stages
            .push(FILTER, 1.0)
            .push(AXIS, 20.0)
            .push(RADII, 2.0)
            .push(MESH, 1.0);
        let mut schedule = stages.schedule(progress);

        let s = schedule.enter(FILTER)?;
        let used = params.filter(points);
        log::info!(
            "fitting shell coordinates on {} of {} points",
            used.len(),
            points.len()
        );
        if used.len() < MIN_SHELL_POINTS {
            return Err(FitError::TooFewPoints(used.len(), MIN_SHELL_POINTS));
        }
        let qc = match params.qc_um {
            Some(qc) => {
                let (lo, hi) = bounding_box(&used).ok_or(FitError::DegenerateAxis)?;
                let pad = Vec3::repeat(params.segment_length_um);
                if (0..3).any(|a| qc[a] < lo[a] - pad[a] || qc[a] > hi[a] + pad[a]) {
                    return Err(FitError::QcOutsidePointCloud([qc[0], qc[1], qc[2]]));
                }
                qc
            }
            None => {
                let qc = axis::estimate_qc(&used).ok_or(FitError::DegenerateAxis)?;
                log::info!("estimated QC at {:?} µm", qc.as_slice());
                qc
            }
        };
        s.done()?;

        let s = schedule.enter(AXIS)?;
        let descent = DescentParams {
            weights: self.weights,
            tau: self.tau,
            n_iterations: self.n_iterations,
            control_spacing_um: params.segment_length_um,
            search_radius_um: None,
        };
        let mut fitted = axis::fit_axis(&used, qc, params.x_direction, &descent, s.progress())?;
        s.done()?;

        let s = schedule.enter(RADII)?;
        let (rn, rb) = elliptic_radii(&fitted, &used);
        fitted.set_radii(rn, rb)?;
        progress::check(s.progress())?;
        s.done()?;

        let s = schedule.enter(MESH)?;
        let mesh = SurfaceMesh::build(&fitted, self.n_latitudes, self.n_longitudes);
        s.done()?;
        schedule.finish()?;

        log::info!(
            "root axis: {:.2} µm, {} control points",
            fitted.length_um(),
            fitted.controls().len()
        );
        self.axis = Some(fitted);
        self.mesh = mesh;
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

    /// 根轴上参数 `u` 处的方向, 即 `axis_position` 对 `u` 的导数.
    #[inline]
    pub fn axis_direction(&self, u: f64) -> Option<Vec3> {
        self.axis.as_ref().map(|a| a.direction(u))
    }

    /// 空间点的根坐标 `(l, r, φ)`.
    #[inline]
    pub fn get_coordinates(&self, pos_um: &Vec3) -> Option<AxisCoordinates> {
        self.axis.as_ref().map(|a| a.coordinates(pos_um))
    }

    /// 空间点的根坐标, `r` 以该角度上的截面半径归一化 (表面上为 1).
    #[inline]
    pub fn get_coordinates_with_normalized_radius(&self, pos_um: &Vec3) -> Option<AxisCoordinates> {
        self.axis
            .as_ref()
            .map(|a| a.coordinates_with_normalized_radius(pos_um))
    }

    /// 参数 `u` 处, 角度 `phi` 方向上的截面半径 (µm).
    #[inline]
    pub fn radius_at(&self, u: f64, phi: f64) -> Option<f64> {
        self.axis.as_ref().map(|a| a.radius_at(u, phi))
    }

    /// 根尖张角 (弧度).
    ///
    /// 取第一条非 QC 纬线处的平均截面半径 `r̄` 和该纬线到 QC 的弧长 `s`,
    /// 张角为 `2·atan(r̄ / s)`.
    pub fn opening_angle(&self) -> Option<f64> {
        let a = self.axis.as_ref()?;
        let s = a.length_um() / (self.n_latitudes - 1) as f64;
        let u = a.u_at_arc(s);
        let r = 0.5 * (a.radius_n(u) + a.radius_b(u));
        Some(2.0 * (r / s).atan())
    }

    /// 网格采样密度 `(纬线数, 经线数)`.
    #[inline]
    pub fn sampling(&self) -> (usize, usize) {
        (self.n_latitudes, self.n_longitudes)
    }

    /// 设置网格采样密度, 并重新生成网格.
    pub fn set_sampling(&mut self, n_latitudes: usize, n_longitudes: usize) -> Result<(), ConfigError> {
        check_sampling(n_latitudes, n_longitudes)?;
        self.n_latitudes = n_latitudes;
        self.n_longitudes = n_longitudes;
        self.rebuild_mesh();
        Ok(())
    }

    /// 表面网格. 未拟合时为空.
    #[inline]
    pub fn mesh(&self) -> &SurfaceMesh {
        &self.mesh
    }

    fn rebuild_mesh(&mut self) {
        self.mesh = match &self.axis {
            Some(a) => SurfaceMesh::build(a, self.n_latitudes, self.n_longitudes),
            None => SurfaceMesh::default(),
        };
    }
}

/// 为每个控制点估计椭圆截面的两个半径.
///
/// 每个点归属于最近的控制点 (按曲线参数), 半径取 `√(2·mean((d·n)²))` 与
/// `√(2·mean((d·b)²))`; 对圆截面两者都等于圆半径. 点数不足的控制点保留原半径.
fn elliptic_radii(axis: &AxisModel, points: &[Vec3]) -> (Vec<f64>, Vec<f64>) {
    let n = axis.controls().len();
    let mut acc = vec![(0.0, 0.0, 0usize); n];
    for p in points {
        let c = axis.coordinates(p);
        let k = ((c.u * (n - 1) as f64).round() as usize).min(n - 1);
        let (s, co) = c.phi.sin_cos();
        let e = &mut acc[k];
        e.0 += (c.r * co).powi(2);
        e.1 += (c.r * s).powi(2);
        e.2 += 1;
    }
    let mut rn = axis.radii_n().to_vec();
    let mut rb = axis.radii_b().to_vec();
    for (n, b, &(sn, sb, cnt)) in izip!(rn.iter_mut(), rb.iter_mut(), &acc) {
        if cnt >= MIN_SECTION_POINTS {
            *n = (2.0 * sn / cnt as f64).sqrt();
            *b = (2.0 * sb / cnt as f64).sqrt();
        }
    }
    (rn, rb)
}

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        use std::path::Path;

        use crate::persist::{self, AxisRecord, PersistError};

        const KIND: &str = "shell-coordinate-transform";

        #[derive(serde::Serialize, serde::Deserialize)]
        struct Record {
            axis: AxisRecord,
            weights: EnergyWeights,
            tau: f64,
            n_iterations: usize,
            n_latitudes: usize,
            n_longitudes: usize,
        }

        impl ShellCoordinateTransform {
            /// 保存已拟合的模型.
            pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistError> {
                let axis = self.axis.as_ref().ok_or(PersistError::NotFitted)?;
                let record = Record {
                    axis: axis.into(),
                    weights: self.weights,
                    tau: self.tau,
                    n_iterations: self.n_iterations,
                    n_latitudes: self.n_latitudes,
                    n_longitudes: self.n_longitudes,
                };
                persist::save(path.as_ref(), KIND, &record)
            }

            /// 加载模型并重新生成表面网格.
            pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
                let r: Record = persist::load(path.as_ref(), KIND)?;
                check_sampling(r.n_latitudes, r.n_longitudes)
                    .map_err(|e| PersistError::InvalidModel(e.into()))?;
                let mut ret = Self {
                    axis: Some(r.axis.try_into()?),
                    weights: r.weights,
                    tau: r.tau,
                    n_iterations: r.n_iterations,
                    n_latitudes: r.n_latitudes,
                    n_longitudes: r.n_longitudes,
                    mesh: SurfaceMesh::default(),
                };
                ret.rebuild_mesh();
                Ok(ret)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressEvent, ProgressState};
    use std::f64::consts::TAU;

    /// 沿 z 方向的椭圆柱面点云, 轴线过 `(·, 20, 20)`.
    fn elliptic_tube(a: f64, b: f64, len: usize) -> Vec<Vec3> {
        let mut v = vec![];
        for z in 0..=len {
            for j in 0..24 {
                let t = TAU * j as f64 / 24.0;
                v.push(Vec3::new(z as f64, 20.0 + a * t.cos(), 20.0 + b * t.sin()));
            }
        }
        v
    }

    fn params() -> ShellFitParams {
        ShellFitParams {
            segment_length_um: 10.0,
            qc_um: Some(Vec3::new(0.0, 20.0, 20.0)),
            x_direction: Some(Vec3::new(0.0, 1.0, 0.0)),
            ..Default::default()
        }
    }

    #[test]
    fn test_unfitted_queries() {
        let sct = ShellCoordinateTransform::new();
        assert!(!sct.is_fitted());
        assert_eq!(sct.axis_length_um(), None);
        assert_eq!(sct.get_coordinates(&Vec3::zeros()), None);
        assert!(sct.mesh().is_empty());
    }

    #[test]
    fn test_fit_elliptic_tube() {
        let mut sct = ShellCoordinateTransform::new();
        let (state, rx) = ProgressState::with_events();
        sct.fit_model(&elliptic_tube(6.0, 3.0, 40), &params(), Some(&state))
            .unwrap();
        assert!(sct.is_fitted());
        assert!((sct.axis_length_um().unwrap() - 40.0).abs() < 1.0);

        // `n` 方向沿 y (提示方向), 对应长半轴.
        assert!((sct.radius_at(0.5, 0.0).unwrap() - 6.0).abs() < 0.5);
        assert!((sct.radius_at(0.5, TAU / 4.0).unwrap() - 3.0).abs() < 0.5);

        let c = sct
            .get_coordinates_with_normalized_radius(&Vec3::new(20.0, 26.0, 20.0))
            .unwrap();
        assert!((c.l - 20.0).abs() < 0.5);
        assert!((c.r - 1.0).abs() < 0.1);
        assert!(c.phi.abs() < 0.1);

        let values: Vec<i32> = rx
            .try_iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress(v) => Some(v),
                _ => None,
            })
            .collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(values.last(), Some(&100));
    }

    /// `axis_direction` 是 `axis_position` 的导数.
    #[test]
    fn test_direction_matches_position_derivative() {
        let mut points = vec![];
        for k in 0..=60 {
            let z = k as f64;
            let cy = 20.0 + 0.004 * z * z;
            for j in 0..16 {
                let t = TAU * j as f64 / 16.0;
                points.push(Vec3::new(z, cy + 4.0 * t.cos(), 20.0 + 4.0 * t.sin()));
            }
        }
        let mut sct = ShellCoordinateTransform::new();
        sct.fit_model(&points, &params(), None).unwrap();
        let h = 1e-6;
        for i in 1..40 {
            let u = i as f64 / 40.0;
            let fd = (sct.axis_position(u + h).unwrap() - sct.axis_position(u - h).unwrap())
                / (2.0 * h);
            let d = sct.axis_direction(u).unwrap();
            assert!((fd - d).norm() < 1e-4 * d.norm(), "u = {u}");
        }
    }

    #[test]
    fn test_margin_and_too_few_points() {
        let points = elliptic_tube(4.0, 4.0, 40);
        let p = ShellFitParams {
            margin_um: 5.0,
            domain_um: Some((Vec3::zeros(), Vec3::new(40.0, 20.0, 40.0))),
            ..params()
        };
        // 只保留 y ≤ 15 的点, 而点云的 y 都不小于 16.
        let mut sct = ShellCoordinateTransform::new();
        assert_eq!(
            sct.fit_model(&points, &p, None),
            Err(FitError::TooFewPoints(0, MIN_SHELL_POINTS))
        );
        assert!(!sct.is_fitted());
        assert_eq!(
            sct.fit_model(&points[..5], &params(), None),
            Err(FitError::TooFewPoints(5, MIN_SHELL_POINTS))
        );
    }

    #[test]
    fn test_qc_outside_point_cloud() {
        let mut sct = ShellCoordinateTransform::new();
        let p = ShellFitParams {
            qc_um: Some(Vec3::new(-50.0, 20.0, 20.0)),
            ..params()
        };
        assert_eq!(
            sct.fit_model(&elliptic_tube(4.0, 4.0, 40), &p, None),
            Err(FitError::QcOutsidePointCloud([-50.0, 20.0, 20.0]))
        );
    }

    #[test]
    fn test_failed_refit_keeps_previous_model() {
        let mut sct = ShellCoordinateTransform::new();
        sct.fit_model(&elliptic_tube(4.0, 4.0, 30), &params(), None).unwrap();
        let before = sct.clone();
        assert!(sct.fit_model(&[], &params(), None).is_err());
        assert_eq!(sct, before);
    }

    #[test]
    fn test_sampling_regenerates_mesh() {
        let mut sct = ShellCoordinateTransform::new();
        assert_eq!(sct.set_sampling(1, 8), Err(ConfigError::MeshSampling(1, 8)));
        sct.fit_model(&elliptic_tube(4.0, 4.0, 30), &params(), None).unwrap();
        sct.set_sampling(5, 6).unwrap();
        assert_eq!(sct.mesh().vertices.len(), 30);
        assert_eq!(sct.mesh().triangle_count(), 2 * 4 * 6);

        // 圆柱: 半径 4, 每条纬线间隔 7.5 µm.
        let angle = sct.opening_angle().unwrap();
        assert!((angle - 2.0 * (4.0f64 / 7.5).atan()).abs() < 0.05);
    }

    #[test]
    fn test_estimated_qc() {
        let mut points = vec![];
        for k in 0..=40 {
            let z = k as f64;
            let r = 2.0 + 6.0 * z / 40.0;
            for j in 0..16 {
                let t = TAU * j as f64 / 16.0;
                points.push(Vec3::new(z, r * t.cos(), r * t.sin()));
            }
        }
        let mut sct = ShellCoordinateTransform::new();
        let p = ShellFitParams {
            qc_um: None,
            ..params()
        };
        sct.fit_model(&points, &p, None).unwrap();
        assert!(sct.axis_position(0.0).unwrap()[0] < 1.0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_save_and_load() {
        let mut sct = ShellCoordinateTransform::new();
        sct.fit_model(&elliptic_tube(5.0, 4.0, 30), &params(), None).unwrap();
        let path = std::env::temp_dir().join(format!("irocs-sct-{}.bin", std::process::id()));
        sct.save(&path).unwrap();
        let loaded = ShellCoordinateTransform::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, sct);

        assert!(matches!(
            ShellCoordinateTransform::new().save(&path),
            Err(PersistError::NotFitted)
        ));
    }
}
