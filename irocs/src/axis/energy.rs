//! 根轴拟合: 能量最小化.
//!
//! 能量由三项组成:
//!
//! ```text
//! E = κ/P · Σ_j (ρ_j - R(s_j))²                    数据项
//!   + λ · Σ_k |c_{k-1} - 2c_k + c_{k+1}|²          刚度项
//!   + μ · Σ_k (R_{k+1} - R_k)²                     厚度项
//! ```
//!
//! 其中 `ρ_j` 为第 `j` 个点到控制折线的距离, `R(s_j)` 为最近折线段上线性插值的半径.
//! 第一个控制点 (QC) 始终固定. 拟合分两步: 先拟合两个控制点的圆柱,
//! 再按控制点间距细分并继续优化.

use crate::axis::{principal_axis, AxisModel};
use crate::error::{Cancelled, ConfigError, FitError};
use crate::progress::{self, Progress, Ticker};
use crate::Vec3;

/// 相对能量变化低于该值时认为收敛.
const RELATIVE_TOLERANCE: f64 = 1e-10;

/// 一次成功迭代之后的步长增长系数.
const STEP_GROWTH: f64 = 1.2;

/// 细分阶段控制点数的上限. 控制点间距相对根轴长度过小时按该值截断.
pub const MAX_CONTROL_POINTS: usize = 512;

/// 能量项权重.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnergyWeights {
    /// 数据项权重.
    pub kappa: f64,

    /// 刚度项 (控制点二阶差分) 权重.
    pub lambda: f64,

    /// 厚度项 (相邻半径差) 权重.
    pub mu: f64,
}

impl Default for EnergyWeights {
    fn default() -> Self {
        Self {
            kappa: 1.0,
            lambda: 0.1,
            mu: 0.1,
        }
    }
}

/// 梯度下降参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DescentParams {
    /// 能量项权重.
    pub weights: EnergyWeights,

    /// 初始 (也是最大) 步长.
    pub tau: f64,

    /// 两个阶段合计的最大迭代次数.
    pub n_iterations: usize,

    /// 细分阶段相邻控制点的目标间距 (µm).
    pub control_spacing_um: f64,

    /// 到根轴距离大于该值的点不参与数据项. `None` 表示全部参与.
    pub search_radius_um: Option<f64>,
}

/// 检查优化参数. 依次检查步长, 迭代次数和三个权重.
///
/// # 返回值
///
/// 合法时返回迭代次数.
pub fn check_optimization(
    weights: &EnergyWeights,
    tau: f64,
    n_iterations: i32,
) -> Result<usize, ConfigError> {
    if !(tau.is_finite() && tau > 0.0) {
        return Err(ConfigError::NonPositiveTimeStep(tau));
    }
    let n = usize::try_from(n_iterations).map_err(|_| ConfigError::NegativeIterations(n_iterations))?;
    for (name, w) in [
        ("kappa", weights.kappa),
        ("lambda", weights.lambda),
        ("mu", weights.mu),
    ] {
        if !(w.is_finite() && w >= 0.0) {
            return Err(ConfigError::NegativeWeight(name, w));
        }
    }
    Ok(n)
}

/// 控制点与半径.
#[derive(Clone, Debug, PartialEq)]
struct State {
    c: Vec<Vec3>,
    r: Vec<f64>,
}

/// 能量及其梯度.
#[derive(Clone, Debug)]
struct Evaluation {
    energy: f64,
    gc: Vec<Vec3>,
    gr: Vec<f64>,
}

/// 数据项累加器.
#[derive(Clone, Debug)]
struct DataTerm {
    sum: f64,
    count: usize,
    gc: Vec<Vec3>,
    gr: Vec<f64>,
}

impl DataTerm {
    fn new(n: usize) -> Self {
        Self {
            sum: 0.0,
            count: 0,
            gc: vec![Vec3::zeros(); n],
            gr: vec![0.0; n],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.sum += other.sum;
        self.count += other.count;
        self.gc.iter_mut().zip(other.gc).for_each(|(a, b)| *a += b);
        self.gr.iter_mut().zip(other.gr).for_each(|(a, b)| *a += b);
        self
    }
}

/// 点 `p` 在折线 `c` 上的最近点: `(段下标, 段内参数, p - 最近点)`.
fn nearest_segment(c: &[Vec3], p: &Vec3) -> (usize, f64, Vec3) {
    let mut best = (0, 0.0, p - c[0]);
    let mut best_d2 = f64::INFINITY;
    for (k, w) in c.windows(2).enumerate() {
        let seg = w[1] - w[0];
        let len2 = seg.norm_squared();
        let s = if len2 > 0.0 {
            ((p - w[0]).dot(&seg) / len2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let d = p - (w[0] + seg * s);
        let d2 = d.norm_squared();
        if d2 < best_d2 {
            best_d2 = d2;
            best = (k, s, d);
        }
    }
    best
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        fn data_term(problem: &Problem, st: &State) -> DataTerm {
            use rayon::prelude::*;

            let n = st.c.len();
            problem
                .points
                .par_iter()
                .fold(|| DataTerm::new(n), |acc, p| problem.add_point(st, acc, p))
                .reduce(|| DataTerm::new(n), DataTerm::merge)
        }
    } else {
        fn data_term(problem: &Problem, st: &State) -> DataTerm {
            let n = st.c.len();
            problem
                .points
                .iter()
                .fold(DataTerm::new(n), |acc, p| problem.add_point(st, acc, p))
        }
    }
}

struct Problem<'a> {
    points: &'a [Vec3],
    weights: EnergyWeights,
    cutoff: Option<f64>,
}

impl Problem<'_> {
    fn add_point(&self, st: &State, mut acc: DataTerm, p: &Vec3) -> DataTerm {
        let (k, s, d) = nearest_segment(&st.c, p);
        let rho = d.norm();
        if self.cutoff.is_some_and(|c| rho > c) {
            return acc;
        }
        let e = rho - (st.r[k] * (1.0 - s) + st.r[k + 1] * s);
        acc.sum += e * e;
        acc.count += 1;
        if rho > 1e-12 {
            let g = d * (-2.0 * e / rho);
            acc.gc[k] += g * (1.0 - s);
            acc.gc[k + 1] += g * s;
        }
        // 最近点参数 s 随控制点移动, 半径 R(s) 也随之变化.
        if s > 0.0 && s < 1.0 {
            let v = st.c[k + 1] - st.c[k];
            let w = p - st.c[k];
            let coef = -2.0 * e * (st.r[k + 1] - st.r[k]) / v.norm_squared();
            acc.gc[k] += (v * (2.0 * s) - v - w) * coef;
            acc.gc[k + 1] += (w - v * (2.0 * s)) * coef;
        }
        acc.gr[k] -= 2.0 * e * (1.0 - s);
        acc.gr[k + 1] -= 2.0 * e * s;
        acc
    }

    fn evaluate(&self, st: &State) -> Evaluation {
        let w = &self.weights;
        let data = data_term(self, st);
        let scale = if data.count > 0 {
            w.kappa / data.count as f64
        } else {
            0.0
        };
        let mut energy = scale * data.sum;
        let mut gc: Vec<Vec3> = data.gc.into_iter().map(|g| g * scale).collect();
        let mut gr: Vec<f64> = data.gr.into_iter().map(|g| g * scale).collect();

        if w.lambda > 0.0 {
            for k in 1..st.c.len().saturating_sub(1) {
                let dd = st.c[k - 1] - st.c[k] * 2.0 + st.c[k + 1];
                energy += w.lambda * dd.norm_squared();
                gc[k - 1] += dd * (2.0 * w.lambda);
                gc[k] -= dd * (4.0 * w.lambda);
                gc[k + 1] += dd * (2.0 * w.lambda);
            }
        }
        if w.mu > 0.0 {
            for k in 0..st.r.len() - 1 {
                let dr = st.r[k + 1] - st.r[k];
                energy += w.mu * dr * dr;
                gr[k] -= 2.0 * w.mu * dr;
                gr[k + 1] += 2.0 * w.mu * dr;
            }
        }
        Evaluation { energy, gc, gr }
    }

    /// 沿负梯度走一步. QC 固定; `tied` 时所有半径共享同一个值.
    fn step(st: &State, ev: &Evaluation, tau: f64, tied: bool) -> State {
        let mut c = st.c.clone();
        for (ci, g) in c.iter_mut().zip(&ev.gc).skip(1) {
            *ci -= g * tau;
        }
        let r = if tied {
            let g: f64 = ev.gr.iter().sum();
            vec![(st.r[0] - tau * g).max(0.0); st.r.len()]
        } else {
            st.r
                .iter()
                .zip(&ev.gr)
                .map(|(r, g)| (r - tau * g).max(0.0))
                .collect()
        };
        State { c, r }
    }

    /// 自适应步长梯度下降. 返回最终状态及实际迭代次数.
    fn descend(
        &self,
        mut st: State,
        tau0: f64,
        n_iter: usize,
        tied: bool,
        ticker: &Ticker,
    ) -> Result<(State, usize), Cancelled> {
        let mut ev = self.evaluate(&st);
        let mut tau = tau0;
        let mut it = 0;
        while it < n_iter {
            it += 1;
            ticker.tick(1)?;
            let trial = Self::step(&st, &ev, tau, tied);
            let next = self.evaluate(&trial);
            if next.energy <= ev.energy {
                let converged =
                    ev.energy - next.energy <= RELATIVE_TOLERANCE * ev.energy.abs();
                st = trial;
                ev = next;
                tau = (tau * STEP_GROWTH).min(tau0);
                if converged {
                    break;
                }
            } else {
                tau *= 0.5;
                if tau < 1e-12 * tau0 {
                    break;
                }
            }
        }
        log::debug!("axis descent: {it} iterations, energy {:.6e}", ev.energy);
        Ok((st, it))
    }
}

/// 从点云拟合根轴.
///
/// 初始方向为点云主方向 (指向远离 `qc` 的一侧), 初始长度为点在该方向上的最大投影,
/// 初始半径为点到初始轴的平均距离. 第一阶段用一半迭代次数优化两个控制点的圆柱,
/// 第二阶段细分为 `max(2, ⌈L / spacing⌉ + 1)` 个控制点并用剩余迭代次数继续优化.
///
/// # 注意
///
/// 本函数不检查参数合法性, 调用方负责. 点云没有主方向或全部位于 QC 之后时返回
/// [`FitError::DegenerateAxis`].
pub fn fit_axis(
    points: &[Vec3],
    qc: Vec3,
    x_hint: Option<Vec3>,
    params: &DescentParams,
    progress: Progress,
) -> Result<AxisModel, FitError> {
    progress::check(progress)?;
    let (mean, mut dir) = principal_axis(points).ok_or(FitError::DegenerateAxis)?;
    if (mean - qc).dot(&dir) < 0.0 {
        dir = -dir;
    }
    let length = points
        .iter()
        .map(|p| (p - qc).dot(&dir))
        .fold(f64::NEG_INFINITY, f64::max);
    if !length.is_finite() || length <= 1e-6 {
        return Err(FitError::DegenerateAxis);
    }

    let problem = Problem {
        points,
        weights: params.weights,
        cutoff: params.search_radius_um,
    };

    let c = vec![qc, qc + dir * length];
    let radius = {
        let rho: Vec<f64> = points.iter().map(|p| nearest_segment(&c, p).2.norm()).collect();
        let near: Vec<f64> = match params.search_radius_um {
            Some(cut) => rho.iter().copied().filter(|&r| r <= cut).collect(),
            None => vec![],
        };
        let used = if near.is_empty() { &rho } else { &near };
        used.iter().sum::<f64>() / used.len() as f64
    };
    log::debug!(
        "axis init: length {length:.3} µm, radius {radius:.3} µm, direction {:?}",
        dir.as_slice()
    );

    let ticker = Ticker::new(progress, params.n_iterations);
    let first = params.n_iterations / 2;
    let (st, _) = problem.descend(
        State {
            c,
            r: vec![radius; 2],
        },
        params.tau,
        first,
        true,
        &ticker,
    )?;

    let (c0, c1) = (st.c[0], st.c[1]);
    let span = (c1 - c0).norm();
    if span <= 1e-6 {
        return Err(FitError::DegenerateAxis);
    }
    let segments = (span / params.control_spacing_um).ceil();
    let n = if segments >= MAX_CONTROL_POINTS as f64 {
        log::warn!(
            "control spacing {} µm too small for axis of {span:.1} µm, using {MAX_CONTROL_POINTS} control points",
            params.control_spacing_um
        );
        MAX_CONTROL_POINTS
    } else {
        (segments as usize).max(1) + 1
    };
    let refined = State {
        c: (0..n)
            .map(|i| c0 + (c1 - c0) * (i as f64 / (n - 1) as f64))
            .collect(),
        r: vec![st.r[0]; n],
    };
    let (st, _) = problem.descend(
        refined,
        params.tau,
        params.n_iterations - first,
        false,
        &ticker,
    )?;

    AxisModel::new(st.c, st.r.clone(), st.r, x_hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn cylinder_points(radius: f64, z0: f64, z1: f64, tilt: Vec3) -> Vec<Vec3> {
        let mut v = vec![];
        let mut z = z0;
        while z <= z1 {
            for j in 0..16 {
                let a = TAU * j as f64 / 16.0;
                v.push(Vec3::new(z, radius * a.sin(), radius * a.cos()) + tilt * z);
            }
            z += 1.0;
        }
        v
    }

    fn params() -> DescentParams {
        DescentParams {
            weights: EnergyWeights::default(),
            tau: 0.5,
            n_iterations: 400,
            control_spacing_um: 10.0,
            search_radius_um: None,
        }
    }

    #[test]
    fn test_check_optimization() {
        let w = EnergyWeights::default();
        assert_eq!(check_optimization(&w, 0.1, 10), Ok(10));
        assert_eq!(check_optimization(&w, 0.1, 0), Ok(0));
        assert_eq!(
            check_optimization(&w, 0.0, 10),
            Err(ConfigError::NonPositiveTimeStep(0.0))
        );
        assert_eq!(
            check_optimization(&w, 0.1, -1),
            Err(ConfigError::NegativeIterations(-1))
        );
        let bad = EnergyWeights { mu: -0.5, ..w };
        assert_eq!(
            check_optimization(&bad, 0.1, 10),
            Err(ConfigError::NegativeWeight("mu", -0.5))
        );
    }

    #[test]
    fn test_nearest_segment() {
        let c = [Vec3::zeros(), Vec3::new(10.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 0.0)];
        let (k, s, d) = nearest_segment(&c, &Vec3::new(4.0, -2.0, 0.0));
        assert_eq!(k, 0);
        assert!((s - 0.4).abs() < 1e-12);
        assert!((d - Vec3::new(0.0, -2.0, 0.0)).norm() < 1e-12);
        let (k, s, _) = nearest_segment(&c, &Vec3::new(12.0, 7.0, 0.0));
        assert_eq!(k, 1);
        assert!((s - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let points = cylinder_points(3.0, 0.0, 20.0, Vec3::new(0.0, 0.05, 0.0));
        let problem = Problem {
            points: &points,
            weights: EnergyWeights {
                kappa: 1.0,
                lambda: 0.3,
                mu: 0.2,
            },
            cutoff: None,
        };
        let st = State {
            c: vec![
                Vec3::zeros(),
                Vec3::new(7.0, 0.3, -0.2),
                Vec3::new(14.0, 0.9, 0.1),
                Vec3::new(21.0, 1.0, 0.0),
            ],
            r: vec![2.5, 2.8, 3.1, 3.3],
        };
        let ev = problem.evaluate(&st);
        let h = 1e-6;
        for k in 1..4 {
            for a in 0..3 {
                let mut plus = st.clone();
                plus.c[k][a] += h;
                let mut minus = st.clone();
                minus.c[k][a] -= h;
                let fd = (problem.evaluate(&plus).energy - problem.evaluate(&minus).energy) / (2.0 * h);
                assert!((fd - ev.gc[k][a]).abs() < 1e-5, "c[{k}][{a}]: {fd} vs {}", ev.gc[k][a]);
            }
        }
        for k in 0..4 {
            let mut plus = st.clone();
            plus.r[k] += h;
            let mut minus = st.clone();
            minus.r[k] -= h;
            let fd = (problem.evaluate(&plus).energy - problem.evaluate(&minus).energy) / (2.0 * h);
            assert!((fd - ev.gr[k]).abs() < 1e-5, "r[{k}]");
        }
    }

    #[test]
    fn test_fit_straight_cylinder() {
        let points = cylinder_points(4.0, 0.0, 40.0, Vec3::zeros());
        let axis = fit_axis(&points, Vec3::zeros(), None, &params(), None).unwrap();
        assert!((axis.length_um() - 40.0).abs() < 1.0, "{}", axis.length_um());
        assert!((axis.tangent(0.0) - Vec3::x()).norm() < 1e-3);
        assert!((axis.radius_n(0.5) - 4.0).abs() < 0.1);
        assert_eq!(axis.qc(), Vec3::zeros());
        assert_eq!(axis.controls().len(), 5);
    }

    #[test]
    fn test_control_count_is_capped() {
        let points = cylinder_points(4.0, 0.0, 40.0, Vec3::zeros());
        let p = DescentParams {
            n_iterations: 4,
            control_spacing_um: 1e-9,
            ..params()
        };
        let axis = fit_axis(&points, Vec3::zeros(), None, &p, None).unwrap();
        assert_eq!(axis.controls().len(), MAX_CONTROL_POINTS);

        let p = DescentParams {
            n_iterations: 4,
            control_spacing_um: 0.0,
            ..params()
        };
        let axis = fit_axis(&points, Vec3::zeros(), None, &p, None).unwrap();
        assert_eq!(axis.controls().len(), MAX_CONTROL_POINTS);
    }

    #[test]
    fn test_fit_recovers_tilted_axis() {
        let tilt = Vec3::new(0.0, 0.1, -0.05);
        let points = cylinder_points(5.0, 0.0, 40.0, tilt);
        let axis = fit_axis(&points, Vec3::zeros(), None, &params(), None).unwrap();
        let expected = (Vec3::x() + tilt).normalize();
        assert!(axis.tangent(0.5).dot(&expected) > 0.999);
    }

    #[test]
    fn test_fit_cancelled() {
        struct Aborted;
        impl crate::progress::ProgressReporter for Aborted {
            fn set_progress_min(&self, _: i32) {}
            fn set_progress_max(&self, _: i32) {}
            fn progress_min(&self) -> i32 {
                0
            }
            fn progress_max(&self) -> i32 {
                100
            }
            fn set_task_progress_min(&self, _: i32) {}
            fn set_task_progress_max(&self, _: i32) {}
            fn task_progress_min(&self) -> i32 {
                0
            }
            fn task_progress_max(&self) -> i32 {
                100
            }
            fn update_progress(&self, _: i32) -> bool {
                false
            }
            fn update_progress_message(&self, _: &str) -> bool {
                false
            }
            fn is_aborted(&self) -> bool {
                true
            }
            fn abort(&self) {}
            fn abort_with_error(&self, _: &str) {}
        }
        let points = cylinder_points(4.0, 0.0, 40.0, Vec3::zeros());
        assert_eq!(
            fit_axis(&points, Vec3::zeros(), None, &params(), Some(&Aborted)),
            Err(FitError::Cancelled)
        );
    }

    #[test]
    fn test_points_behind_qc() {
        let points = cylinder_points(4.0, 0.0, 40.0, Vec3::zeros());
        // QC 在远端之外, 所有点都在 QC 之后: 方向翻转, 长度仍为正.
        let axis = fit_axis(&points, Vec3::new(45.0, 0.0, 0.0), None, &params(), None).unwrap();
        assert!(axis.tangent(0.0)[0] < -0.99);
    }
}
