//! 弯曲根轴模型.
//!
//! 根轴由一组控制点描述, 第一个控制点固定在静止中心 (QC). 控制点之间用 C1 连续的
//! Catmull-Rom (三次 Hermite) 曲线连接, 参数 `u ∈ [0, 1]`. 每个控制点带有沿两个
//! 标架方向的半径, 根的截面因此是一个椭圆.
//!
//! 对任意空间点, 模型给出 `(l, r, φ)`:
//!
//! 1. `l`: 沿根轴从 QC 到最近点的弧长 (QC 之前为负, 远端之外线性外推);
//! 2. `r`: 到根轴的距离;
//! 3. `φ`: 绕根轴的角度, 从标架的 `n` 方向量起, 取值 `(-π, π]`.
//!
//! 标架沿根轴以投影方式传递 (旋转最小), 初始 `n` 方向由 `x_direction` 提示确定.

use ordered_float::OrderedFloat;

use crate::error::FitError;
use crate::Vec3;

mod energy;
mod pca;

pub use energy::{check_optimization, fit_axis, DescentParams, EnergyWeights, MAX_CONTROL_POINTS};
pub use pca::{estimate_qc, principal_axis};

/// 每段曲线的查找表采样数.
const SAMPLES_PER_SPAN: usize = 64;

/// 最近点细化时的黄金分割迭代次数.
const GOLDEN_ITERATIONS: usize = 48;

/// 空间点在根坐标系中的坐标.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AxisCoordinates {
    /// 沿根轴到 QC 的弧长 (µm).
    pub l: f64,

    /// 到根轴的距离 (µm).
    pub r: f64,

    /// 绕根轴的角度 (弧度).
    pub phi: f64,

    /// 最近点的曲线参数, 钳制在 `[0, 1]`.
    pub u: f64,
}

/// 查找表采样.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Sample {
    pos: Vec3,
    arc: f64,
    t: Vec3,
    n: Vec3,
}

/// 弯曲根轴.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisModel {
    controls: Vec<Vec3>,
    radius_n: Vec<f64>,
    radius_b: Vec<f64>,
    x_hint: Option<Vec3>,
    samples: Vec<Sample>,
}

/// 与 `t` 正交的初始 `n` 方向.
///
/// 优先使用提示方向在 `t` 的法平面上的投影; 提示缺失或与 `t` 平行时,
/// 使用与 `t` 最不平行的坐标轴.
fn seed_normal(t: &Vec3, hint: Option<&Vec3>) -> Vec3 {
    if let Some(h) = hint {
        let p = h - t * h.dot(t);
        if p.norm() > 1e-6 * h.norm().max(1.0) {
            return p.normalize();
        }
    }
    let i = t.iamin();
    let mut e = Vec3::zeros();
    e[i] = 1.0;
    (e - t * e.dot(t)).normalize()
}

/// 椭圆在极角 `phi` 处的极径. `a` 为 `phi = 0` 方向的半轴.
#[inline]
pub fn ellipse_radius(a: f64, b: f64, phi: f64) -> f64 {
    if a <= f64::EPSILON || b <= f64::EPSILON {
        return a.max(b);
    }
    let (s, c) = phi.sin_cos();
    a * b / ((b * c).powi(2) + (a * s).powi(2)).sqrt()
}

impl AxisModel {
    /// 由控制点和每个控制点的两个半径构建根轴.
    ///
    /// # 注意
    ///
    /// 至少需要两个控制点, 半径数组长度必须与控制点一致, 且曲线长度必须为正,
    /// 否则返回 [`FitError::DegenerateAxis`].
    pub fn new(
        controls: Vec<Vec3>,
        radius_n: Vec<f64>,
        radius_b: Vec<f64>,
        x_hint: Option<Vec3>,
    ) -> Result<Self, FitError> {
        if controls.len() < 2
            || radius_n.len() != controls.len()
            || radius_b.len() != controls.len()
            || controls.iter().any(|c| !c.iter().all(|v| v.is_finite()))
        {
            return Err(FitError::DegenerateAxis);
        }
        let mut ret = Self {
            controls,
            radius_n,
            radius_b,
            x_hint,
            samples: vec![],
        };
        ret.build_table();
        if ret.length_um() <= 1e-9 {
            return Err(FitError::DegenerateAxis);
        }
        Ok(ret)
    }

    /// 重建弧长和标架查找表.
    fn build_table(&mut self) {
        let k = SAMPLES_PER_SPAN * (self.controls.len() - 1) + 1;
        let chord = self.chord();
        let mut samples: Vec<Sample> = Vec::with_capacity(k);
        for i in 0..k {
            let u = i as f64 / (k - 1) as f64;
            let pos = self.position(u);
            let d = self.direction(u);
            let t = match samples.last() {
                _ if d.norm() > 1e-12 => d.normalize(),
                Some(prev) => prev.t,
                None => chord,
            };
            let (arc, n) = match samples.last() {
                None => (0.0, seed_normal(&t, self.x_hint.as_ref())),
                Some(prev) => {
                    let n = prev.n - t * prev.n.dot(&t);
                    let n = if n.norm() > 1e-9 {
                        n.normalize()
                    } else {
                        seed_normal(&t, Some(&prev.n))
                    };
                    (prev.arc + (pos - prev.pos).norm(), n)
                }
            };
            samples.push(Sample { pos, arc, t, n });
        }
        self.samples = samples;
    }

    /// 首尾控制点连线方向 (单位向量). 退化时返回 z 方向.
    fn chord(&self) -> Vec3 {
        let d = self.controls[self.controls.len() - 1] - self.controls[0];
        if d.norm() > 1e-12 {
            d.normalize()
        } else {
            Vec3::x()
        }
    }

    /// 控制点.
    #[inline]
    pub fn controls(&self) -> &[Vec3] {
        &self.controls
    }

    /// 静止中心 (第一个控制点).
    #[inline]
    pub fn qc(&self) -> Vec3 {
        self.controls[0]
    }

    /// 每个控制点沿 `n` 方向的半径.
    #[inline]
    pub fn radii_n(&self) -> &[f64] {
        &self.radius_n
    }

    /// 每个控制点沿 `b` 方向的半径.
    #[inline]
    pub fn radii_b(&self) -> &[f64] {
        &self.radius_b
    }

    /// 初始标架的方向提示.
    #[inline]
    pub fn x_hint(&self) -> Option<Vec3> {
        self.x_hint
    }

    /// 替换每个控制点的半径. 长度不一致时返回 [`FitError::DegenerateAxis`].
    pub fn set_radii(&mut self, radius_n: Vec<f64>, radius_b: Vec<f64>) -> Result<(), FitError> {
        if radius_n.len() != self.controls.len() || radius_b.len() != self.controls.len() {
            return Err(FitError::DegenerateAxis);
        }
        self.radius_n = radius_n;
        self.radius_b = radius_b;
        Ok(())
    }

    /// `u` 所在的曲线段及段内参数.
    #[inline]
    fn span(&self, u: f64) -> (usize, f64) {
        let segs = self.controls.len() - 1;
        let t = u.clamp(0.0, 1.0) * segs as f64;
        let i = (t.floor() as usize).min(segs - 1);
        (i, t - i as f64)
    }

    /// 控制点 `i` 处的 Hermite 切向量 (相对于段参数).
    #[inline]
    fn knot_tangent(&self, i: usize) -> Vec3 {
        let c = &self.controls;
        let last = c.len() - 1;
        if i == 0 {
            c[1] - c[0]
        } else if i == last {
            c[last] - c[last - 1]
        } else {
            (c[i + 1] - c[i - 1]) * 0.5
        }
    }

    /// 根轴上参数 `u` 处的位置 (µm). `u` 被钳制到 `[0, 1]`.
    pub fn position(&self, u: f64) -> Vec3 {
        let (i, s) = self.span(u);
        let (s2, s3) = (s * s, s * s * s);
        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        self.controls[i] * h00
            + self.knot_tangent(i) * h10
            + self.controls[i + 1] * h01
            + self.knot_tangent(i + 1) * h11
    }

    /// 位置对 `u` 的导数 `dP/du` (未归一化).
    pub fn direction(&self, u: f64) -> Vec3 {
        let (i, s) = self.span(u);
        let s2 = s * s;
        let d00 = 6.0 * s2 - 6.0 * s;
        let d10 = 3.0 * s2 - 4.0 * s + 1.0;
        let d01 = -6.0 * s2 + 6.0 * s;
        let d11 = 3.0 * s2 - 2.0 * s;
        let dt = self.controls[i] * d00
            + self.knot_tangent(i) * d10
            + self.controls[i + 1] * d01
            + self.knot_tangent(i + 1) * d11;
        dt * (self.controls.len() - 1) as f64
    }

    /// 单位切向量.
    pub fn tangent(&self, u: f64) -> Vec3 {
        let d = self.direction(u);
        if d.norm() > 1e-12 {
            d.normalize()
        } else {
            self.samples[self.sample_index(u)].t
        }
    }

    /// 根轴总弧长 (µm).
    #[inline]
    pub fn length_um(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.arc)
    }

    #[inline]
    fn sample_index(&self, u: f64) -> usize {
        let k = self.samples.len() - 1;
        ((u.clamp(0.0, 1.0) * k as f64).round() as usize).min(k)
    }

    /// 从 QC 到 `u` 的弧长 (µm).
    pub fn arc_length(&self, u: f64) -> f64 {
        let k = self.samples.len() - 1;
        let t = u.clamp(0.0, 1.0) * k as f64;
        let i = (t.floor() as usize).min(k - 1);
        let f = t - i as f64;
        self.samples[i].arc * (1.0 - f) + self.samples[i + 1].arc * f
    }

    /// 弧长 `s` 对应的曲线参数. `s` 被钳制到 `[0, length]`.
    pub fn u_at_arc(&self, s: f64) -> f64 {
        let s = s.clamp(0.0, self.length_um());
        let k = self.samples.len() - 1;
        let j = self.samples.partition_point(|p| p.arc < s).clamp(1, k);
        let (a, b) = (self.samples[j - 1].arc, self.samples[j].arc);
        let f = if b > a { (s - a) / (b - a) } else { 0.0 };
        (j as f64 - 1.0 + f) / k as f64
    }

    /// `u` 处的正交标架 `(t, n, b)`.
    pub fn frame(&self, u: f64) -> (Vec3, Vec3, Vec3) {
        let t = self.tangent(u);
        let n0 = self.samples[self.sample_index(u)].n;
        let n = n0 - t * n0.dot(&t);
        let n = if n.norm() > 1e-9 {
            n.normalize()
        } else {
            seed_normal(&t, Some(&n0))
        };
        (t, n, t.cross(&n))
    }

    /// 在控制点半径之间线性插值.
    #[inline]
    fn interp(&self, values: &[f64], u: f64) -> f64 {
        let (i, s) = self.span(u);
        values[i] * (1.0 - s) + values[i + 1] * s
    }

    /// `u` 处沿 `n` 方向的半径.
    #[inline]
    pub fn radius_n(&self, u: f64) -> f64 {
        self.interp(&self.radius_n, u)
    }

    /// `u` 处沿 `b` 方向的半径.
    #[inline]
    pub fn radius_b(&self, u: f64) -> f64 {
        self.interp(&self.radius_b, u)
    }

    /// `u` 处, 角度 `phi` 方向上的截面半径.
    #[inline]
    pub fn radius_at(&self, u: f64, phi: f64) -> f64 {
        ellipse_radius(self.radius_n(u), self.radius_b(u), phi)
    }

    /// 在查找表中找到与 `q` 最近的采样下标.
    fn nearest_sample(&self, q: &Vec3) -> usize {
        self.samples
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| OrderedFloat((s.pos - q).norm_squared()))
            .map_or(0, |(i, _)| i)
    }

    /// 空间点 `q` 的根坐标.
    pub fn coordinates(&self, q: &Vec3) -> AxisCoordinates {
        let k = self.samples.len() - 1;
        let j = self.nearest_sample(q);
        let first = &self.samples[0];
        let last = &self.samples[k];

        // QC 之前与远端之外: 沿端点切线线性外推.
        let before = j == 0 && (q - first.pos).dot(&first.t) < 0.0;
        let after = j == k && (q - last.pos).dot(&last.t) > 0.0;
        let (u, l, d) = if before || after {
            let (u, s) = if before { (0.0, first) } else { (1.0, last) };
            let along = (q - s.pos).dot(&s.t);
            (u, s.arc + along, (q - s.pos) - s.t * along)
        } else {
            let lo = j.saturating_sub(1) as f64 / k as f64;
            let hi = (j + 1).min(k) as f64 / k as f64;
            let u = self.refine(q, lo, hi);
            (u, self.arc_length(u), q - self.position(u))
        };

        let (_, n, b) = self.frame(u);
        AxisCoordinates {
            l,
            r: d.norm(),
            phi: d.dot(&b).atan2(d.dot(&n)),
            u,
        }
    }

    /// 与 [`Self::coordinates`] 相同, 但 `r` 被除以该角度上的截面半径.
    /// 截面半径为 0 时不做归一化.
    pub fn coordinates_with_normalized_radius(&self, q: &Vec3) -> AxisCoordinates {
        let mut c = self.coordinates(q);
        let rr = self.radius_at(c.u, c.phi);
        if rr > f64::EPSILON {
            c.r /= rr;
        }
        c
    }

    /// 在 `[lo, hi]` 上以黄金分割搜索 `|P(u) - q|²` 的最小值.
    fn refine(&self, q: &Vec3, mut lo: f64, mut hi: f64) -> f64 {
        const INV_PHI: f64 = 0.618_033_988_749_894_8;
        let f = |u: f64| (self.position(u) - q).norm_squared();
        let mut x1 = hi - INV_PHI * (hi - lo);
        let mut x2 = lo + INV_PHI * (hi - lo);
        let (mut f1, mut f2) = (f(x1), f(x2));
        for _ in 0..GOLDEN_ITERATIONS {
            if f1 <= f2 {
                hi = x2;
                x2 = x1;
                f2 = f1;
                x1 = hi - INV_PHI * (hi - lo);
                f1 = f(x1);
            } else {
                lo = x1;
                x1 = x2;
                f1 = f2;
                x2 = lo + INV_PHI * (hi - lo);
                f2 = f(x2);
            }
        }
        0.5 * (lo + hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn straight(len: f64, n: usize) -> AxisModel {
        let controls = (0..n)
            .map(|i| Vec3::new(len * i as f64 / (n - 1) as f64, 0.0, 0.0))
            .collect();
        AxisModel::new(controls, vec![5.0; n], vec![5.0; n], Some(Vec3::new(0.0, 0.0, 1.0)))
            .unwrap()
    }

    fn arc() -> AxisModel {
        // 半径 20 的四分之一圆弧, 位于 (z, y) 平面.
        let controls: Vec<Vec3> = (0..5)
            .map(|i| {
                let a = FRAC_PI_2 * i as f64 / 4.0;
                Vec3::new(20.0 * a.sin(), 20.0 * (1.0 - a.cos()), 0.0)
            })
            .collect();
        AxisModel::new(controls, vec![4.0; 5], vec![2.0; 5], None).unwrap()
    }

    #[test]
    fn test_straight_axis_coordinates() {
        let axis = straight(40.0, 3);
        assert!((axis.length_um() - 40.0).abs() < 1e-9);

        let c = axis.coordinates(&Vec3::new(10.0, 0.0, 3.0));
        assert!((c.l - 10.0).abs() < 1e-6);
        assert!((c.r - 3.0).abs() < 1e-6);
        assert!(c.phi.abs() < 1e-6);

        let c = axis.coordinates(&Vec3::new(25.0, 2.0, 0.0));
        assert!((c.phi.abs() - FRAC_PI_2).abs() < 1e-6);

        // QC 之前为负, 远端之外线性外推.
        let c = axis.coordinates(&Vec3::new(-4.0, 1.0, 0.0));
        assert!((c.l + 4.0).abs() < 1e-9);
        assert!((c.r - 1.0).abs() < 1e-9);
        let c = axis.coordinates(&Vec3::new(47.0, 0.0, 0.0));
        assert!((c.l - 47.0).abs() < 1e-9);
    }

    /// `direction(u)` 与 `position(u)` 的有限差分一致.
    #[test]
    fn test_direction_is_derivative_of_position() {
        let axis = arc();
        let h = 1e-6;
        for i in 1..50 {
            let u = i as f64 / 50.0;
            let fd = (axis.position(u + h) - axis.position(u - h)) / (2.0 * h);
            let d = axis.direction(u);
            assert!((fd - d).norm() < 1e-4 * d.norm().max(1.0), "u = {u}");
        }
    }

    #[test]
    fn test_arc_length_and_inverse() {
        let axis = arc();
        let expected = 20.0 * FRAC_PI_2;
        assert!((axis.length_um() - expected).abs() < 0.05 * expected);
        for s in [0.0, 3.0, 12.5, axis.length_um()] {
            let u = axis.u_at_arc(s);
            assert!((axis.arc_length(u) - s).abs() < 1e-6);
        }
    }

    #[test]
    fn test_frame_is_orthonormal_and_follows_hint() {
        let axis = arc();
        for u in [0.0, 0.3, 0.77, 1.0] {
            let (t, n, b) = axis.frame(u);
            assert!((t.norm() - 1.0).abs() < 1e-9);
            assert!(t.dot(&n).abs() < 1e-9);
            assert!(t.dot(&b).abs() < 1e-9);
            assert!(n.dot(&b).abs() < 1e-9);
        }
        let axis = straight(10.0, 2);
        let (_, n, _) = axis.frame(0.5);
        assert!((n - Vec3::new(0.0, 0.0, 1.0)).norm() < 1e-9);
    }

    #[test]
    fn test_elliptic_radius() {
        assert!((ellipse_radius(4.0, 2.0, 0.0) - 4.0).abs() < 1e-12);
        assert!((ellipse_radius(4.0, 2.0, FRAC_PI_2) - 2.0).abs() < 1e-12);
        assert!((ellipse_radius(3.0, 3.0, 1.234) - 3.0).abs() < 1e-12);
        assert_eq!(ellipse_radius(0.0, 2.0, PI), 2.0);

        let axis = straight(40.0, 3);
        let c = axis.coordinates_with_normalized_radius(&Vec3::new(20.0, 0.0, 10.0));
        assert!((c.r - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_axis() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(
            AxisModel::new(vec![p, p], vec![1.0; 2], vec![1.0; 2], None),
            Err(FitError::DegenerateAxis)
        );
        assert_eq!(
            AxisModel::new(vec![p], vec![1.0], vec![1.0], None),
            Err(FitError::DegenerateAxis)
        );
    }
}
