//! 点云主方向.

use nalgebra::Matrix3;

use crate::Vec3;

/// 点云的质心和主方向 (协方差矩阵最大特征值对应的单位特征向量).
///
/// 点数少于 2 或点云没有任何延展时返回 `None`.
pub fn principal_axis(points: &[Vec3]) -> Option<(Vec3, Vec3)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean = points.iter().fold(Vec3::zeros(), |acc, p| acc + p) / n;
    let cov = points.iter().fold(Matrix3::zeros(), |acc, p| {
        let d = p - mean;
        acc + d * d.transpose()
    }) / n;
    let eigen = cov.symmetric_eigen();
    let i = eigen.eigenvalues.imax();
    let largest = eigen.eigenvalues[i];
    if largest.is_nan() || largest <= 1e-12 {
        return None;
    }
    let dir: Vec3 = eigen.eigenvectors.column(i).into_owned();
    Some((mean, dir.normalize()))
}

/// 估计静止中心 (QC) 的位置.
///
/// 把点云投影到主方向上, 比较两端各 10% 的点到主轴的平均距离,
/// 取截面较小的一端 (根尖) 在主轴上的端点.
pub fn estimate_qc(points: &[Vec3]) -> Option<Vec3> {
    let (mean, dir) = principal_axis(points)?;
    let proj: Vec<f64> = points.iter().map(|p| (p - mean).dot(&dir)).collect();
    let (lo, hi) = proj
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| (lo.min(t), hi.max(t)));
    let band = 0.1 * (hi - lo);

    let mean_radius = |near: &dyn Fn(f64) -> bool| {
        let (sum, cnt) = points
            .iter()
            .zip(&proj)
            .filter(|(_, t)| near(**t))
            .fold((0.0, 0usize), |(sum, cnt), (p, &t)| {
                (sum + ((p - mean) - dir * t).norm(), cnt + 1)
            });
        if cnt == 0 {
            f64::INFINITY
        } else {
            sum / cnt as f64
        }
    };
    let r_lo = mean_radius(&|t| t <= lo + band);
    let r_hi = mean_radius(&|t| t >= hi - band);
    let end = if r_lo <= r_hi { lo } else { hi };
    Some(mean + dir * end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_axis_of_segment() {
        let points: Vec<Vec3> = (0..11)
            .map(|i| Vec3::new(1.0, 2.0, 3.0) + Vec3::new(0.0, 1.0, 1.0) * i as f64)
            .collect();
        let (mean, dir) = principal_axis(&points).unwrap();
        assert!((mean - Vec3::new(1.0, 7.0, 8.0)).norm() < 1e-9);
        let expected = Vec3::new(0.0, 1.0, 1.0).normalize();
        assert!((dir.dot(&expected).abs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_cloud() {
        assert!(principal_axis(&[Vec3::zeros()]).is_none());
        assert!(principal_axis(&[Vec3::zeros(); 5]).is_none());
    }

    /// 圆锥: 半径在 z = 0 处为 1, 在 z = 40 处为 10, QC 应在细端.
    #[test]
    fn test_estimate_qc_picks_narrow_end() {
        let mut points = vec![];
        for k in 0..=40 {
            let z = k as f64;
            let r = 1.0 + 9.0 * z / 40.0;
            for j in 0..12 {
                let a = std::f64::consts::TAU * j as f64 / 12.0;
                points.push(Vec3::new(z, r * a.sin(), r * a.cos()));
            }
        }
        let qc = estimate_qc(&points).unwrap();
        assert!(qc[0] < 1.0, "{qc:?}");
        assert!(qc[1].abs() < 1e-6 && qc[2].abs() < 1e-6);
    }
}
