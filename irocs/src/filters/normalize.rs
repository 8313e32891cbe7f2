//! 强度归一化.

use ndarray::Array3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::gaussian::{gaussian_smooth_ticked, smoothing_passes};
use super::{mapv_inplace, mean_std, min_max, rescale_unit};
use crate::error::Cancelled;
use crate::progress::{self, Progress, Ticker};

/// 全局归一化方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NormalizationType {
    /// 不做归一化.
    #[default]
    None,

    /// 线性映射到 `[0, 1]`.
    MinMax,

    /// 除以标准差.
    StdDev,

    /// 减去均值后除以标准差.
    ZeroMeanStdDev,
}

/// gamma 校正.
///
/// 先把数据线性映射到 `[0, 1]`, 取 `gamma` 次幂, 再映射回原来的值域.
/// `gamma == 1` 或常数数据时不做任何修改.
pub fn gamma_correct(data: &mut Array3<f64>, gamma: f64, progress: Progress) -> Result<(), Cancelled> {
    progress::check(progress)?;
    if gamma == 1.0 {
        return Ok(());
    }
    let Some((lo, hi)) = min_max(data.view()) else {
        return Ok(());
    };
    let span = hi - lo;
    if span <= 0.0 {
        return Ok(());
    }
    mapv_inplace(data, |v| lo + span * ((v - lo) / span).powf(gamma));
    progress::check(progress)
}

/// 全局归一化. 标准差为 0 时 (常数数据) 只减去均值 (或最小值).
pub fn normalize(data: &mut Array3<f64>, kind: NormalizationType) {
    match kind {
        NormalizationType::None => {}
        NormalizationType::MinMax => rescale_unit(data),
        NormalizationType::StdDev => {
            if let Some((_, std)) = mean_std(data.view()).filter(|(_, s)| *s > 0.0) {
                mapv_inplace(data, |v| v / std);
            }
        }
        NormalizationType::ZeroMeanStdDev => {
            if let Some((mean, std)) = mean_std(data.view()) {
                let std = if std > 0.0 { std } else { 1.0 };
                mapv_inplace(data, |v| (v - mean) / std);
            }
        }
    }
}

/// 局部方差归一化.
///
/// 以 `sigma_um` 高斯窗口估计局部均值 `m` 与方差 `s²`, 输出
/// `(v - m) / sqrt(s² + epsilon)`, 最后线性映射到 `[0, 1]`.
pub fn variance_normalize(
    data: &Array3<f64>,
    element_size_um: [f64; 3],
    sigma_um: f64,
    epsilon: f64,
    progress: Progress,
) -> Result<Array3<f64>, Cancelled> {
    let passes = smoothing_passes(element_size_um, sigma_um);
    let ticker = Ticker::new(progress, 2 * data.len() * passes);
    let mean = gaussian_smooth_ticked(data.view(), element_size_um, sigma_um, &ticker)?;
    let sq = data.mapv(|v| v * v);
    let mean_sq = gaussian_smooth_ticked(sq.view(), element_size_um, sigma_um, &ticker)?;

    let mut out = Array3::zeros(data.dim());
    ndarray::Zip::from(&mut out)
        .and(data)
        .and(&mean)
        .and(&mean_sq)
        .for_each(|o, &v, &m, &m2| {
            let var = (m2 - m * m).max(0.0);
            *o = (v - m) / (var + epsilon).sqrt();
        });
    rescale_unit(&mut out);
    progress::check(progress)?;
    Ok(out)
}
