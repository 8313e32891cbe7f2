//! 细胞分割.
//!
//! 把原始强度体数据转换为离散的细胞标签体数据. 流水线按固定顺序执行, 每个可选阶段
//! 在其触发参数无效时被跳过:
//!
//! 1. gamma 校正
//! 2. 全局归一化
//! 3. 中值滤波
//! 4. 各向同性重采样
//! 5. 局部方差归一化 (及重新归一化)
//! 6. 各向异性预扩散
//! 7. 高斯平滑
//! 8. Hessian 特征分解, 得到最负特征值 `l1` 和特征向量 `v1`
//! 9. 带 z 方向补偿的自适应阈值, 得到细胞内部标记
//! 10. 26-连通区域标记
//! 11. 以 `-l1` 为代价曲面的分水岭
//! 12. 删除过小的区域并再次分水岭
//! 13. 背景标签归一化 (体积最大的区域为 1)
//! 14. 细胞边界加粗
//! 15. 最近邻重采样回输入网格
//!
//! # 注意
//!
//! 取消时函数立即返回 [`SegmentError::Cancelled`], 不产生任何分割结果.

use std::path::Path;

use ndarray::{Array3, ArrayView3, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::label;
use crate::data::{neighbours, DebugArchive, IntensityVolume, Neighbourhood, Segmentation, VolumeAttr};
use crate::error::{ConfigError, SegmentError};
use crate::filters::{self, NormalizationType};
use crate::progress::{self, Progress, StageList};

const GAMMA: &str = "gamma correction";
const NORMALIZE: &str = "global normalization";
const MEDIAN: &str = "median filtering";
const RESCALE: &str = "isotropic rescaling";
const VARIANCE: &str = "variance normalization";
const DIFFUSION: &str = "anisotropic diffusion";
const SMOOTH: &str = "gaussian smoothing";
const HESSIAN: &str = "hessian eigen-decomposition";
const RIDGE: &str = "ridge detection";
const COMPONENTS: &str = "connected component labelling";
const WATERSHED: &str = "watershed";
const SMALL: &str = "small segment removal";
const BACKGROUND: &str = "background normalization";
const THICKEN: &str = "boundary thickening";
const RESAMPLE: &str = "resampling to input grid";

/// 细胞分割参数.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentParams {
    /// gamma 校正指数. 为 1 时跳过.
    pub gamma: f64,

    /// 全局归一化方式.
    pub normalization: NormalizationType,

    /// 中值滤波半宽 (体素). 为 0 时跳过.
    pub median_half_width: usize,

    /// 各向同性处理网格的体素尺寸 (µm).
    pub processing_element_size_um: f64,

    /// 局部方差归一化的高斯标准差 (µm). 为 0 时跳过.
    pub variance_sigma_um: f64,

    /// 局部方差归一化的正则项.
    pub variance_epsilon: f64,

    /// 脊线检测前的高斯标准差 (µm).
    pub hessian_sigma_um: f64,

    /// 预扩散迭代次数. 为 0 时跳过.
    pub diffusion_iterations: usize,

    /// 预扩散的边缘阈值.
    pub diffusion_kappa: f64,

    /// z 方向补偿系数. 法向沿 z 的膜的脊线阈值被除以该值, 为 1 时不补偿.
    pub z_compensation: f64,

    /// 脊线阈值: `-l1` 超过该值的体素被视为细胞膜.
    pub ridge_threshold: f64,

    /// 最小区域体积 (µm³). 更小的区域被并入相邻区域.
    pub min_segment_volume_um3: f64,

    /// 细胞边界加粗半径 (处理网格体素). 为 0 时跳过.
    pub boundary_thickening: usize,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            normalization: NormalizationType::MinMax,
            median_half_width: 1,
            processing_element_size_um: 1.0,
            variance_sigma_um: 5.0,
            variance_epsilon: 0.01,
            hessian_sigma_um: 1.0,
            diffusion_iterations: 0,
            diffusion_kappa: 0.1,
            z_compensation: 1.0,
            ridge_threshold: 0.1,
            min_segment_volume_um3: 50.0,
            boundary_thickening: 1,
        }
    }
}

impl SegmentParams {
    /// 检查参数组合是否合法.
    pub fn check(&self) -> Result<(), ConfigError> {
        let positive = |name: &'static str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::NonPositive(name, v))
            }
        };
        let non_negative = |name: &'static str, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Negative(name, v))
            }
        };
        positive("gamma", self.gamma)?;
        positive("processing_element_size_um", self.processing_element_size_um)?;
        positive("hessian_sigma_um", self.hessian_sigma_um)?;
        positive("z_compensation", self.z_compensation)?;
        non_negative("variance_sigma_um", self.variance_sigma_um)?;
        non_negative("ridge_threshold", self.ridge_threshold)?;
        non_negative("min_segment_volume_um3", self.min_segment_volume_um3)?;
        if self.variance_sigma_um > 0.0 {
            positive("variance_epsilon", self.variance_epsilon)?;
        }
        if self.diffusion_iterations > 0 {
            positive("diffusion_kappa", self.diffusion_kappa)?;
        }
        Ok(())
    }

    /// 按照启用的阶段构建带权重的阶段列表.
    fn stages(&self) -> StageList {
        let median_cost = ((2 * self.median_half_width + 1).pow(3) as f64 / 9.0).max(1.0);
        let mut list = StageList::new();
        list.push_if(self.gamma != 1.0, GAMMA, 1.0)
            .push_if(self.normalization != NormalizationType::None, NORMALIZE, 1.0)
            .push_if(self.median_half_width > 0, MEDIAN, median_cost)
            .push(RESCALE, 2.0)
            .push_if(self.variance_sigma_um > 0.0, VARIANCE, 6.0)
            .push_if(self.diffusion_iterations > 0, DIFFUSION, self.diffusion_iterations as f64)
            .push(SMOOTH, 3.0)
            .push(HESSIAN, 8.0)
            .push(RIDGE, 1.0)
            .push(COMPONENTS, 2.0)
            .push(WATERSHED, 4.0)
            .push(SMALL, 4.0)
            .push(BACKGROUND, 1.0)
            .push_if(self.boundary_thickening > 0, THICKEN, 4.0)
            .push(RESAMPLE, 1.0);
        list
    }
}

/// 细胞内部标记: 不是脊线的体素.
///
/// 体素 `p` 是脊线, 当且仅当 `-l1 > t / (1 + (zf - 1) v1z²)`.
fn interior_markers(
    l1: ArrayView3<f64>,
    v1_z: ArrayView3<f64>,
    threshold: f64,
    z_compensation: f64,
) -> Array3<bool> {
    let mut marker = Array3::from_elem(l1.dim(), false);
    Zip::from(&mut marker)
        .and(&l1)
        .and(&v1_z)
        .for_each(|m, &l, &vz| {
            let t = threshold / (1.0 + (z_compensation - 1.0) * vz * vz);
            *m = -l <= t;
        });
    marker
}

/// 每个标签的体素个数, 下标为标签值.
fn label_sizes(labels: ArrayView3<i32>) -> Vec<usize> {
    let max = labels.iter().copied().max().unwrap_or(0).max(0) as usize;
    let mut sizes = vec![0usize; max + 1];
    for &l in labels.iter().filter(|&&l| l > 0) {
        sizes[l as usize] += 1;
    }
    sizes
}

/// 删除体素个数少于 `min_voxels` 的区域 (体积最大的区域永远保留).
/// 返回删除的区域个数.
fn remove_small(labels: &mut Array3<i32>, min_voxels: usize) -> usize {
    let sizes = label_sizes(labels.view());
    let keep_anyway = filters::largest_component(&sizes[1..]);
    let small: Vec<bool> = sizes
        .iter()
        .enumerate()
        .map(|(l, &s)| l > 0 && s > 0 && s < min_voxels && Some(l as i32) != keep_anyway)
        .collect();
    filters::mapv_inplace(labels, |l| if l > 0 && small[l as usize] { 0 } else { l });
    small.iter().filter(|&&s| s).count()
}

/// 体积最大的区域变为 [`label::BACKGROUND`], 其余区域按原标签顺序连续编号.
/// 返回区域个数.
fn normalize_background(labels: &mut Array3<i32>) -> usize {
    let sizes = label_sizes(labels.view());
    let Some(largest) = filters::largest_component(&sizes[1..]) else {
        return 0;
    };
    let mut map = vec![label::UNASSIGNED; sizes.len()];
    let mut next = label::BACKGROUND + 1;
    for (l, &s) in sizes.iter().enumerate().skip(1) {
        if s == 0 {
            continue;
        }
        if l as i32 == largest {
            map[l] = label::BACKGROUND;
        } else {
            map[l] = next;
            next += 1;
        }
    }
    filters::mapv_inplace(labels, |l| if l > 0 { map[l as usize] } else { l });
    (next - label::BACKGROUND) as usize
}

/// 细胞边界加粗.
///
/// 与标签更小的相邻区域接壤的体素被视为边界, 与已有的零标签体素一起构成零掩码;
/// 对零掩码做半径为 `radius` 的闭运算, 结果中的体素全部置零.
fn thicken_boundaries(
    labels: &mut Array3<i32>,
    radius: usize,
    progress: Progress,
) -> Result<(), SegmentError> {
    let shape = labels.dim();
    let view = labels.view();
    let zero = Array3::from_shape_fn(shape, |p| {
        let l = view[p];
        l == label::UNASSIGNED
            || neighbours(shape, p, Neighbourhood::Six).any(|n| {
                let m = view[n];
                m != label::UNASSIGNED && m < l
            })
    });
    let closed = filters::close(zero.view(), &filters::ball_offsets(radius), progress)?;
    Zip::from(labels).and(&closed).for_each(|l, &c| {
        if c {
            *l = label::UNASSIGNED;
        }
    });
    Ok(())
}

/// 细胞分割.
///
/// 若 `debug_path` 非空, 中间结果被写入该压缩归档 (`normalized`, `hessian/l1`,
/// `hessian/v1`, `marker`, `L` 等). 写入失败只记录日志; 失败或取消时归档被删除.
///
/// # 返回值
///
/// 与输入同形状的标签体数据, 背景为 1, 细胞边界 (若加粗) 为 0.
pub fn segment_cells(
    input: &IntensityVolume,
    params: &SegmentParams,
    debug_path: Option<&Path>,
    progress: Progress,
) -> Result<Segmentation, SegmentError> {
    validate(input, params, progress)?;
    let mut debug = DebugArchive::create_or_log(debug_path);
    let ret = run(input, params, debug.as_mut(), progress);
    if let Some(d) = debug {
        if ret.is_ok() {
            d.finish_or_log();
        } else {
            d.discard();
        }
    }
    ret
}

/// 与 [`segment_cells`] 相同, 但把中间结果写入调用方持有的归档, 由调用方决定
/// 关闭还是删除它.
pub(crate) fn segment_cells_into(
    input: &IntensityVolume,
    params: &SegmentParams,
    debug: Option<&mut DebugArchive>,
    progress: Progress,
) -> Result<Segmentation, SegmentError> {
    validate(input, params, progress)?;
    run(input, params, debug, progress)
}

fn validate(
    input: &IntensityVolume,
    params: &SegmentParams,
    progress: Progress,
) -> Result<(), SegmentError> {
    params.check()?;
    if input.size() == 0 {
        return Err(SegmentError::EmptyVolume);
    }
    progress::check(progress)?;
    Ok(())
}

fn run(
    input: &IntensityVolume,
    params: &SegmentParams,
    mut debug: Option<&mut DebugArchive>,
    progress: Progress,
) -> Result<Segmentation, SegmentError> {
    let es_in = input.element_size_um();
    let iso = [params.processing_element_size_um; 3];
    let stages = params.stages();
    let mut schedule = stages.schedule(progress);
    log::info!(
        "segmenting {:?} voxels at {:?} µm, processing at {} µm",
        input.shape(),
        es_in,
        params.processing_element_size_um
    );

    let mut data = input.data().to_owned();

    if params.gamma != 1.0 {
        let s = schedule.enter(GAMMA)?;
        filters::gamma_correct(&mut data, params.gamma, s.progress())?;
        s.done()?;
    }

    if params.normalization != NormalizationType::None {
        let s = schedule.enter(NORMALIZE)?;
        filters::normalize(&mut data, params.normalization);
        s.done()?;
    }

    if params.median_half_width > 0 {
        let s = schedule.enter(MEDIAN)?;
        data = filters::median_filter(data.view(), params.median_half_width, s.progress())?;
        s.done()?;
    }

    {
        let s = schedule.enter(RESCALE)?;
        data = filters::rescale_linear(data.view(), es_in, iso, s.progress())?;
        s.done()?;
    }
    log::debug!("processing grid {:?}", data.dim());

    if params.variance_sigma_um > 0.0 {
        let s = schedule.enter(VARIANCE)?;
        data = filters::variance_normalize(
            &data,
            iso,
            params.variance_sigma_um,
            params.variance_epsilon,
            s.progress(),
        )?;
        s.done()?;
    }
    if let Some(d) = debug.as_deref_mut() {
        d.write_or_log("normalized", &data, iso);
    }

    if params.diffusion_iterations > 0 {
        let s = schedule.enter(DIFFUSION)?;
        filters::anisotropic_diffusion(
            &mut data,
            iso,
            params.diffusion_kappa,
            params.diffusion_iterations,
            s.progress(),
        )?;
        s.done()?;
    }

    let smoothed = {
        let s = schedule.enter(SMOOTH)?;
        let r = filters::gaussian_smooth(data.view(), iso, params.hessian_sigma_um, s.progress())?;
        s.done()?;
        r
    };
    drop(data);

    let hessian = {
        let s = schedule.enter(HESSIAN)?;
        let r = filters::hessian_eigen(smoothed.view(), iso, s.progress())?;
        s.done()?;
        r
    };
    drop(smoothed);
    if let Some(d) = debug.as_deref_mut() {
        d.write_or_log("hessian/l1", &hessian.l1, iso);
        d.write_or_log("hessian/v1", &hessian.v1, iso);
    }

    let marker = {
        let s = schedule.enter(RIDGE)?;
        let v1_z = hessian.v1.index_axis(ndarray::Axis(3), 0);
        let r = interior_markers(
            hessian.l1.view(),
            v1_z,
            params.ridge_threshold,
            params.z_compensation,
        );
        s.done()?;
        r
    };
    if let Some(d) = debug.as_deref_mut() {
        d.write_or_log("marker", &marker.mapv(u8::from), iso);
    }

    let mut labels = {
        let s = schedule.enter(COMPONENTS)?;
        let c = filters::label_components(marker.view(), Neighbourhood::TwentySix, s.progress())?;
        log::debug!("{} interior markers", c.len());
        s.done()?;
        c.labels
    };
    drop(marker);

    let cost = hessian.l1.mapv(|l| -l);
    drop(hessian);
    {
        let s = schedule.enter(WATERSHED)?;
        filters::seeded_watershed(cost.view(), &mut labels, None, s.progress())?;
        s.done()?;
    }

    {
        let s = schedule.enter(SMALL)?;
        let voxel = iso.iter().product::<f64>();
        let min_voxels = (params.min_segment_volume_um3 / voxel).ceil() as usize;
        let removed = remove_small(&mut labels, min_voxels);
        if removed > 0 {
            log::debug!("merging {removed} segments below {min_voxels} voxels");
            filters::seeded_watershed(cost.view(), &mut labels, None, s.progress())?;
        }
        s.done()?;
    }
    drop(cost);

    {
        let s = schedule.enter(BACKGROUND)?;
        let n = normalize_background(&mut labels);
        log::info!("{n} segments including background");
        s.done()?;
    }

    if params.boundary_thickening > 0 {
        let s = schedule.enter(THICKEN)?;
        thicken_boundaries(&mut labels, params.boundary_thickening, s.progress())?;
        s.done()?;
    }
    if let Some(d) = debug.as_deref_mut() {
        d.write_or_log("L", &labels, iso);
    }

    let labels = {
        let s = schedule.enter(RESAMPLE)?;
        let r = filters::rescale_nearest(labels.view(), iso, input.shape(), es_in, s.progress())?;
        s.done()?;
        r
    };

    schedule.finish()?;

    Ok(input.with_data(labels))
}
