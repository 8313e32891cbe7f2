//! 基于分割结果的编排函数.

use std::path::Path;

use crate::attach::{dense_coordinates, guarded, AttachState, CoordinateVolumes, StateTracker};
use crate::consts::{label, MIN_SHELL_POINTS};
use crate::data::{DebugArchive, IntensityVolume, Segmentation, VolumeAttr};
use crate::error::{AttachError, ConfigError};
use crate::progress::{Progress, StageList, StageSchedule};
use crate::sct::{ShellCoordinateTransform, ShellFitParams};
use crate::segment::{segment_cells_into, SegmentParams};
use crate::shell::{extract_shell, ShellParams};
use crate::Vec3;

const SEGMENT: &str = "Segmenting cells";
const EXTRACT: &str = "Extracting shell points";
const FIT: &str = "Fitting shell coordinate transform";
const DENSE: &str = "Computing voxel coordinates";
const SAVE: &str = "Saving debug output";

/// 基于分割结果拟合根坐标系的参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SegmentationAttachParams {
    /// 背景标签.
    pub background_label: i32,

    /// 外壳点下采样比例.
    pub down_sample_ratio: usize,

    /// 平滑二值掩码的高斯标准差 (µm).
    pub smoothing_sigma_um: f64,

    /// 控制点间距 (µm).
    pub segment_length_um: f64,

    /// 边界剔除距离 (µm).
    pub margin_um: f64,

    /// 静止中心 (QC) 位置 (µm). 为 `None` 时由点云估计.
    pub qc_um: Option<Vec3>,

    /// 标架方向提示.
    pub x_direction: Option<Vec3>,

    /// 是否计算逐体素坐标. 该步骤很慢.
    pub compute_coordinates: bool,
}

impl Default for SegmentationAttachParams {
    fn default() -> Self {
        Self {
            background_label: label::BACKGROUND,
            down_sample_ratio: 4,
            smoothing_sigma_um: 1.0,
            segment_length_um: 10.0,
            margin_um: 5.0,
            qc_um: None,
            x_direction: None,
            compute_coordinates: false,
        }
    }
}

impl SegmentationAttachParams {
    /// 检查参数合法性.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.shell_params().check()?;
        self.fit_params(None).check()
    }

    fn shell_params(&self) -> ShellParams {
        ShellParams {
            background_label: self.background_label,
            smoothing_sigma_um: self.smoothing_sigma_um,
            down_sample_ratio: self.down_sample_ratio,
        }
    }

    fn fit_params(&self, domain_um: Option<(Vec3, Vec3)>) -> ShellFitParams {
        ShellFitParams {
            segment_length_um: self.segment_length_um,
            margin_um: self.margin_um,
            domain_um,
            qc_um: self.qc_um,
            x_direction: self.x_direction,
        }
    }

    fn stages(&self, segment: bool, debug: bool) -> StageList {
        let mut stages = StageList::new();
        stages
            .push_if(segment, SEGMENT, 40.0)
            .push(EXTRACT, 10.0)
            .push(FIT, 20.0)
            .push_if(self.compute_coordinates, DENSE, 40.0)
            .push_if(debug, SAVE, 1.0);
        stages
    }
}

/// 体数据第一个和最后一个体素中心的物理位置.
fn domain_of<V: VolumeAttr>(volume: &V) -> (Vec3, Vec3) {
    let (z, y, x) = volume.shape();
    let last = (z.saturating_sub(1), y.saturating_sub(1), x.saturating_sub(1));
    (Vec3::zeros(), volume.position_um(last))
}

/// 成功时关闭调试归档, 失败或取消时删除.
fn close_debug<T>(debug: Option<DebugArchive>, ret: &Result<T, AttachError>) {
    if let Some(d) = debug {
        if ret.is_ok() {
            d.finish_or_log();
        } else {
            d.discard();
        }
    }
}

/// 提取点云, 拟合, 计算逐体素坐标, 写入调试输出. 成功时才替换 `sct`.
fn fit_segmentation(
    t: &mut StateTracker,
    schedule: &mut StageSchedule,
    sct: &mut ShellCoordinateTransform,
    segmentation: &Segmentation,
    params: &SegmentationAttachParams,
    debug: &mut Option<DebugArchive>,
) -> Result<Option<CoordinateVolumes>, AttachError> {
    let es = segmentation.element_size_um();

    t.enter(AttachState::ExtractingPoints);
    let s = schedule.enter(EXTRACT)?;
    let points = extract_shell(
        segmentation,
        &params.shell_params(),
        debug.as_mut(),
        s.progress(),
    )?;
    s.done()?;
    if points.len() < MIN_SHELL_POINTS {
        return Err(AttachError::DegeneratePointCloud(points.len(), MIN_SHELL_POINTS));
    }

    t.enter(AttachState::Fitting);
    let s = schedule.enter(FIT)?;
    let mut fitted = sct.clone();
    fitted.fit_model(
        &points,
        &params.fit_params(Some(domain_of(segmentation))),
        s.progress(),
    )?;
    s.done()?;

    let dense = if params.compute_coordinates {
        t.enter(AttachState::ComputingDenseCoordinates);
        let s = schedule.enter(DENSE)?;
        let c = dense_coordinates(segmentation, &fitted, s.progress())?;
        s.done()?;
        Some(c)
    } else {
        None
    };

    if let Some(d) = debug.as_mut() {
        t.enter(AttachState::PersistingDebugOutput);
        let s = schedule.enter(SAVE)?;
        if let Some(c) = &dense {
            d.write_or_log("l", &c.l, es);
            d.write_or_log("r", &c.r, es);
            d.write_or_log("p", &c.p, es);
        }
        s.done()?;
    }

    *sct = fitted;
    Ok(dense)
}

/// 基于分割结果拟合外壳坐标变换.
///
/// 流程: 检查参数 → 提取外壳点云 → 拟合 → (可选) 逐体素坐标 → (可选) 调试输出.
/// 若 `debug_path` 非空, `bw`, `bwL`, `shell` 以及 (若计算了) `l`, `r`, `p`
/// 被写入该归档; 失败或取消时归档被删除.
///
/// # 返回值
///
/// 成功时 `sct` 被替换为新模型; 若 `params.compute_coordinates` 为真, 同时返回逐体素坐标.
/// 失败或取消时 `sct` 保持原状.
pub fn attach_irocs_to_segmentation(
    sct: &mut ShellCoordinateTransform,
    segmentation: &Segmentation,
    params: &SegmentationAttachParams,
    debug_path: Option<&Path>,
    progress: Progress,
) -> Result<Option<CoordinateVolumes>, AttachError> {
    let mut tracker = StateTracker::new();
    run_on_segmentation(&mut tracker, sct, segmentation, params, debug_path, progress)
}

fn run_on_segmentation(
    tracker: &mut StateTracker,
    sct: &mut ShellCoordinateTransform,
    segmentation: &Segmentation,
    params: &SegmentationAttachParams,
    debug_path: Option<&Path>,
    progress: Progress,
) -> Result<Option<CoordinateVolumes>, AttachError> {
    guarded(tracker, progress, |t| {
        t.enter(AttachState::Validating);
        params.check()?;

        let mut debug = DebugArchive::create_or_log(debug_path);
        let mut schedule = params.stages(false, debug.is_some()).schedule(progress);
        let ret = fit_segmentation(t, &mut schedule, sct, segmentation, params, &mut debug)
            .and_then(|dense| {
                schedule.finish()?;
                Ok(dense)
            });
        close_debug(debug, &ret);
        ret
    })
}

fn segment_and_fit(
    t: &mut StateTracker,
    schedule: &mut StageSchedule,
    sct: &mut ShellCoordinateTransform,
    volume: &IntensityVolume,
    segment_params: &SegmentParams,
    params: &SegmentationAttachParams,
    debug: &mut Option<DebugArchive>,
) -> Result<(Segmentation, Option<CoordinateVolumes>), AttachError> {
    t.enter(AttachState::Segmenting);
    let s = schedule.enter(SEGMENT)?;
    let segmentation = segment_cells_into(volume, segment_params, debug.as_mut(), s.progress())?;
    s.done()?;
    let dense = fit_segmentation(t, schedule, sct, &segmentation, params, debug)?;
    Ok((segmentation, dense))
}

/// 先分割原始强度体数据, 再基于分割结果拟合外壳坐标变换.
///
/// 若 `debug_path` 非空, 分割的中间结果 (`hessian/l1`, `marker`, `L` 等) 与外壳数据集
/// 写入同一个归档.
///
/// # 返回值
///
/// `(分割结果, 逐体素坐标)`. 其余同 [`attach_irocs_to_segmentation`].
pub fn attach_irocs_to_raw_volume(
    sct: &mut ShellCoordinateTransform,
    volume: &IntensityVolume,
    segment_params: &SegmentParams,
    params: &SegmentationAttachParams,
    debug_path: Option<&Path>,
    progress: Progress,
) -> Result<(Segmentation, Option<CoordinateVolumes>), AttachError> {
    let mut tracker = StateTracker::new();
    guarded(&mut tracker, progress, |t| {
        t.enter(AttachState::Validating);
        segment_params.check()?;
        params.check()?;

        let mut debug = DebugArchive::create_or_log(debug_path);
        let mut schedule = params.stages(true, debug.is_some()).schedule(progress);
        let ret = segment_and_fit(
            t,
            &mut schedule,
            sct,
            volume,
            segment_params,
            params,
            &mut debug,
        )
        .and_then(|r| {
            schedule.finish()?;
            Ok(r)
        });
        close_debug(debug, &ret);
        ret
    })
}
