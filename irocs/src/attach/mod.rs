//! iRoCS 编排函数.
//!
//! 编排函数把参数检查, (可选的) 细胞分割, 点云提取, 拟合, (可选的) 逐体素坐标计算和
//! 调试输出串联起来, 并按照带权重的阶段列表分配进度区间. 所有编排函数:
//!
//! 1. 先检查参数, 参数非法时不触碰任何数据;
//! 2. 在局部副本上拟合, 只有成功时才替换调用方的模型;
//! 3. 在边界捕获 panic, 转换为 [`AttachError::Unexpected`] 并以错误信息中止报告器.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use ndarray::Array3;

use crate::data::VolumeAttr;
use crate::error::{AttachError, Cancelled};
use crate::filters::try_for_each_slice_mut;
use crate::progress::{self, Progress, Ticker};
use crate::sct::ShellCoordinateTransform;

mod markers;
mod segmentation;

pub use markers::{attach_irocs_to_marker_set, attach_irocs_to_markers};
pub use segmentation::{
    attach_irocs_to_raw_volume, attach_irocs_to_segmentation, SegmentationAttachParams,
};

/// 编排函数的状态.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttachState {
    /// 尚未开始.
    NotStarted,

    /// 检查参数.
    Validating,

    /// 从原始强度体数据分割细胞.
    Segmenting,

    /// 提取点云 (外壳或表皮细胞核).
    ExtractingPoints,

    /// 拟合根轴.
    Fitting,

    /// 计算逐体素 (或逐细胞核) 坐标.
    ComputingDenseCoordinates,

    /// 写入调试输出.
    PersistingDebugOutput,

    /// 成功完成.
    Done,

    /// 被用户取消.
    Aborted,

    /// 失败.
    Failed,
}

impl AttachState {
    /// 是否为终止状态?
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Failed)
    }
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Validating => "validating",
            Self::Segmenting => "segmenting",
            Self::ExtractingPoints => "extracting points",
            Self::Fitting => "fitting",
            Self::ComputingDenseCoordinates => "computing dense coordinates",
            Self::PersistingDebugOutput => "persisting debug output",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 记录状态转换.
#[derive(Clone, Debug)]
pub struct StateTracker {
    history: Vec<AttachState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            history: vec![AttachState::NotStarted],
        }
    }
}

impl StateTracker {
    /// 初始状态为 [`AttachState::NotStarted`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前状态.
    #[inline]
    pub fn state(&self) -> AttachState {
        self.history.last().copied().unwrap_or(AttachState::NotStarted)
    }

    /// 经历过的所有状态.
    #[inline]
    pub fn history(&self) -> &[AttachState] {
        &self.history
    }

    /// 转换到 `next`. 终止状态之后的转换被忽略.
    pub fn enter(&mut self, next: AttachState) {
        let prev = self.state();
        if prev.is_terminal() {
            log::warn!("ignoring transition {prev} -> {next}");
            return;
        }
        log::info!("attach: {prev} -> {next}");
        self.history.push(next);
    }

    /// 按照结果转换到终止状态.
    pub fn settle<T>(&mut self, result: &Result<T, AttachError>) {
        self.enter(match result {
            Ok(_) => AttachState::Done,
            Err(AttachError::Cancelled) => AttachState::Aborted,
            Err(_) => AttachState::Failed,
        });
    }
}

/// 逐体素根坐标.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinateVolumes {
    /// 沿根轴到 QC 的弧长 (µm).
    pub l: Array3<f64>,

    /// 以截面半径归一化的径向距离.
    pub r: Array3<f64>,

    /// 绕根轴的角度 (弧度).
    pub p: Array3<f64>,
}

/// 对体数据中每个体素计算 (归一化半径的) 根坐标.
///
/// 模型未拟合时所有坐标为 NaN.
pub fn dense_coordinates<V: VolumeAttr + Sync>(
    volume: &V,
    sct: &ShellCoordinateTransform,
    progress: Progress,
) -> Result<CoordinateVolumes, Cancelled> {
    let shape = volume.shape();
    let mut out = Array3::from_elem(shape, [f64::NAN; 3]);
    let ticker = Ticker::new(progress, volume.size());
    try_for_each_slice_mut(&mut out, |z, mut slice| {
        for ((y, x), v) in slice.indexed_iter_mut() {
            let pos = volume.position_um((z, y, x));
            if let Some(c) = sct.get_coordinates_with_normalized_radius(&pos) {
                *v = [c.l, c.r, c.phi];
            }
        }
        ticker.tick(shape.1 * shape.2)
    })?;
    Ok(CoordinateVolumes {
        l: out.mapv(|v| v[0]),
        r: out.mapv(|v| v[1]),
        p: out.mapv(|v| v[2]),
    })
}

/// 在 panic 边界内运行 `f`.
///
/// 返回 [`AttachError::Cancelled`] 以外的错误时记录日志;
/// panic 被转换为 [`AttachError::Unexpected`], 并以错误信息中止报告器.
pub(crate) fn guarded<T, F>(tracker: &mut StateTracker, progress: Progress, f: F) -> Result<T, AttachError>
where
    F: FnOnce(&mut StateTracker) -> Result<T, AttachError>,
{
    let ret = match panic::catch_unwind(AssertUnwindSafe(|| f(tracker))) {
        Ok(r) => r,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            let e = AttachError::Unexpected(msg);
            progress::abort_with_error(progress, &e.to_string());
            Err(e)
        }
    };
    match &ret {
        Err(AttachError::Cancelled) => log::info!("attach cancelled"),
        Err(AttachError::Unexpected(_)) => {}
        Err(e) => log::error!("attach failed: {e}"),
        Ok(_) => {}
    }
    tracker.settle(&ret);
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::EnergyWeights;
    use crate::data::Segmentation;
    use crate::progress::ProgressState;
    use crate::progress::ProgressReporter;
    use crate::sct::ShellFitParams;
    use crate::Vec3;

    #[test]
    fn test_tracker_stops_at_terminal_state() {
        let mut t = StateTracker::new();
        t.enter(AttachState::Validating);
        t.settle::<()>(&Err(AttachError::Cancelled));
        t.enter(AttachState::Fitting);
        assert_eq!(
            t.history(),
            &[
                AttachState::NotStarted,
                AttachState::Validating,
                AttachState::Aborted
            ]
        );
        assert_eq!(t.state().to_string(), "aborted");
    }

    #[test]
    fn test_panic_becomes_unexpected_error() {
        let state = ProgressState::new();
        let mut t = StateTracker::new();
        let r: Result<(), _> = guarded(&mut t, Some(&state), |t| {
            t.enter(AttachState::Fitting);
            panic!("singular matrix");
        });
        assert_eq!(r, Err(AttachError::Unexpected("singular matrix".to_owned())));
        assert_eq!(t.state(), AttachState::Failed);
        assert!(state.is_aborted());
        assert!(state.error().is_some_and(|e| e.contains("singular matrix")));
    }

    #[test]
    fn test_dense_coordinates() {
        let seg = Segmentation::filled((12, 6, 6), 1, [1.0; 3]).unwrap();
        let unfitted = ShellCoordinateTransform::new();
        let c = dense_coordinates(&seg, &unfitted, None).unwrap();
        assert!(c.l.iter().all(|v| v.is_nan()));

        let mut points = vec![];
        for z in 0..12 {
            for j in 0..12 {
                let t = std::f64::consts::TAU * j as f64 / 12.0;
                points.push(Vec3::new(z as f64, 3.0 + 2.0 * t.cos(), 3.0 + 2.0 * t.sin()));
            }
        }
        let mut sct = ShellCoordinateTransform::new();
        sct.set_optimization(EnergyWeights::default(), 0.5, 100).unwrap();
        let params = ShellFitParams {
            segment_length_um: 4.0,
            qc_um: Some(Vec3::new(0.0, 3.0, 3.0)),
            ..Default::default()
        };
        sct.fit_model(&points, &params, None).unwrap();
        let c = dense_coordinates(&seg, &sct, None).unwrap();
        assert!((c.l[(7, 3, 3)] - 7.0).abs() < 0.1);
        assert!(c.r[(7, 3, 3)] < 0.05);
        assert!((c.r[(7, 3, 5)] - 1.0).abs() < 0.05);
    }
}
