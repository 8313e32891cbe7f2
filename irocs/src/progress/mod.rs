//! 进度报告与协作式取消.
//!
//! 所有长时间运行的例程都接受一个可空的 [`Progress`] 参数, 并在体素循环中至少每 1%
//! 的工作量检查一次取消标记. 当报告器为 `None` 时, 例程的行为与有报告器时完全一致
//! (只是不显示进度).

mod stage;
mod state;
mod ticker;
mod worker;

use crate::error::Cancelled;

pub use stage::{StageGuard, StageList, StageSchedule};
pub use state::{ProgressEvent, ProgressState};
pub use ticker::Ticker;
pub use worker::Worker;

/// 进度报告器.
///
/// 实现者必须自行保证内部状态的同步 (所有方法都只借用 `&self`),
/// 因为并行体素循环会从多个线程同时调用它.
pub trait ProgressReporter: Send + Sync {
    /// 设置整个进度条的下界.
    fn set_progress_min(&self, value: i32);

    /// 设置整个进度条的上界.
    fn set_progress_max(&self, value: i32);

    /// 整个进度条的下界.
    fn progress_min(&self) -> i32;

    /// 整个进度条的上界.
    fn progress_max(&self) -> i32;

    /// 设置当前任务可以汇报的子区间下界.
    fn set_task_progress_min(&self, value: i32);

    /// 设置当前任务可以汇报的子区间上界.
    fn set_task_progress_max(&self, value: i32);

    /// 当前任务子区间下界.
    fn task_progress_min(&self) -> i32;

    /// 当前任务子区间上界.
    fn task_progress_max(&self) -> i32;

    /// 汇报进度. 返回 `false` 表示调用方应当中止.
    fn update_progress(&self, value: i32) -> bool;

    /// 汇报当前阶段信息. 返回 `false` 表示调用方应当中止.
    fn update_progress_message(&self, message: &str) -> bool;

    /// 是否已经请求中止?
    fn is_aborted(&self) -> bool;

    /// 请求中止.
    fn abort(&self);

    /// 以错误信息请求中止.
    fn abort_with_error(&self, message: &str);
}

/// 可空的进度报告器引用.
pub type Progress<'a> = Option<&'a dyn ProgressReporter>;

/// 是否已经请求中止. 报告器为空时永远返回 `false`.
#[inline]
pub fn is_aborted(progress: Progress) -> bool {
    progress.is_some_and(|p| p.is_aborted())
}

/// 检查取消标记.
#[inline]
pub fn check(progress: Progress) -> Result<(), Cancelled> {
    if is_aborted(progress) {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

/// 汇报阶段信息, 并把 `false` 返回值转换为 [`Cancelled`].
#[inline]
pub fn message(progress: Progress, msg: &str) -> Result<(), Cancelled> {
    match progress {
        Some(p) if !p.update_progress_message(msg) => Err(Cancelled),
        _ => Ok(()),
    }
}

/// 汇报进度, 并把 `false` 返回值转换为 [`Cancelled`].
#[inline]
pub fn update(progress: Progress, value: i32) -> Result<(), Cancelled> {
    match progress {
        Some(p) if !p.update_progress(value) => Err(Cancelled),
        _ => Ok(()),
    }
}

/// 当前任务子区间. 报告器为空时返回 `(0, 100)`.
#[inline]
pub fn task_range(progress: Progress) -> (i32, i32) {
    progress.map_or((0, 100), |p| (p.task_progress_min(), p.task_progress_max()))
}

/// 以错误信息中止. 报告器为空时仅记录日志.
pub fn abort_with_error(progress: Progress, msg: &str) {
    log::error!("{msg}");
    if let Some(p) = progress {
        p.abort_with_error(msg);
    }
}
