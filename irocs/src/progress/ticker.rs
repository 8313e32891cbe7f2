//! 体素循环内使用的节流进度计数器.

use super::Progress;
use crate::error::Cancelled;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// 线程安全的进度计数器.
///
/// 每完成 1% 的工作量 (至少 1 个单位) 向报告器汇报一次, 汇报值映射到构建时
/// 报告器的任务区间内, 并保证单调不减. 每次 [`Ticker::tick`] 都会检查取消标记.
pub struct Ticker<'a> {
    progress: Progress<'a>,
    total: usize,
    step: usize,
    range: (i32, i32),
    count: AtomicUsize,
    last: Mutex<i32>,
}

impl<'a> Ticker<'a> {
    /// 总工作量为 `total` 单位的计数器.
    pub fn new(progress: Progress<'a>, total: usize) -> Self {
        let range = super::task_range(progress);
        Self {
            progress,
            total: total.max(1),
            step: (total / 100).max(1),
            range,
            count: AtomicUsize::new(0),
            last: Mutex::new(range.0),
        }
    }

    /// 完成了 `n` 个单位. 若已请求取消, 则返回 [`Cancelled`].
    pub fn tick(&self, n: usize) -> Result<(), Cancelled> {
        let Some(p) = self.progress else {
            return Ok(());
        };
        if p.is_aborted() {
            return Err(Cancelled);
        }
        let before = self.count.fetch_add(n, Ordering::AcqRel);
        let after = before + n;
        if before / self.step == after / self.step && after < self.total {
            return Ok(());
        }

        let done = self.count.load(Ordering::Acquire).min(self.total);
        let (lo, hi) = self.range;
        let value = lo + ((hi - lo) as f64 * done as f64 / self.total as f64).floor() as i32;
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if value > *last {
            *last = value;
            if !p.update_progress(value) {
                return Err(Cancelled);
            }
        }
        Ok(())
    }

    /// 已完成的单位数.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}
