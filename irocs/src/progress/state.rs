//! 线程安全的进度状态, 同时充当取消令牌.

use super::ProgressReporter;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};

/// 工作线程向界面一侧发送的进度事件.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// 新的进度值.
    Progress(i32),

    /// 新的阶段信息.
    Message(String),

    /// 任务被中止. 若由错误引起则携带错误信息.
    Aborted(Option<String>),
}

/// [`ProgressReporter`] 的参考实现.
///
/// 所有数值状态均为原子变量, 文本状态由互斥锁保护. 若通过
/// [`ProgressState::with_events`] 构建, 每次状态变化都会额外发送一个
/// [`ProgressEvent`], 界面可以据此刷新而无需轮询线程状态.
#[derive(Debug)]
pub struct ProgressState {
    min: AtomicI32,
    max: AtomicI32,
    task_min: AtomicI32,
    task_max: AtomicI32,
    value: AtomicI32,
    aborted: AtomicBool,
    message: Mutex<String>,
    error: Mutex<Option<String>>,
    events: Option<Sender<ProgressEvent>>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressState {
    /// 初始化. 进度区间和任务区间均为 `[0, 100]`.
    pub fn new() -> Self {
        Self {
            min: AtomicI32::new(0),
            max: AtomicI32::new(100),
            task_min: AtomicI32::new(0),
            task_max: AtomicI32::new(100),
            value: AtomicI32::new(0),
            aborted: AtomicBool::new(false),
            message: Mutex::new(String::new()),
            error: Mutex::new(None),
            events: None,
        }
    }

    /// 初始化, 并返回接收进度事件的通道.
    pub fn with_events() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = unbounded();
        let mut state = Self::new();
        state.events = Some(tx);
        (state, rx)
    }

    /// 最近一次汇报的进度值.
    #[inline]
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    /// 最近一次汇报的阶段信息.
    pub fn message(&self) -> String {
        self.message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 中止时携带的错误信息 (若有).
    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[inline]
    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            // 接收方已经关闭时静默丢弃.
            let _ = tx.send(event);
        }
    }
}

impl ProgressReporter for ProgressState {
    #[inline]
    fn set_progress_min(&self, value: i32) {
        self.min.store(value, Ordering::Release);
    }

    #[inline]
    fn set_progress_max(&self, value: i32) {
        self.max.store(value, Ordering::Release);
    }

    #[inline]
    fn progress_min(&self) -> i32 {
        self.min.load(Ordering::Acquire)
    }

    #[inline]
    fn progress_max(&self) -> i32 {
        self.max.load(Ordering::Acquire)
    }

    #[inline]
    fn set_task_progress_min(&self, value: i32) {
        self.task_min.store(value, Ordering::Release);
    }

    #[inline]
    fn set_task_progress_max(&self, value: i32) {
        self.task_max.store(value, Ordering::Release);
    }

    #[inline]
    fn task_progress_min(&self) -> i32 {
        self.task_min.load(Ordering::Acquire)
    }

    #[inline]
    fn task_progress_max(&self) -> i32 {
        self.task_max.load(Ordering::Acquire)
    }

    fn update_progress(&self, value: i32) -> bool {
        self.value.store(value, Ordering::Release);
        self.send(ProgressEvent::Progress(value));
        !self.is_aborted()
    }

    fn update_progress_message(&self, message: &str) -> bool {
        {
            let mut guard = self.message.lock().unwrap_or_else(PoisonError::into_inner);
            guard.clear();
            guard.push_str(message);
        }
        self.send(ProgressEvent::Message(message.to_owned()));
        !self.is_aborted()
    }

    #[inline]
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            self.send(ProgressEvent::Aborted(None));
        }
    }

    fn abort_with_error(&self, message: &str) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_owned());
        if !self.aborted.swap(true, Ordering::AcqRel) {
            self.send(ProgressEvent::Aborted(Some(message.to_owned())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_sticky_and_reported_once() {
        let (state, rx) = ProgressState::with_events();
        assert!(state.update_progress(3));
        state.abort_with_error("boom");
        state.abort();
        assert!(!state.update_progress(4));
        assert!(!state.update_progress_message("late"));
        assert_eq!(state.error().as_deref(), Some("boom"));

        let events: Vec<_> = rx.try_iter().collect();
        let aborts = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Aborted(_)))
            .count();
        assert_eq!(aborts, 1);
        assert_eq!(events[0], ProgressEvent::Progress(3));
    }
}
