//! 单个后台工作线程.

use super::{ProgressEvent, ProgressReporter, ProgressState};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 运行一个编排函数的后台线程句柄.
///
/// 界面一侧通过 [`Worker::events`] 接收进度事件, 通过 [`Worker::cancel`] 请求取消,
/// 并通过 [`Worker::join`] 取回结果. 不需要轮询线程是否仍在运行.
#[derive(Debug)]
pub struct Worker<T> {
    handle: JoinHandle<T>,
    state: Arc<ProgressState>,
    events: Receiver<ProgressEvent>,
}

impl<T: Send + 'static> Worker<T> {
    /// 启动线程. `f` 接收共享的进度状态, 应将其作为报告器传给编排函数.
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce(&ProgressState) -> T + Send + 'static,
    {
        let (state, events) = ProgressState::with_events();
        let state = Arc::new(state);
        let shared = Arc::clone(&state);
        let handle = thread::spawn(move || f(&shared));
        Self {
            handle,
            state,
            events,
        }
    }
}

impl<T> Worker<T> {
    /// 共享进度状态.
    #[inline]
    pub fn progress(&self) -> &ProgressState {
        &self.state
    }

    /// 进度事件接收端.
    #[inline]
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    /// 请求取消.
    #[inline]
    pub fn cancel(&self) {
        self.state.abort();
    }

    /// 线程是否已经结束?
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 等待线程结束并取回结果. 线程 panic 时返回 `Err`.
    pub fn join(self) -> thread::Result<T> {
        self.handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_worker_reports_and_joins() {
        let worker = Worker::spawn(|p| {
            p.update_progress_message("working");
            p.update_progress(42);
            7
        });
        assert_eq!(worker.join().unwrap(), 7);
    }

    #[test]
    fn test_worker_cancel() {
        let worker = Worker::spawn(|p| {
            while !p.is_aborted() {
                thread::sleep(Duration::from_millis(1));
            }
            p.update_progress(1)
        });
        worker.cancel();
        let events = worker.events().clone();
        assert!(!worker.join().unwrap());
        assert!(events
            .try_iter()
            .any(|e| matches!(e, ProgressEvent::Aborted(None))));
    }
}
