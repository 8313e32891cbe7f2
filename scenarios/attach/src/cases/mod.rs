//! 三个合成场景.

use irocs::AttachError;
use std::time::{Duration, Instant};

mod cylinder;
mod empty;
mod helix;

pub use cylinder::cylinder;
pub use empty::empty;
pub use helix::helix;

/// 单个场景的运行记录.
pub struct Outcome {
    /// 期望结果的文字描述.
    pub expected: &'static str,

    /// 成功时为结果摘要.
    pub result: Result<String, AttachError>,

    /// 收到的进度事件个数.
    pub events: usize,

    /// 墙钟耗时.
    pub elapsed: Duration,
}

/// 计时运行 `f`.
fn timed<F>(expected: &'static str, f: F) -> Outcome
where
    F: FnOnce() -> (Result<String, AttachError>, usize),
{
    let start = Instant::now();
    let (result, events) = f();
    Outcome {
        expected,
        result,
        events,
        elapsed: start.elapsed(),
    }
}
