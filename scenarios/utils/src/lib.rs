//! 场景实验依赖的通用组件.

use std::env;
use std::path::PathBuf;

use irocs::prelude::*;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 简单分隔线.
#[inline]
pub fn sep_to<W: std::io::Write>(mut w: W) -> std::io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 获取调试输出目录.
///
/// 1. 若环境变量 `$IROCS_DEBUG_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `None`, 即不写调试输出.
pub fn debug_dir_from_env() -> Option<PathBuf> {
    env::var_os("IROCS_DEBUG_DIR")
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
}

/// 把进度事件格式化为一行文字.
pub fn describe_event(e: &ProgressEvent) -> String {
    match e {
        ProgressEvent::Progress(v) => format!("{v:>3}%"),
        ProgressEvent::Message(m) => format!("---- {m}"),
        ProgressEvent::Aborted(None) => "aborted".to_owned(),
        ProgressEvent::Aborted(Some(e)) => format!("aborted: {e}"),
    }
}
