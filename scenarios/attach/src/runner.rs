//! 程序运行函数.

use crate::result::ScenarioResult;
use std::thread;

/// 实际运行.
pub fn run() -> ScenarioResult {
    let debug_dir = utils::debug_dir_from_env();
    if let Some(d) = &debug_dir {
        assert!(d.is_dir(), "{} is not a directory", d.display());
    }
    let debug_dir = debug_dir.as_deref();

    println!("Running scenarios...");
    thread::scope(|s| {
        use super::cases::*;

        let a = s.spawn(move || cylinder(debug_dir));
        let b = s.spawn(helix);
        let c = s.spawn(empty);

        ScenarioResult::from_iter(
            ["A: cylinder shell", "B: helix nuclei", "C: empty segmentation"]
                .into_iter()
                .zip(
                    [a, b, c]
                        .into_iter()
                        .map(|th| th.join().expect("Thread joining error")),
                ),
        )
    })
}
