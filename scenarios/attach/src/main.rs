//! 在合成数据上运行三个 iRoCS 拟合场景, 并打印结果.
//!
//! 设置环境变量 `$IROCS_DEBUG_DIR` 可以把场景 A 的调试中间结果写入该目录.

mod cases;
mod result;
mod runner;

fn main() {
    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
    {
        eprintln!("cannot install logger: {e}");
    }
    println!("{} cpus available", utils::cpus());
    runner::run().analyze();
}
