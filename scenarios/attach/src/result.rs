//! 场景结果.

use crate::cases::Outcome;
use std::io::{self, Write};

/// 将 `outcome` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, o: &Outcome, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Scenario `{name}`:")?;
    writeln!(w, "{S4}Expected: {}", o.expected)?;
    match &o.result {
        Ok(summary) => writeln!(w, "{S4}Succeeded: {summary}")?,
        Err(e) => writeln!(w, "{S4}Failed: {e}")?,
    }
    writeln!(w, "{S4}Progress events: {}", o.events)?;
    write!(w, "{S4}Wall time: {} ms", o.elapsed.as_millis())?;
    Ok(())
}

/// 所有场景的最终结果.
pub struct ScenarioResult {
    data: Vec<(&'static str, Outcome)>,
}

impl ScenarioResult {
    pub fn from_iter<I: IntoIterator<Item = (&'static str, Outcome)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 打印运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (key, outcome) in self.data.iter() {
            if let Err(e) = describe_into(key, outcome, &mut buf) {
                log::error!("cannot describe scenario `{key}`: {e}");
            }
            println!("{}", String::from_utf8_lossy(&buf));
            buf.clear();

            utils::sep();
        }
    }
}
