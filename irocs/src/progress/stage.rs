//! 带权重的阶段列表.
//!
//! 编排函数先构建一个 `(阶段名, 预估代价)` 列表, 将累积代价线性映射到报告器的
//! 任务区间, 然后依次进入每个阶段. 每个阶段持有一个 [`StageGuard`], 它把报告器的
//! 任务区间收窄为该阶段的子区间, 并在析构时恢复原区间.

use super::Progress;
use crate::error::Cancelled;

#[derive(Clone, Debug)]
struct Stage {
    name: String,
    cost: f64,
}

/// 阶段列表构建器.
#[derive(Clone, Debug, Default)]
pub struct StageList {
    stages: Vec<Stage>,
}

impl StageList {
    /// 空列表.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个阶段. 代价为非负的相对单位, 非有限值或负值按 0 处理.
    pub fn push(&mut self, name: impl Into<String>, cost: f64) -> &mut Self {
        let cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };
        self.stages.push(Stage {
            name: name.into(),
            cost,
        });
        self
    }

    /// 仅当 `cond` 为 `true` 时追加阶段. 用于可选阶段 (例如调试输出).
    #[inline]
    pub fn push_if(&mut self, cond: bool, name: impl Into<String>, cost: f64) -> &mut Self {
        if cond {
            self.push(name, cost);
        }
        self
    }

    /// 阶段个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// 是否没有任何阶段?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 总代价.
    #[inline]
    pub fn total_cost(&self) -> f64 {
        self.stages.iter().map(|s| s.cost).sum()
    }

    /// 将累积代价映射到 `[min, max]`.
    ///
    /// # 返回值
    ///
    /// 长度为 `len() + 1` 的单调不减序列. 首元素为 `min`, 尾元素为 `max`.
    /// 当总代价为 0 时, 所有阶段平分区间.
    pub fn boundaries(&self, min: i32, max: i32) -> Vec<i32> {
        let n = self.stages.len();
        let total = self.total_cost();
        let span = (max - min) as f64;
        let mut acc = 0.0;
        let mut ret = Vec::with_capacity(n + 1);
        ret.push(min);
        for (i, s) in self.stages.iter().enumerate() {
            acc += if total > 0.0 { s.cost } else { 1.0 };
            let denom = if total > 0.0 { total } else { n as f64 };
            let b = if i + 1 == n {
                max
            } else {
                min + (span * acc / denom).round() as i32
            };
            ret.push(b.clamp(min, max));
        }
        ret
    }

    /// 按照报告器当前的任务区间生成阶段调度器. 报告器为空时使用 `[0, 100]`.
    pub fn schedule<'a>(&self, progress: Progress<'a>) -> StageSchedule<'a> {
        let outer = super::task_range(progress);
        StageSchedule {
            progress,
            names: self.stages.iter().map(|s| s.name.clone()).collect(),
            bounds: self.boundaries(outer.0, outer.1),
            next: 0,
            outer,
        }
    }
}

/// 按顺序遍历阶段列表.
pub struct StageSchedule<'a> {
    progress: Progress<'a>,
    names: Vec<String>,
    bounds: Vec<i32>,
    next: usize,
    outer: (i32, i32),
}

impl<'a> StageSchedule<'a> {
    /// 进入名为 `name` 的阶段.
    ///
    /// 从当前位置向后查找该阶段 (被跳过的阶段视为瞬间完成);
    /// 若找不到, 则进入下一个阶段. 进入时汇报阶段名和子区间起点,
    /// 任一汇报返回 `false` 时返回 [`Cancelled`].
    pub fn enter(&mut self, name: &str) -> Result<StageGuard<'a>, Cancelled> {
        let last = self.names.len().saturating_sub(1);
        let idx = self.names[self.next.min(self.names.len())..]
            .iter()
            .position(|n| n == name)
            .map_or(self.next, |offset| self.next + offset)
            .min(last);
        self.next = idx + 1;

        let range = match (self.bounds.get(idx), self.bounds.get(idx + 1)) {
            (Some(&lo), Some(&hi)) => (lo, hi),
            _ => self.outer,
        };
        log::debug!("entering stage `{name}`, progress range {range:?}");

        if let Some(p) = self.progress {
            p.set_task_progress_min(range.0);
            p.set_task_progress_max(range.1);
        }
        let guard = StageGuard {
            progress: self.progress,
            outer: self.outer,
            range,
        };
        super::message(self.progress, name)?;
        super::update(self.progress, range.0)?;
        Ok(guard)
    }

    /// 所有阶段完成. 汇报外层区间终点.
    pub fn finish(self) -> Result<(), Cancelled> {
        super::update(self.progress, self.outer.1)
    }

    /// 外层任务区间.
    #[inline]
    pub fn outer(&self) -> (i32, i32) {
        self.outer
    }
}

/// 当前阶段. 析构时恢复外层任务区间.
pub struct StageGuard<'a> {
    progress: Progress<'a>,
    outer: (i32, i32),
    range: (i32, i32),
}

impl<'a> StageGuard<'a> {
    /// 进度报告器, 其任务区间已被收窄为本阶段.
    #[inline]
    pub fn progress(&self) -> Progress<'a> {
        self.progress
    }

    /// 本阶段的子区间.
    #[inline]
    pub fn range(&self) -> (i32, i32) {
        self.range
    }

    /// 汇报本阶段完成, 然后释放.
    pub fn done(self) -> Result<(), Cancelled> {
        super::update(self.progress, self.range.1)
    }
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        if let Some(p) = self.progress {
            p.set_task_progress_min(self.outer.0);
            p.set_task_progress_max(self.outer.1);
        }
    }
}
