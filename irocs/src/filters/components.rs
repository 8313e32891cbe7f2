//! 连通区域标记.

use std::collections::VecDeque;

use ndarray::{Array3, ArrayView3};

use crate::data::{neighbours, Neighbourhood};
use crate::error::Cancelled;
use crate::progress::{Progress, Ticker};

/// 连通区域标记结果.
#[derive(Clone, Debug, PartialEq)]
pub struct Components {
    /// 标签体数据. 0 为背景, 区域按首次遇到的光栅顺序编号为 `1..=sizes.len()`.
    pub labels: Array3<i32>,

    /// 每个区域的体素个数, `sizes[i]` 对应标签 `i + 1`.
    pub sizes: Vec<usize>,
}

impl Components {
    /// 区域个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// 是否没有任何区域?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// 体积最大的区域标签. 体积相同时取编号最小者 (即光栅顺序中最先遇到者).
    #[inline]
    pub fn largest(&self) -> Option<i32> {
        largest_component(&self.sizes)
    }
}

/// 体积最大的区域标签 (`sizes[i]` 对应标签 `i + 1`). 相同体积时取最先出现者.
pub fn largest_component(sizes: &[usize]) -> Option<i32> {
    let mut best: Option<(usize, usize)> = None;
    for (i, &s) in sizes.iter().enumerate() {
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i as i32 + 1)
}

/// 对 `mask` 中的真值体素做连通区域标记.
///
/// 按光栅顺序扫描, 每遇到一个未标记的前景体素就以广度优先搜索填充整个区域.
pub fn label_components(
    mask: ArrayView3<bool>,
    nh: Neighbourhood,
    progress: Progress,
) -> Result<Components, Cancelled> {
    let shape = mask.dim();
    let mut labels = Array3::<i32>::zeros(shape);
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();
    let ticker = Ticker::new(progress, mask.len());
    let row = shape.2.max(1);

    for (i, (pos, &fg)) in mask.indexed_iter().enumerate() {
        if (i + 1) % row == 0 {
            ticker.tick(row)?;
        }
        if !fg || labels[pos] != 0 {
            continue;
        }
        let id = sizes.len() as i32 + 1;
        let mut size = 0usize;
        labels[pos] = id;
        queue.push_back(pos);
        while let Some(p) = queue.pop_front() {
            size += 1;
            for n in neighbours(shape, p, nh) {
                if mask[n] && labels[n] == 0 {
                    labels[n] = id;
                    queue.push_back(n);
                }
            }
        }
        sizes.push(size);
    }
    Ok(Components { labels, sizes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity() {
        // 两个仅共点相邻的体素.
        let mut mask = Array3::from_elem((3, 3, 3), false);
        mask[(0, 0, 0)] = true;
        mask[(1, 1, 1)] = true;
        let six = label_components(mask.view(), Neighbourhood::Six, None).unwrap();
        assert_eq!(six.sizes, vec![1, 1]);
        let all = label_components(mask.view(), Neighbourhood::TwentySix, None).unwrap();
        assert_eq!(all.sizes, vec![2]);
        assert_eq!(all.labels[(1, 1, 1)], 1);
    }

    /// 体积相同时取光栅顺序中最先遇到的区域.
    #[test]
    fn test_largest_tie_break() {
        assert_eq!(largest_component(&[3, 5, 5, 1]), Some(2));
        assert_eq!(largest_component(&[4, 4]), Some(1));
        assert_eq!(largest_component(&[]), None);
    }
}
