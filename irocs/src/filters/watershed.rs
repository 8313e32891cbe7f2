//! 带种子的分水岭.

use binary_heap_plus::BinaryHeap;
use ndarray::{Array3, ArrayView3};

use crate::data::{neighbours, Neighbourhood};
use crate::error::Cancelled;
use crate::progress::{Progress, Ticker};
use crate::Idx3d;

/// 优先队列元素: `(代价, 入队序号, 位置, 标签)`.
type Entry = (f64, u64, Idx3d, i32);

/// 以 `labels` 中非零体素为种子, 在代价曲面 `cost` 上做分水岭淹没.
///
/// 代价低者先被淹没, 代价相同时先入队者优先, 因此结果与并行度无关.
/// 所有可达的零标签体素都会被分配到某个种子的标签, 不生成分水岭线.
/// 若给出 `mask`, 只有掩码为真的体素可以被淹没.
pub fn seeded_watershed(
    cost: ArrayView3<f64>,
    labels: &mut Array3<i32>,
    mask: Option<ArrayView3<bool>>,
    progress: Progress,
) -> Result<(), Cancelled> {
    assert_eq!(cost.dim(), labels.dim(), "代价曲面与标签形状不一致");
    let shape = labels.dim();
    let floodable = |p: Idx3d, labels: &Array3<i32>| {
        labels[p] == 0 && mask.as_ref().map_or(true, |m| m[p])
    };
    let unlabelled = labels
        .indexed_iter()
        .filter(|(p, _)| floodable(*p, labels))
        .count();
    let ticker = Ticker::new(progress, unlabelled);

    // 堆顶代价最小, 其次序号最小.
    let mut heap: BinaryHeap<Entry, _> =
        BinaryHeap::new_by(|a: &Entry, b: &Entry| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
    let mut order = 0u64;

    for (p, &l) in labels.indexed_iter() {
        if l == 0 {
            continue;
        }
        for n in neighbours(shape, p, Neighbourhood::Six) {
            if floodable(n, labels) {
                heap.push((cost[n], order, n, l));
                order += 1;
            }
        }
    }

    while let Some((_, _, p, l)) = heap.pop() {
        if labels[p] != 0 {
            continue;
        }
        labels[p] = l;
        ticker.tick(1)?;
        for n in neighbours(shape, p, Neighbourhood::Six) {
            if floodable(n, labels) {
                heap.push((cost[n], order, n, l));
                order += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_basins_meet_at_ridge() {
        // 沿 x 的代价: 中间 (x = 5) 是高岭.
        let cost = Array3::from_shape_fn((1, 1, 11), |(_, _, x)| -((x as f64 - 5.0).abs()));
        let mut labels = Array3::<i32>::zeros((1, 1, 11));
        labels[(0, 0, 0)] = 1;
        labels[(0, 0, 10)] = 2;
        seeded_watershed(cost.view(), &mut labels, None, None).unwrap();
        let row: Vec<i32> = labels.iter().copied().collect();
        assert_eq!(&row[..5], &[1; 5]);
        assert_eq!(&row[6..], &[2; 5]);
        assert_ne!(row[5], 0);
    }

    #[test]
    fn test_mask_limits_flooding() {
        let cost = Array3::<f64>::zeros((1, 1, 5));
        let mask = Array3::from_shape_fn((1, 1, 5), |(_, _, x)| x != 2);
        let mut labels = Array3::<i32>::zeros((1, 1, 5));
        labels[(0, 0, 0)] = 7;
        seeded_watershed(cost.view(), &mut labels, Some(mask.view()), None).unwrap();
        assert_eq!(labels.as_slice().unwrap(), &[7, 7, 0, 0, 0]);
    }
}
