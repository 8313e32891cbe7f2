//! 二值形态学操作.

use ndarray::{Array3, ArrayView3};

use super::{shifted, try_for_each_slice_mut};
use crate::error::Cancelled;
use crate::progress::{Progress, Ticker};

/// 半径为 `radius` 体素的球形结构元偏移量 (包含原点).
pub fn ball_offsets(radius: usize) -> Vec<(isize, isize, isize)> {
    let r = radius as isize;
    let r2 = r * r;
    let mut ret = Vec::new();
    for dz in -r..=r {
        for dy in -r..=r {
            for dx in -r..=r {
                if dz * dz + dy * dy + dx * dx <= r2 {
                    ret.push((dz, dy, dx));
                }
            }
        }
    }
    ret
}

/// 对 `mask` 的每个体素, 按照结构元 `offsets` 检查邻居.
///
/// `any == true` 时为膨胀 (任一邻居为真则为真); 否则为腐蚀 (全部邻居为真才为真).
/// 体数据之外的邻居在膨胀时视为假, 在腐蚀时视为真.
fn morph(
    mask: ArrayView3<bool>,
    offsets: &[(isize, isize, isize)],
    any: bool,
    ticker: &Ticker,
) -> Result<Array3<bool>, Cancelled> {
    let shape = mask.dim();
    let mut out = Array3::from_elem(shape, false);
    try_for_each_slice_mut(&mut out, |z, mut slice| {
        for y in 0..shape.1 {
            for x in 0..shape.2 {
                let mut hits = offsets
                    .iter()
                    .map(|&o| shifted((z, y, x), o, shape).map_or(!any, |p| mask[p]));
                slice[(y, x)] = if any {
                    hits.any(|v| v)
                } else {
                    hits.all(|v| v)
                };
            }
            ticker.tick(shape.2)?;
        }
        Ok(())
    })?;
    Ok(out)
}

/// 以结构元 `offsets` 膨胀.
pub fn dilate(
    mask: ArrayView3<bool>,
    offsets: &[(isize, isize, isize)],
    progress: Progress,
) -> Result<Array3<bool>, Cancelled> {
    morph(mask, offsets, true, &Ticker::new(progress, mask.len()))
}

/// 以结构元 `offsets` 腐蚀.
pub fn erode(
    mask: ArrayView3<bool>,
    offsets: &[(isize, isize, isize)],
    progress: Progress,
) -> Result<Array3<bool>, Cancelled> {
    morph(mask, offsets, false, &Ticker::new(progress, mask.len()))
}

/// 以结构元 `offsets` 闭运算 (先膨胀后腐蚀).
pub fn close(
    mask: ArrayView3<bool>,
    offsets: &[(isize, isize, isize)],
    progress: Progress,
) -> Result<Array3<bool>, Cancelled> {
    let ticker = Ticker::new(progress, 2 * mask.len());
    let dilated = morph(mask, offsets, true, &ticker)?;
    morph(dilated.view(), offsets, false, &ticker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ball() {
        assert_eq!(ball_offsets(0), vec![(0, 0, 0)]);
        assert_eq!(ball_offsets(1).len(), 7);
        assert_eq!(ball_offsets(2).len(), 33);
    }

    #[test]
    fn test_close_fills_gap() {
        // 两块之间相隔一个体素的缝.
        let mask = Array3::from_shape_fn((5, 5, 9), |(_, _, x)| x != 4);
        let closed = close(mask.view(), &ball_offsets(1), None).unwrap();
        assert!(closed.iter().all(|&v| v));

        let point = Array3::from_shape_fn((5, 5, 5), |p| p == (2, 2, 2));
        let d = dilate(point.view(), &ball_offsets(1), None).unwrap();
        assert_eq!(d.iter().filter(|&&v| v).count(), 7);
        let e = erode(d.view(), &ball_offsets(1), None).unwrap();
        assert_eq!(e, point);
    }
}
