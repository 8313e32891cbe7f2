//! 从分割结果提取外壳点云.
//!
//! 步骤: 二值化 → 高斯平滑 → 0.5 阈值 → 26-连通区域标记 → 保留最大区域 →
//! 边界检测 → 转换为物理坐标 → 均匀下采样.

use ndarray::{Array3, ArrayView3};

use crate::data::{neighbours, touches_border, DebugArchive, Neighbourhood, Segmentation, VolumeAttr};
use crate::error::{Cancelled, ConfigError};
use crate::filters::{self, try_for_each_slice_mut};
use crate::progress::{Progress, StageList, Ticker};
use crate::{consts, Vec3};

const BINARIZE: &str = "Binarizing segmentation";
const SMOOTH: &str = "Smoothing mask";
const COMPONENTS: &str = "Labelling connected components";
const BOUNDARY: &str = "Extracting boundary";
const POINTS: &str = "Collecting shell points";

/// 外壳提取参数.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShellParams {
    /// 背景标签. 标签值为 0 或该值的体素不属于前景.
    pub background_label: i32,

    /// 平滑二值掩码的高斯标准差 (µm). 为 0 时不平滑.
    pub smoothing_sigma_um: f64,

    /// 下采样比例, 每 `down_sample_ratio` 个点保留一个.
    pub down_sample_ratio: usize,
}

impl Default for ShellParams {
    fn default() -> Self {
        Self {
            background_label: consts::label::BACKGROUND,
            smoothing_sigma_um: 1.0,
            down_sample_ratio: 1,
        }
    }
}

impl ShellParams {
    /// 检查参数合法性.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.down_sample_ratio == 0 {
            return Err(ConfigError::ZeroDownSampleRatio);
        }
        if !self.smoothing_sigma_um.is_finite() || self.smoothing_sigma_um < 0.0 {
            return Err(ConfigError::Negative(
                "smoothing_sigma_um",
                self.smoothing_sigma_um,
            ));
        }
        Ok(())
    }
}

/// 平滑二值掩码并以 0.5 为阈值重新二值化.
pub fn smooth_mask(
    mask: ArrayView3<bool>,
    element_size_um: [f64; 3],
    sigma_um: f64,
    progress: Progress,
) -> Result<Array3<bool>, Cancelled> {
    if sigma_um <= 0.0 {
        return Ok(mask.to_owned());
    }
    let soft = mask.mapv(|b| if b { 1.0 } else { 0.0 });
    let soft = filters::gaussian_smooth(soft.view(), element_size_um, sigma_um, progress)?;
    Ok(soft.mapv(|v| v >= 0.5))
}

/// 只保留 26-连通意义下体积最大的区域. 体积相同时保留光栅顺序中最先遇到者.
///
/// # 返回值
///
/// `(保留的掩码, 连通区域标签)`. 掩码为空时两者均全为假/0.
pub fn keep_largest_component(
    mask: ArrayView3<bool>,
    progress: Progress,
) -> Result<(Array3<bool>, Array3<i32>), Cancelled> {
    let cc = filters::label_components(mask, Neighbourhood::TwentySix, progress)?;
    log::debug!("{} connected components, sizes {:?}", cc.len(), cc.sizes);
    let kept = match cc.largest() {
        Some(id) => cc.labels.mapv(|l| l == id),
        None => Array3::from_elem(mask.dim(), false),
    };
    Ok((kept, cc.labels))
}

/// 边界检测.
///
/// 一个前景体素在外壳上, 当且仅当它至少有一个 6-邻居是背景, 或者它位于体数据边缘.
pub fn boundary(mask: ArrayView3<bool>, progress: Progress) -> Result<Array3<bool>, Cancelled> {
    let shape = mask.dim();
    let mut out = Array3::from_elem(shape, false);
    let ticker = Ticker::new(progress, mask.len());
    try_for_each_slice_mut(&mut out, |z, mut slice| {
        for ((y, x), p) in slice.indexed_iter_mut() {
            let pos = (z, y, x);
            *p = mask[pos]
                && (touches_border(shape, pos)
                    || neighbours(shape, pos, Neighbourhood::Six).any(|n| !mask[n]));
        }
        ticker.tick(shape.1 * shape.2)
    })?;
    Ok(out)
}

/// 均匀下采样: 保留下标为 `0, k, 2k, ...` 的点, 共 `⌈N / k⌉` 个, 顺序不变.
///
/// # 注意
///
/// `k` 为 0 时按 1 处理.
pub fn down_sample<T: Clone>(points: &[T], k: usize) -> Vec<T> {
    points.iter().step_by(k.max(1)).cloned().collect()
}

/// 外壳体素按光栅顺序转换为物理坐标 (µm).
pub fn shell_points(shell: ArrayView3<bool>, element_size_um: [f64; 3]) -> Vec<Vec3> {
    let [ez, ey, ex] = element_size_um;
    shell
        .indexed_iter()
        .filter(|(_, &b)| b)
        .map(|((z, y, x), _)| Vec3::new(z as f64 * ez, y as f64 * ey, x as f64 * ex))
        .collect()
}

/// 从分割结果提取 (已下采样的) 外壳点云.
///
/// 若 `debug` 非空, 依次写入 `bw` (平滑后的二值掩码), `bwL` (连通区域标签)
/// 和 `shell` (外壳). 分割全为背景时返回空点云, 由调用方决定如何处理.
pub fn extract_shell(
    segmentation: &Segmentation,
    params: &ShellParams,
    mut debug: Option<&mut DebugArchive>,
    progress: Progress,
) -> Result<Vec<Vec3>, Cancelled> {
    let es = segmentation.element_size_um();
    let mut stages = StageList::new();
    stages
        .push(BINARIZE, 1.0)
        .push_if(params.smoothing_sigma_um > 0.0, SMOOTH, 6.0)
        .push(COMPONENTS, 3.0)
        .push(BOUNDARY, 2.0)
        .push(POINTS, 1.0);
    let mut schedule = stages.schedule(progress);

    let s = schedule.enter(BINARIZE)?;
    let mask = segmentation.foreground_mask(params.background_label);
    s.done()?;

    let mask = if params.smoothing_sigma_um > 0.0 {
        let s = schedule.enter(SMOOTH)?;
        let r = smooth_mask(mask.view(), es, params.smoothing_sigma_um, s.progress())?;
        s.done()?;
        r
    } else {
        mask
    };
    if let Some(d) = debug.as_deref_mut() {
        d.write_or_log("bw", &mask.mapv(u8::from), es);
    }

    let s = schedule.enter(COMPONENTS)?;
    let (largest, labels) = keep_largest_component(mask.view(), s.progress())?;
    s.done()?;
    drop(mask);
    if let Some(d) = debug.as_deref_mut() {
        d.write_or_log("bwL", &labels, es);
    }
    drop(labels);

    let s = schedule.enter(BOUNDARY)?;
    let shell = boundary(largest.view(), s.progress())?;
    s.done()?;
    if let Some(d) = debug.as_deref_mut() {
        d.write_or_log("shell", &shell.mapv(u8::from), es);
    }

    let s = schedule.enter(POINTS)?;
    let all = shell_points(shell.view(), es);
    let points = down_sample(&all, params.down_sample_ratio);
    s.done()?;
    schedule.finish()?;

    log::info!(
        "{} shell points, {} after down-sampling by {}",
        all.len(),
        points.len(),
        params.down_sample_ratio
    );
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic;
    use crate::progress::{ProgressEvent, ProgressState};

    #[test]
    fn test_check() {
        assert!(ShellParams::default().check().is_ok());
        let p = ShellParams {
            down_sample_ratio: 0,
            ..Default::default()
        };
        assert_eq!(p.check(), Err(ConfigError::ZeroDownSampleRatio));
    }

    /// 实心球的边界恰好是与背景相邻的体素, 且都在球面附近.
    #[test]
    fn test_sphere_boundary() {
        let seg = synthetic::solid_sphere((21, 21, 21), [10.0; 3], 6.0, 2, 1);
        let mask = seg.foreground_mask(1);
        let shell = boundary(mask.view(), None).unwrap();

        for (pos, &on) in shell.indexed_iter() {
            let adjacent = mask[pos]
                && neighbours(mask.dim(), pos, Neighbourhood::Six).any(|n| !mask[n]);
            assert_eq!(on, adjacent, "{pos:?}");
        }
        let points = shell_points(shell.view(), [1.0; 3]);
        assert!(!points.is_empty());
        let center = Vec3::new(10.0, 10.0, 10.0);
        for p in &points {
            let d = (p - center).norm();
            assert!((d - 6.0).abs() <= 1.0, "{p:?} at {d}");
        }
    }

    /// 平滑之后的点云仍然贴近球面.
    #[test]
    fn test_extracted_sphere_shell_near_surface() {
        let seg = synthetic::solid_sphere((25, 25, 25), [12.0; 3], 8.0, 3, 1);
        let points = extract_shell(&seg, &ShellParams::default(), None, None).unwrap();
        assert!(points.len() > 100);
        let center = Vec3::new(12.0, 12.0, 12.0);
        assert!(points
            .iter()
            .all(|p| ((p - center).norm() - 8.0).abs() <= 1.5));
    }

    #[test]
    fn test_border_voxels_are_shell() {
        let mask = Array3::from_elem((3, 3, 3), true);
        let shell = boundary(mask.view(), None).unwrap();
        assert_eq!(shell.iter().filter(|&&b| b).count(), 26);
        assert!(!shell[(1, 1, 1)]);
    }

    /// 两个不相连的物体, 只有体积较大的那个进入点云, 与标签编号无关.
    #[test]
    fn test_largest_component_wins() {
        let mut seg = Segmentation::filled((20, 20, 40), 1, [1.0; 3]).unwrap();
        for z in 2..6 {
            for y in 2..6 {
                for x in 2..6 {
                    seg[(z, y, x)] = 9;
                }
            }
        }
        for z in 5..15 {
            for y in 5..15 {
                for x in 20..30 {
                    seg[(z, y, x)] = 2;
                }
            }
        }
        let params = ShellParams {
            smoothing_sigma_um: 0.0,
            ..Default::default()
        };
        let points = extract_shell(&seg, &params, None, None).unwrap();
        assert_eq!(points.len(), 1000 - 8 * 8 * 8);
        assert!(points.iter().all(|p| p[2] >= 20.0));
    }

    /// 体积相同时保留光栅顺序中最先遇到的区域.
    #[test]
    fn test_equal_components_first_wins() {
        let mut mask = Array3::from_elem((4, 4, 9), false);
        for z in 1..3 {
            for y in 1..3 {
                mask[(z, y, 1)] = true;
                mask[(z, y, 2)] = true;
                mask[(z, y, 6)] = true;
                mask[(z, y, 7)] = true;
            }
        }
        let (kept, labels) = keep_largest_component(mask.view(), None).unwrap();
        assert_eq!(labels[(1, 1, 6)], 2);
        assert!(kept[(1, 1, 1)]);
        assert!(!kept[(1, 1, 6)]);
        assert_eq!(kept.iter().filter(|&&b| b).count(), 8);
    }

    #[test]
    fn test_down_sample_keeps_ceil_and_order() {
        let v: Vec<usize> = (0..10).collect();
        assert_eq!(down_sample(&v, 3), vec![0, 3, 6, 9]);
        assert_eq!(down_sample(&v, 4), vec![0, 4, 8]);
        assert_eq!(down_sample(&v, 1), v);
        assert_eq!(down_sample(&v, 10), vec![0]);
        assert_eq!(down_sample(&v, 0), v);
        for k in 1..=12 {
            assert_eq!(down_sample(&v, k).len(), (10 + k - 1) / k);
        }
    }

    #[test]
    fn test_all_background_yields_empty_cloud() {
        let seg = Segmentation::filled((10, 10, 10), 1, [1.0; 3]).unwrap();
        let (state, rx) = ProgressState::with_events();
        let points = extract_shell(&seg, &ShellParams::default(), None, Some(&state)).unwrap();
        assert!(points.is_empty());
        let last = rx
            .try_iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress(v) => Some(v),
                _ => None,
            })
            .last();
        assert_eq!(last, Some(100));
    }
}
