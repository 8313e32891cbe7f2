//! 体数据滤波与形态学工具.
//!
//! 所有长时间运行的函数都接受 [`Progress`](crate::progress::Progress) 并在体素循环中
//! 自行检查取消标记 (每处理一行体素至少检查一次). 逐体素独立的阶段按 z 切片并行.

use ndarray::{Array3, ArrayView3, ArrayViewMut2, Axis};
use num::Float;

use crate::error::Cancelled;

mod components;
mod diffusion;
mod gaussian;
mod hessian;
mod median;
mod morphology;
mod normalize;
mod rescale;
mod watershed;

pub use components::{label_components, largest_component, Components};
pub use diffusion::anisotropic_diffusion;
pub use gaussian::{gaussian_kernel, gaussian_smooth};
pub use hessian::{hessian_eigen, HessianEigen};
pub use median::median_filter;
pub use morphology::{ball_offsets, close, dilate, erode};
pub use normalize::{gamma_correct, normalize, variance_normalize, NormalizationType};
pub use rescale::{rescale_linear, rescale_nearest, rescaled_shape};
pub use watershed::seeded_watershed;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

        /// 借助 `rayon`, 并行地对每个水平可变切片实施 `op` 操作. 任一切片返回
        /// `Err` 后, 尚未开始的切片不再执行.
        pub(crate) fn try_for_each_slice_mut<T, F>(out: &mut Array3<T>, op: F) -> Result<(), Cancelled>
        where
            T: Send + Sync,
            F: Fn(usize, ArrayViewMut2<'_, T>) -> Result<(), Cancelled> + Sync + Send,
        {
            out.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .try_for_each(|(z, s)| op(z, s))
        }

        /// 借助 `rayon`, 并行地对每个体素实施 `f` 映射.
        pub(crate) fn mapv_inplace<T, F>(data: &mut Array3<T>, f: F)
        where
            T: Clone + Send + Sync,
            F: Fn(T) -> T + Sync + Send,
        {
            data.par_mapv_inplace(f);
        }
    } else {
        /// 依次对每个水平可变切片实施 `op` 操作. 任一切片返回 `Err` 后立即停止.
        pub(crate) fn try_for_each_slice_mut<T, F>(out: &mut Array3<T>, op: F) -> Result<(), Cancelled>
        where
            T: Send + Sync,
            F: Fn(usize, ArrayViewMut2<'_, T>) -> Result<(), Cancelled> + Sync + Send,
        {
            out.axis_iter_mut(Axis(0))
                .enumerate()
                .try_for_each(|(z, s)| op(z, s))
        }

        /// 对每个体素实施 `f` 映射.
        pub(crate) fn mapv_inplace<T, F>(data: &mut Array3<T>, f: F)
        where
            T: Clone + Send + Sync,
            F: Fn(T) -> T + Sync + Send,
        {
            data.mapv_inplace(f);
        }
    }
}

/// 最小值与最大值. 空数据或全部为 NaN 时返回 `None`.
pub fn min_max<T: Float>(data: ArrayView3<T>) -> Option<(T, T)> {
    data.iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// 均值与总体标准差. 空数据返回 `None`.
pub fn mean_std<T: Float>(data: ArrayView3<T>) -> Option<(T, T)> {
    if data.is_empty() {
        return None;
    }
    let n = T::from(data.len())?;
    let mean = data.iter().fold(T::zero(), |a, &v| a + v) / n;
    let var = data
        .iter()
        .fold(T::zero(), |a, &v| a + (v - mean) * (v - mean))
        / n;
    Some((mean, var.sqrt()))
}

/// 把 `[min, max]` 线性映射到 `[0, 1]`. 常数数据映射为 0.
pub fn rescale_unit(data: &mut Array3<f64>) {
    if let Some((lo, hi)) = min_max(data.view()) {
        let span = hi - lo;
        if span > 0.0 {
            mapv_inplace(data, |v| (v - lo) / span);
        } else {
            data.fill(0.0);
        }
    }
}

/// 把索引按 `offset` 平移, 越界时返回 `None`.
#[inline]
pub(crate) fn shifted(
    (z, y, x): (usize, usize, usize),
    (dz, dy, dx): (isize, isize, isize),
    (nz, ny, nx): (usize, usize, usize),
) -> Option<(usize, usize, usize)> {
    let z = z.checked_add_signed(dz)?;
    let y = y.checked_add_signed(dy)?;
    let x = x.checked_add_signed(dx)?;
    (z < nz && y < ny && x < nx).then_some((z, y, x))
}

/// 把坐标按 `offset` 平移并钳制到 `[0, n)`, 即边界复制.
#[inline]
pub(crate) fn clamped(c: usize, offset: isize, n: usize) -> usize {
    (c as isize + offset).clamp(0, n as isize - 1) as usize
}
