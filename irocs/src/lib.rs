#![warn(missing_docs)]

//! 核心库. 对植物根尖的 3D 共聚焦体数据进行细胞分割, 并拟合 iRoCS 根坐标系.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 坐标约定
//!
//! 1. 体素索引与物理位置均按 `(z, y, x)` 排列. 物理位置 = 索引 × 体素尺寸, 单位为微米.
//! 2. 根坐标 `(l, r, φ)`: `l` 为沿根轴到静止中心 (QC) 的弧长, `r` 为到根轴的距离,
//!   `φ` 为绕根轴的角度 (弧度).
//!
//! # 注意
//!
//! 1. 所有长时间运行的函数都接受一个可选的 [`ProgressReporter`](progress::ProgressReporter),
//!   按阶段汇报进度, 并在取消后尽快返回 `Cancelled`.
//! 2. 拟合失败或被取消时, 调用方持有的模型保持原状.
//! 3. 编排函数在边界捕获 panic, 其余函数在非期望情况下会直接 panic, 而不会导致内存错误.
//!
//! # 模块
//!
//! ### 细胞分割 ✅
//!
//! 预处理 (伽马校正, 中值滤波, 重采样, 方差归一化), Hessian 脊检测,
//! 种子分水岭与后处理. 实现位于 `irocs/src/segment`.
//!
//! ### 根表面点云提取 ✅
//!
//! 实现位于 `irocs/src/shell`.
//!
//! ### 根轴拟合 ✅
//!
//! 三次 Hermite 曲线 + 梯度下降. `ShellCoordinateTransform` (外壳点云) 和
//! `Irocs` (表皮细胞核) 共享同一套根轴模型. 实现位于 `irocs/src/axis`,
//! `irocs/src/sct` 和 `irocs/src/rct`.
//!
//! ### 编排函数 ✅
//!
//! 实现位于 `irocs/src/attach`.

/// 三维索引.
pub type Idx3d = (usize, usize, usize);

/// 三维物理位置 / 向量, 按 `(z, y, x)` 排列.
pub type Vec3 = nalgebra::Vector3<f64>;

pub mod consts;
pub mod error;
pub mod progress;

/// 体数据基础结构.
pub mod data;

pub mod filters;
pub mod nucleus;
pub mod segment;
pub mod shell;

pub mod axis;
pub mod rct;
pub mod sct;

pub mod attach;

#[cfg(feature = "serde")]
pub mod persist;

pub mod prelude;

pub use attach::{
    attach_irocs_to_marker_set, attach_irocs_to_markers, attach_irocs_to_raw_volume,
    attach_irocs_to_segmentation, CoordinateVolumes, SegmentationAttachParams,
};
pub use data::{IntensityVolume, Segmentation, VolumeAttr};
pub use error::{AttachError, Cancelled, ConfigError, FitError, SegmentError};
pub use rct::{Irocs, IrocsParams};
pub use sct::{ShellCoordinateTransform, ShellFitParams};
pub use segment::{segment_cells, SegmentParams};
