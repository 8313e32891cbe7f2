//! 运行时错误.
//!
//! 错误按照处理策略分为四类:
//!
//! 1. [`ConfigError`]: 参数非法, 在任何计算开始前同步返回.
//! 2. [`FitError::TooFewPoints`] 等退化输入错误: 使最终模型无效, 需要上报给用户.
//! 3. [`DebugIoError`]: 调试文件写入失败, 永远只在本地记录日志, 不中断计算.
//! 4. [`Cancelled`]: 用户取消. 不是真正的错误, 但调用方必须丢弃中间结果.

use std::fmt;

/// 用户通过进度报告器请求了取消.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// 参数组合非法.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// 梯度下降步长必须为正.
    NonPositiveTimeStep(f64),

    /// 迭代次数不能为负.
    NegativeIterations(i32),

    /// 能量项权重不能为负. 第一个参数为权重名.
    NegativeWeight(&'static str, f64),

    /// 参数必须为正 (且有限). 第一个参数为参数名.
    NonPositive(&'static str, f64),

    /// 参数不能为负 (且必须有限). 第一个参数为参数名.
    Negative(&'static str, f64),

    /// 下采样比例必须至少为 1.
    ZeroDownSampleRatio,

    /// 体素尺寸必须为正.
    InvalidElementSize([f64; 3]),

    /// 表面网格采样密度过低. `(纬线数, 经线数)`, 至少需要 `(2, 3)`.
    MeshSampling(usize, usize),

    /// 没有给出静止中心 (QC) 位置.
    MissingQuiescentCenter,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveTimeStep(t) => {
                write!(f, "the optimization time step must be positive, got {t}")
            }
            Self::NegativeIterations(n) => {
                write!(f, "the number of iterations must not be negative, got {n}")
            }
            Self::NegativeWeight(name, w) => {
                write!(f, "the weight `{name}` must not be negative, got {w}")
            }
            Self::NonPositive(name, v) => write!(f, "`{name}` must be positive, got {v}"),
            Self::Negative(name, v) => write!(f, "`{name}` must not be negative, got {v}"),
            Self::ZeroDownSampleRatio => f.write_str("the down-sampling ratio must be at least 1"),
            Self::InvalidElementSize(es) => {
                write!(f, "element sizes must be positive, got {es:?} µm")
            }
            Self::MeshSampling(lat, lon) => write!(
                f,
                "mesh sampling needs at least 2 latitudes and 3 longitudes, got {lat} x {lon}"
            ),
            Self::MissingQuiescentCenter => f.write_str("no quiescent center (QC) marker given"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// 轴拟合错误.
#[derive(Clone, Debug, PartialEq)]
pub enum FitError {
    /// 参数非法.
    Config(ConfigError),

    /// 采样点不足以拟合根轴.
    ///
    /// 第一个参数代表目前已有的点 (剔除边缘后), 第二个参数代表拟合需要的最少点数.
    TooFewPoints(usize, usize),

    /// 静止中心 (QC) 位于点云包围盒之外. 参数为 QC 位置 (µm).
    QcOutsidePointCloud([f64; 3]),

    /// 点云在主方向上没有延展, 无法确定根轴.
    DegenerateAxis,

    /// 用户取消.
    Cancelled,
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => fmt::Display::fmt(e, f),
            Self::TooFewPoints(found, required) => write!(
                f,
                "too few points to fit the root axis: found {found}, need at least {required}"
            ),
            Self::QcOutsidePointCloud(qc) => write!(
                f,
                "the quiescent center {qc:?} µm lies outside the point cloud"
            ),
            Self::DegenerateAxis => f.write_str("the point cloud has no principal extent"),
            Self::Cancelled => fmt::Display::fmt(&Cancelled, f),
        }
    }
}

impl std::error::Error for FitError {}

impl From<ConfigError> for FitError {
    #[inline]
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<Cancelled> for FitError {
    #[inline]
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// 细胞分割错误.
#[derive(Clone, Debug, PartialEq)]
pub enum SegmentError {
    /// 参数非法.
    Config(ConfigError),

    /// 输入体数据为空.
    EmptyVolume,

    /// 用户取消.
    Cancelled,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => fmt::Display::fmt(e, f),
            Self::EmptyVolume => f.write_str("the input volume is empty"),
            Self::Cancelled => fmt::Display::fmt(&Cancelled, f),
        }
    }
}

impl std::error::Error for SegmentError {}

impl From<ConfigError> for SegmentError {
    #[inline]
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<Cancelled> for SegmentError {
    #[inline]
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// 调试文件写入错误. 仅用于日志, 不会中断主计算.
#[derive(Debug)]
pub enum DebugIoError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// 写入 npz 归档错误.
    Npz(ndarray_npy::WriteNpzError),

    /// 归档已经关闭 (或之前的写入失败使其不可用).
    Closed,
}

impl fmt::Display for DebugIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "debug archive I/O error: {e}"),
            Self::Npz(e) => write!(f, "debug archive npz error: {e}"),
            Self::Closed => f.write_str("debug archive is closed"),
        }
    }
}

impl std::error::Error for DebugIoError {}

impl From<std::io::Error> for DebugIoError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ndarray_npy::WriteNpzError> for DebugIoError {
    #[inline]
    fn from(e: ndarray_npy::WriteNpzError) -> Self {
        Self::Npz(e)
    }
}

/// `attach_irocs_*` 编排函数的错误.
///
/// 所有错误都可以通过 `Display` 转换为面向用户的可读信息.
#[derive(Clone, Debug, PartialEq)]
pub enum AttachError {
    /// 参数非法. 计算尚未开始.
    Config(ConfigError),

    /// 点云为空或不足以拟合根轴 (例如分割结果全为背景).
    ///
    /// 第一个参数代表已有的点, 第二个参数代表需要的最少点数.
    DegeneratePointCloud(usize, usize),

    /// 表皮细胞核过少. 第一个参数代表已有的表皮细胞核, 第二个参数代表最少个数.
    TooFewEpidermisMarkers(usize, usize),

    /// 静止中心 (QC) 位于点云包围盒之外.
    QcOutsidePointCloud([f64; 3]),

    /// 用户取消. 已产生的中间结果必须丢弃.
    Cancelled,

    /// 其它异常 (例如底层数值库 panic), 已在编排函数边界被捕获.
    Unexpected(String),
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => fmt::Display::fmt(e, f),
            Self::DegeneratePointCloud(found, required) => write!(
                f,
                "the segmentation yields too few shell points: found {found}, need at least {required}"
            ),
            Self::TooFewEpidermisMarkers(found, required) => write!(
                f,
                "too few epidermis markers: found {found}, need at least {required}"
            ),
            Self::QcOutsidePointCloud(qc) => write!(
                f,
                "the quiescent center {qc:?} µm lies outside the point cloud"
            ),
            Self::Cancelled => fmt::Display::fmt(&Cancelled, f),
            Self::Unexpected(msg) => write!(f, "unexpected failure: {msg}"),
        }
    }
}

impl std::error::Error for AttachError {}

impl From<ConfigError> for AttachError {
    #[inline]
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<Cancelled> for AttachError {
    #[inline]
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<FitError> for AttachError {
    fn from(e: FitError) -> Self {
        match e {
            FitError::Config(c) => Self::Config(c),
            FitError::TooFewPoints(found, required) => Self::DegeneratePointCloud(found, required),
            FitError::QcOutsidePointCloud(qc) => Self::QcOutsidePointCloud(qc),
            FitError::DegenerateAxis => Self::DegeneratePointCloud(0, crate::consts::MIN_SHELL_POINTS),
            FitError::Cancelled => Self::Cancelled,
        }
    }
}

impl From<SegmentError> for AttachError {
    fn from(e: SegmentError) -> Self {
        match e {
            SegmentError::Config(c) => Self::Config(c),
            SegmentError::EmptyVolume => {
                Self::DegeneratePointCloud(0, crate::consts::MIN_SHELL_POINTS)
            }
            SegmentError::Cancelled => Self::Cancelled,
        }
    }
}
