//! 体数据基础结构.
//!
//! 所有体数据均按照 `(z, y, x)` 顺序存储和索引, 体素尺寸以微米为单位.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::path::Path;

use nalgebra::Matrix4;
use ndarray::{Array3, ArrayView3, ArrayViewMut3, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::label;
use crate::error::ConfigError;
use crate::{Idx3d, Vec3};

pub mod debug;
pub mod synthetic;

pub use debug::DebugArchive;

/// 邻域类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Neighbourhood {
    /// 6-邻域 (共面).
    Six,

    /// 26-邻域 (共面, 共边, 共点).
    TwentySix,
}

const OFFSETS_6: [(isize, isize, isize); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

const OFFSETS_26: [(isize, isize, isize); 26] = {
    let mut ret = [(0, 0, 0); 26];
    let mut i = 0;
    let mut dz = -1;
    while dz <= 1 {
        let mut dy = -1;
        while dy <= 1 {
            let mut dx = -1;
            while dx <= 1 {
                if !(dz == 0 && dy == 0 && dx == 0) {
                    ret[i] = (dz, dy, dx);
                    i += 1;
                }
                dx += 1;
            }
            dy += 1;
        }
        dz += 1;
    }
    ret
};

impl Neighbourhood {
    /// 邻域偏移量. 26-邻域按照光栅顺序排列.
    #[inline]
    pub fn offsets(&self) -> &'static [(isize, isize, isize)] {
        match self {
            Self::Six => &OFFSETS_6,
            Self::TwentySix => &OFFSETS_26,
        }
    }
}

/// 获取 `pos` 在形状为 `shape` 的体数据中, 不越界的邻居坐标.
#[inline]
pub fn neighbours(
    shape: Idx3d,
    (z, y, x): Idx3d,
    nh: Neighbourhood,
) -> impl Iterator<Item = Idx3d> {
    nh.offsets().iter().filter_map(move |&(dz, dy, dx)| {
        let nz = z.checked_add_signed(dz)?;
        let ny = y.checked_add_signed(dy)?;
        let nx = x.checked_add_signed(dx)?;
        (nz < shape.0 && ny < shape.1 && nx < shape.2).then_some((nz, ny, nx))
    })
}

/// `pos` 是否有邻居落在体数据之外?
#[inline]
pub fn touches_border(shape: Idx3d, (z, y, x): Idx3d) -> bool {
    z == 0 || y == 0 || x == 0 || z + 1 >= shape.0 || y + 1 >= shape.1 || x + 1 >= shape.2
}

/// 检查体素尺寸是否合法 (全部为正且有限).
pub fn check_element_size(element_size_um: [f64; 3]) -> Result<(), ConfigError> {
    if element_size_um.iter().all(|e| e.is_finite() && *e > 0.0) {
        Ok(())
    } else {
        Err(ConfigError::InvalidElementSize(element_size_um))
    }
}

/// 3D 体数据的共用属性和部分通用操作.
pub trait VolumeAttr {
    /// 数据形状, `(z, y, x)`.
    fn shape(&self) -> Idx3d;

    /// 单个体素的尺寸, 以微米为单位, 顺序为 `[z, y, x]`.
    fn element_size_um(&self) -> [f64; 3];

    /// 齐次仿射变换, 将 `(z, y, x)` 索引映射到 `(z, y, x)` 物理坐标 (µm).
    fn transformation(&self) -> &Matrix4<f64>;

    /// 体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, y, x) = self.shape();
        z * y * x
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, &(z0, y0, x0): &Idx3d) -> bool {
        let (z, y, x) = self.shape();
        z0 < z && y0 < y && x0 < x
    }

    /// 单个体素的体积, 以立方微米为单位.
    #[inline]
    fn voxel_um3(&self) -> f64 {
        self.element_size_um().iter().product()
    }

    /// 数据在三个方向上的物理范围 (µm).
    #[inline]
    fn extent_um(&self) -> [f64; 3] {
        let (z, y, x) = self.shape();
        let [ez, ey, ex] = self.element_size_um();
        [z as f64 * ez, y as f64 * ey, x as f64 * ex]
    }

    /// 体素中心的物理位置 (µm), 即索引乘以体素尺寸.
    #[inline]
    fn position_um(&self, (z, y, x): Idx3d) -> Vec3 {
        let [ez, ey, ex] = self.element_size_um();
        Vec3::new(z as f64 * ez, y as f64 * ey, x as f64 * ex)
    }

    /// 物理位置对应的最近体素索引. 越界时返回 `None`.
    fn index_of(&self, pos_um: &Vec3) -> Option<Idx3d> {
        let [ez, ey, ex] = self.element_size_um();
        let round = |v: f64, e: f64| {
            let r = (v / e).round();
            (r >= 0.0).then_some(r as usize)
        };
        let idx = (
            round(pos_um.x, ez)?,
            round(pos_um.y, ey)?,
            round(pos_um.z, ex)?,
        );
        self.check(&idx).then_some(idx)
    }

    /// 获取 `pos` 上下左右前后六个点的坐标. 越界的坐标被过滤掉.
    #[inline]
    fn diamond_neighbours(&self, pos: Idx3d) -> Vec<Idx3d> {
        neighbours(self.shape(), pos, Neighbourhood::Six).collect()
    }

    /// 获取 `pos` 的 26-邻域坐标. 越界的坐标被过滤掉.
    #[inline]
    fn cube_neighbours(&self, pos: Idx3d) -> Vec<Idx3d> {
        neighbours(self.shape(), pos, Neighbourhood::TwentySix).collect()
    }
}

/// 打开体数据文件时的错误.
#[derive(Debug)]
pub enum OpenVolumeError {
    /// nifti 解析错误.
    Nifti(nifti::NiftiError),

    /// 数据不是三维的. 参数为实际维数.
    NotThreeDimensional(usize),

    /// 文件头中的体素尺寸非法.
    InvalidElementSize([f64; 3]),
}

impl fmt::Display for OpenVolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nifti(e) => write!(f, "nifti error: {e}"),
            Self::NotThreeDimensional(n) => write!(f, "expected a 3-D volume, got {n} dimensions"),
            Self::InvalidElementSize(es) => write!(f, "invalid element size {es:?} in header"),
        }
    }
}

impl std::error::Error for OpenVolumeError {}

impl From<nifti::NiftiError> for OpenVolumeError {
    #[inline]
    fn from(e: nifti::NiftiError) -> Self {
        Self::Nifti(e)
    }
}

/// 三维体数据, 带有体素尺寸和仿射变换.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    data: Array3<T>,
    element_size_um: [f64; 3],
    transformation: Matrix4<f64>,
}

/// 原始强度体数据.
pub type IntensityVolume = Volume<f64>;

/// 离散标签体数据 (分割结果).
pub type Segmentation = Volume<i32>;

impl<T> VolumeAttr for Volume<T> {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    #[inline]
    fn element_size_um(&self) -> [f64; 3] {
        self.element_size_um
    }

    #[inline]
    fn transformation(&self) -> &Matrix4<f64> {
        &self.transformation
    }
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

/// 由体素尺寸构造对角缩放变换.
#[inline]
fn scaling(element_size_um: [f64; 3]) -> Matrix4<f64> {
    let [ez, ey, ex] = element_size_um;
    Matrix4::new_nonuniform_scaling(&Vec3::new(ez, ey, ex))
}

impl<T> Volume<T> {
    /// 由裸数据和体素尺寸创建体数据, 仿射变换为对角缩放.
    pub fn new(data: Array3<T>, element_size_um: [f64; 3]) -> Result<Self, ConfigError> {
        check_element_size(element_size_um)?;
        Ok(Self {
            data,
            element_size_um,
            transformation: scaling(element_size_um),
        })
    }

    /// 替换仿射变换.
    #[inline]
    pub fn with_transformation(mut self, transformation: Matrix4<f64>) -> Self {
        self.transformation = transformation;
        self
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, T> {
        self.data.view_mut()
    }

    /// 取出裸数据.
    #[inline]
    pub fn into_data(self) -> Array3<T> {
        self.data
    }

    /// 以相同的元信息包装另一份同形状数据.
    ///
    /// # 注意
    ///
    /// 形状不一致时程序 panic.
    pub fn with_data<U>(&self, data: Array3<U>) -> Volume<U> {
        assert_eq!(self.data.dim(), data.dim(), "体数据形状不一致");
        Volume {
            data,
            element_size_um: self.element_size_um,
            transformation: self.transformation,
        }
    }
}

/// nifti `xyzt_units` 的空间单位换算为微米的系数. 未知单位按微米处理.
#[inline]
fn unit_to_um(h: &NiftiHeader) -> f64 {
    match h.xyzt_units & 0x07 {
        1 => 1e6,
        2 => 1e3,
        _ => 1.0,
    }
}

/// 读取 nifti 文件, 返回 `(z, y, x)` 顺序的数据, 体素尺寸和仿射变换.
fn read_nifti(path: &Path) -> Result<(Array3<f64>, [f64; 3], Matrix4<f64>), OpenVolumeError> {
    let obj = ReaderOptions::new().read_file(path)?;
    let header = obj.header().clone();

    // [x, y, z] -> [z, y, x].
    let data = obj.into_volume().into_ndarray::<f64>()?;
    let ndim = data.ndim();
    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|_| OpenVolumeError::NotThreeDimensional(ndim))?
        .permuted_axes([2, 1, 0])
        .as_standard_layout()
        .into_owned();

    let k = unit_to_um(&header);
    let [_, px, py, pz, ..] = header.pixdim;
    let element_size_um = [pz as f64 * k, py as f64 * k, px as f64 * k];
    check_element_size(element_size_um)
        .map_err(|_| OpenVolumeError::InvalidElementSize(element_size_um))?;

    let transformation = if header.sform_code > 0 {
        // nifti 的行列均为 (x, y, z) 顺序, 这里反转为 (z, y, x).
        let rows = [header.srow_z, header.srow_y, header.srow_x];
        let mut m = Matrix4::identity();
        for (r, row) in rows.iter().enumerate() {
            m[(r, 0)] = row[2] as f64 * k;
            m[(r, 1)] = row[1] as f64 * k;
            m[(r, 2)] = row[0] as f64 * k;
            m[(r, 3)] = row[3] as f64 * k;
        }
        m
    } else {
        scaling(element_size_um)
    };

    Ok((data, element_size_um, transformation))
}

impl IntensityVolume {
    /// 打开 nii 文件格式的强度体数据. 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenVolumeError> {
        let (data, element_size_um, transformation) = read_nifti(path.as_ref())?;
        Ok(Self {
            data,
            element_size_um,
            transformation,
        })
    }

    /// 最小值与最大值. 空数据返回 `None`.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        crate::filters::min_max(self.data.view())
    }
}

impl Segmentation {
    /// 打开 nii 文件格式的标签体数据. 标签值四舍五入为整数.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenVolumeError> {
        let (data, element_size_um, transformation) = read_nifti(path.as_ref())?;
        Ok(Self {
            data: data.mapv(|v| v.round() as i32),
            element_size_um,
            transformation,
        })
    }

    /// 全背景标签体数据.
    pub fn filled(
        shape: Idx3d,
        value: i32,
        element_size_um: [f64; 3],
    ) -> Result<Self, ConfigError> {
        Self::new(Array3::from_elem(shape, value), element_size_um)
    }

    /// 前景掩码. 前景被定义为标签值大于 0 且不等于 `background_label` 的体素.
    pub fn foreground_mask(&self, background_label: i32) -> Array3<bool> {
        self.data
            .mapv(|p| label::is_foreground(p, background_label))
    }

    /// 值为 `value` 的体素个数.
    pub fn count(&self, value: i32) -> usize {
        self.data.iter().filter(|&&p| p == value).count()
    }

    /// 最大标签值. 空数据返回 `None`.
    pub fn max_label(&self) -> Option<i32> {
        self.data.iter().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbours_are_clipped() {
        let shape = (3, 3, 3);
        assert_eq!(neighbours(shape, (0, 0, 0), Neighbourhood::Six).count(), 3);
        assert_eq!(neighbours(shape, (1, 1, 1), Neighbourhood::Six).count(), 6);
        assert_eq!(neighbours(shape, (0, 0, 0), Neighbourhood::TwentySix).count(), 7);
        assert_eq!(neighbours(shape, (1, 1, 1), Neighbourhood::TwentySix).count(), 26);
        assert!(touches_border(shape, (2, 1, 1)));
        assert!(!touches_border(shape, (1, 1, 1)));
    }

    #[test]
    fn test_positions_and_extent() {
        let seg = Segmentation::filled((4, 5, 6), 1, [2.0, 1.0, 0.5]).unwrap();
        assert_eq!(seg.extent_um(), [8.0, 5.0, 3.0]);
        assert_eq!(seg.position_um((1, 2, 3)), Vec3::new(2.0, 2.0, 1.5));
        assert_eq!(seg.index_of(&Vec3::new(2.1, 1.9, 1.4)), Some((1, 2, 3)));
        assert_eq!(seg.index_of(&Vec3::new(-3.0, 0.0, 0.0)), None);
        assert_eq!(seg.voxel_um3(), 1.0);
        assert_eq!(seg.count(1), 120);
    }

    #[test]
    fn test_invalid_element_size() {
        assert!(Segmentation::filled((1, 1, 1), 0, [1.0, 0.0, 1.0]).is_err());
        assert!(Segmentation::filled((1, 1, 1), 0, [1.0, f64::NAN, 1.0]).is_err());
    }
}
