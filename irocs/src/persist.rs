//! 模型持久化.
//!
//! 拟合好的模型以 bincode 编码, 再经 zlib 压缩写入单个文件. 文件头记录模型种类和
//! 格式版本; 表面网格等派生数据不写入文件, 加载时重新生成.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::axis::AxisModel;
use crate::error::FitError;
use crate::Vec3;

/// 当前文件格式版本.
const FORMAT_VERSION: u32 = 1;

/// 保存或加载模型时的错误.
#[derive(Debug)]
pub enum PersistError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// bincode 编码/解码错误.
    Codec(bincode::Error),

    /// 文件中的模型种类与期望不符. 参数为 `(期望, 实际)`.
    WrongKind(&'static str, String),

    /// 不支持的格式版本.
    UnsupportedVersion(u32),

    /// 模型未拟合, 没有可保存的内容.
    NotFitted,

    /// 文件内容无法构成合法的根轴.
    InvalidModel(FitError),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "model file I/O error: {e}"),
            Self::Codec(e) => write!(f, "model file codec error: {e}"),
            Self::WrongKind(expected, found) => {
                write!(f, "expected a `{expected}` model file, found `{found}`")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported model file version {v}"),
            Self::NotFitted => f.write_str("the model has not been fitted"),
            Self::InvalidModel(e) => write!(f, "invalid model in file: {e}"),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<std::io::Error> for PersistError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<bincode::Error> for PersistError {
    #[inline]
    fn from(e: bincode::Error) -> Self {
        Self::Codec(e)
    }
}

/// 把 `body` 压缩写入 `path`. 文件头为 `(kind, 版本)`.
pub(crate) fn save<T: Serialize>(path: &Path, kind: &str, body: &T) -> Result<(), PersistError> {
    let file = File::create(path)?;
    let mut e = ZlibEncoder::new(BufWriter::new(file), Compression::best());
    bincode::serialize_into(&mut e, &(kind, FORMAT_VERSION))?;
    bincode::serialize_into(&mut e, body)?;
    e.finish()?.flush()?;
    log::debug!("saved `{kind}` model to {}", path.display());
    Ok(())
}

/// 从 `path` 读取种类为 `kind` 的模型. 先检查文件头, 再解码模型本身.
pub(crate) fn load<T: DeserializeOwned>(path: &Path, kind: &'static str) -> Result<T, PersistError> {
    let mut d = ZlibDecoder::new(BufReader::new(File::open(path)?));
    let (found, version): (String, u32) = bincode::deserialize_from(&mut d)?;
    if found != kind {
        return Err(PersistError::WrongKind(kind, found));
    }
    if version != FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }
    Ok(bincode::deserialize_from(&mut d)?)
}

/// 根轴的可序列化形式.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct AxisRecord {
    controls: Vec<[f64; 3]>,
    radius_n: Vec<f64>,
    radius_b: Vec<f64>,
    x_hint: Option<[f64; 3]>,
}

impl From<&AxisModel> for AxisRecord {
    fn from(axis: &AxisModel) -> Self {
        let arr = |v: &Vec3| [v[0], v[1], v[2]];
        Self {
            controls: axis.controls().iter().map(arr).collect(),
            radius_n: axis.radii_n().to_vec(),
            radius_b: axis.radii_b().to_vec(),
            x_hint: axis.x_hint().as_ref().map(arr),
        }
    }
}

impl TryFrom<AxisRecord> for AxisModel {
    type Error = PersistError;

    fn try_from(r: AxisRecord) -> Result<Self, Self::Error> {
        let vec = |a: [f64; 3]| Vec3::new(a[0], a[1], a[2]);
        AxisModel::new(
            r.controls.into_iter().map(vec).collect(),
            r.radius_n,
            r.radius_b,
            r.x_hint.map(vec),
        )
        .map_err(PersistError::InvalidModel)
    }
}
