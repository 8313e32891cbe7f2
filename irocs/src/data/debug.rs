//! 调试中间结果归档.
//!
//! 分割和编排函数可以把中间体数据写入一个压缩 `.npz` 归档. 每个数据集 `name`
//! 旁边都有一个 `name.element_size_um` 数据集记录体素尺寸. 写入是尽力而为的:
//! [`DebugArchive::write_or_log`] 在失败时只记录日志, 主计算继续进行.

use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::{arr1, ArrayBase, Data, Dimension};
use ndarray_npy::{NpzWriter, WritableElement};

use crate::error::DebugIoError;

/// 压缩 `.npz` 调试归档.
pub struct DebugArchive {
    path: PathBuf,
    writer: Option<NpzWriter<File>>,
    names: Vec<String>,
}

impl std::fmt::Debug for DebugArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugArchive")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .field("names", &self.names)
            .finish()
    }
}

impl DebugArchive {
    /// 创建 (或覆盖) 归档文件.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, DebugIoError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Some(NpzWriter::new_compressed(file)),
            names: vec![],
        })
    }

    /// 尽力创建归档. 路径为空时返回 `None`; 创建失败时记录日志并返回 `None`.
    pub fn create_or_log(path: Option<&Path>) -> Option<Self> {
        let path = path.filter(|p| !p.as_os_str().is_empty())?;
        match Self::create(path) {
            Ok(archive) => {
                log::info!("writing debug datasets to {}", path.display());
                Some(archive)
            }
            Err(e) => {
                log::warn!("cannot create debug archive {}: {e}", path.display());
                None
            }
        }
    }

    /// 归档路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 已经写入的数据集名称 (不含体素尺寸条目).
    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 写入名为 `name` 的数据集, 并附带体素尺寸.
    pub fn write<S, D>(
        &mut self,
        name: &str,
        array: &ArrayBase<S, D>,
        element_size_um: [f64; 3],
    ) -> Result<(), DebugIoError>
    where
        S: Data,
        S::Elem: WritableElement,
        D: Dimension,
    {
        let writer = self.writer.as_mut().ok_or(DebugIoError::Closed)?;
        writer.add_array(name, array)?;
        writer.add_array(format!("{name}.element_size_um"), &arr1(&element_size_um))?;
        self.names.push(name.to_owned());
        Ok(())
    }

    /// 与 [`Self::write`] 相同, 但失败时只记录日志. 返回是否写入成功.
    pub fn write_or_log<S, D>(
        &mut self,
        name: &str,
        array: &ArrayBase<S, D>,
        element_size_um: [f64; 3],
    ) -> bool
    where
        S: Data,
        S::Elem: WritableElement,
        D: Dimension,
    {
        match self.write(name, array, element_size_um) {
            Ok(()) => {
                log::debug!("saved debug dataset `{name}`");
                true
            }
            Err(e) => {
                log::warn!("could not save debug dataset `{name}`: {e}");
                false
            }
        }
    }

    /// 关闭归档并写入目录.
    pub fn finish(mut self) -> Result<(), DebugIoError> {
        let writer = self.writer.take().ok_or(DebugIoError::Closed)?;
        writer.finish()?;
        Ok(())
    }

    /// 放弃归档并删除文件. 用于计算被取消或失败的情形, 删除失败时只记录日志.
    pub fn discard(mut self) {
        drop(self.writer.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!("discarded debug archive {}", self.path.display()),
            Err(e) => log::warn!(
                "could not remove debug archive {}: {e}",
                self.path.display()
            ),
        }
    }

    /// 与 [`Self::finish`] 相同, 但失败时只记录日志.
    pub fn finish_or_log(self) {
        let path = self.path.clone();
        if let Err(e) = self.finish() {
            log::warn!("could not finalize debug archive {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Ix1, Ix3, OwnedRepr};
    use ndarray_npy::NpzReader;

    #[test]
    fn test_write_and_read_back() {
        let path = std::env::temp_dir().join(format!("irocs-debug-{}.npz", std::process::id()));
        let mut archive = DebugArchive::create(&path).unwrap();
        let data = Array3::<i32>::from_elem((2, 3, 4), 7);
        assert!(archive.write_or_log("bwL", &data, [1.0, 0.5, 0.5]));
        assert!(archive.write_or_log("hessian/l1", &data.mapv(f64::from), [1.0, 0.5, 0.5]));
        assert_eq!(archive.names(), ["bwL".to_owned(), "hessian/l1".to_owned()]);
        archive.finish().unwrap();

        let mut reader = NpzReader::new(File::open(&path).unwrap()).unwrap();
        // 写入时自动追加 `.npy` 后缀.
        let back = reader.by_name::<OwnedRepr<i32>, Ix3>("bwL.npy").unwrap();
        assert_eq!(back, data);
        let es = reader
            .by_name::<OwnedRepr<f64>, Ix1>("bwL.element_size_um.npy")
            .unwrap();
        assert_eq!(es.to_vec(), vec![1.0, 0.5, 0.5]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_discard_removes_file() {
        let path = std::env::temp_dir().join(format!("irocs-discard-{}.npz", std::process::id()));
        let mut archive = DebugArchive::create(&path).unwrap();
        archive.write_or_log("bw", &Array3::<u8>::zeros((2, 2, 2)), [1.0; 3]);
        archive.discard();
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_path_disables_archive() {
        assert!(DebugArchive::create_or_log(None).is_none());
        assert!(DebugArchive::create_or_log(Some(Path::new(""))).is_none());
    }
}
