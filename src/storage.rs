//! 工作目录管理：确保目录存在，并把单个文件名安全地解析到目录内。

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将单个文件名解析为目录内的路径；拒绝空名、`..`、绝对路径和多级路径。
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => Ok(self.root.join(segment)),
            _ => Err(StorageError::InvalidName),
        }
    }

    /// 解析相对路径（允许多级），用于静态资源目录。
    pub fn resolve_relative(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidName);
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(StorageError::InvalidName);
        }
        Ok(self.root.join(normalized))
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName,
}
