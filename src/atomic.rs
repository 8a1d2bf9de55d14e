//! 临时文件写入后原子替换目标文件，避免暴露写了一半的输出。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 与目标同目录的临时文件，`finalize` 时重命名为目标路径。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件。
    ///
    /// 临时文件名长度固定，不随目标文件名增长。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid target path"))?;
        let temp_name = format!(".{}.tmp", Uuid::new_v4().simple());
        let temp_path = parent.join(temp_name);
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    /// 一次性写入全部内容，失败时清理临时文件。
    pub async fn write_all(mut self, contents: &[u8]) -> io::Result<Self> {
        if let Err(err) = self.file.write_all(contents).await {
            self.cleanup().await;
            return Err(err);
        }
        Ok(self)
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步并原子替换目标文件。
    pub async fn finalize(self) -> io::Result<()> {
        if let Err(err) = self.file.sync_all().await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    return fs::rename(&self.temp_path, &self.target).await;
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicFile;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finalize_replaces_target_and_leaves_no_temp() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("out.docx");
        std::fs::write(&target, b"old").expect("seed target");

        AtomicFile::new(&target)
            .await
            .expect("create temp")
            .write_all(b"new")
            .await
            .expect("write temp")
            .finalize()
            .await
            .expect("finalize");

        assert_eq!(std::fs::read(&target).expect("read target"), b"new");
        let entries = std::fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn long_target_names_do_not_lengthen_temp_name() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join(format!("{}.docx", "d".repeat(240)));
        let atomic = AtomicFile::new(&target).await.expect("create temp");
        let temp_name = atomic.temp_path.file_name().expect("temp name").len();
        assert!(temp_name < 64, "{temp_name}");
        atomic
            .write_all(b"doc")
            .await
            .expect("write temp")
            .finalize()
            .await
            .expect("finalize");
        assert_eq!(std::fs::read(&target).expect("read target"), b"doc");
    }

    #[tokio::test]
    async fn cleanup_never_creates_target() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("out.docx");
        let atomic = AtomicFile::new(&target).await.expect("create temp");
        atomic.cleanup().await;
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }
}
