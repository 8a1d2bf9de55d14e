//! 尽力而为的文件清理：响应发送完成后的删除，以及按保留时长的定期清扫。

use futures_util::stream::{Stream, StreamExt};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub retained: usize,
}

/// 删除单个文件，返回是否真正删除。文件已不存在时视为无操作。
pub async fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = ?path, "removed file");
            true
        }
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            warn!(path = ?path, error = %err, "failed to remove file");
            false
        }
    }
}

/// 释放时删除一组文件的守卫。
///
/// 挂在响应体流上：响应体发送完毕（或客户端断开）后流被释放，文件随之删除。
#[derive(Debug)]
pub struct PendingCleanup {
    paths: Vec<PathBuf>,
    grace: Duration,
}

impl PendingCleanup {
    pub fn new(paths: Vec<PathBuf>, grace: Duration) -> Self {
        Self { paths, grace }
    }

    /// 将守卫绑定到流上，随流一起释放。
    pub fn attach<S>(self, stream: S) -> impl Stream<Item = S::Item> + Send + 'static
    where
        S: Stream + Send + 'static,
    {
        stream.map(move |item| {
            let _guard = &self;
            item
        })
    }
}

impl Drop for PendingCleanup {
    fn drop(&mut self) {
        let paths = std::mem::take(&mut self.paths);
        if paths.is_empty() {
            return;
        }
        let grace = self.grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if !grace.is_zero() {
                        tokio::time::sleep(grace).await;
                    }
                    for path in &paths {
                        remove_quietly(path).await;
                    }
                });
            }
            Err(_) => {
                for path in &paths {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    }
}

/// 删除目录中修改时间早于 `now - retention` 的普通文件。
pub async fn sweep_expired(dir: &Path, retention: Duration) -> io::Result<SweepReport> {
    let mut report = SweepReport::default();
    let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
        return Ok(report);
    };

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(report),
        Err(err) => return Err(err),
    };
    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified < cutoff {
            if remove_quietly(&entry.path()).await {
                report.removed += 1;
            }
        } else {
            report.retained += 1;
        }
    }

    Ok(report)
}

/// 依次清扫所有工作目录，错误只记录不上抛。
pub async fn sweep_all(dirs: &[PathBuf], retention: Duration) -> SweepReport {
    let mut total = SweepReport::default();
    for dir in dirs {
        match sweep_expired(dir, retention).await {
            Ok(report) => {
                total.removed += report.removed;
                total.retained += report.retained;
            }
            Err(err) => warn!(dir = ?dir, error = %err, "retention sweep failed"),
        }
    }
    info!(
        removed = total.removed,
        retained = total.retained,
        "retention sweep finished"
    );
    total
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::tempdir;

    pub(crate) fn age_file(path: &Path, age: Duration) {
        let file = std::fs::File::options()
            .write(true)
            .open(path)
            .expect("open for mtime");
        file.set_modified(SystemTime::now() - age)
            .expect("set mtime");
    }

    pub(crate) async fn wait_until_gone(paths: &[&Path]) -> bool {
        for _ in 0..200 {
            if paths.iter().all(|path| !path.exists()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn remove_quietly_tolerates_double_delete() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("a.pdf");
        std::fs::write(&path, b"x").expect("write");
        assert!(remove_quietly(&path).await);
        assert!(!remove_quietly(&path).await);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_files() {
        let temp = tempdir().expect("tempdir");
        let old = temp.path().join("old.pdf");
        let fresh = temp.path().join("fresh.docx");
        std::fs::write(&old, b"old").expect("write old");
        std::fs::write(&fresh, b"fresh").expect("write fresh");
        std::fs::create_dir(temp.path().join("subdir")).expect("create subdir");
        age_file(&old, Duration::from_secs(2 * 60 * 60));

        let report = sweep_expired(temp.path(), Duration::from_secs(60 * 60))
            .await
            .expect("sweep");
        assert_eq!(
            report,
            SweepReport {
                removed: 1,
                retained: 1
            }
        );
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(temp.path().join("subdir").is_dir());
    }

    #[tokio::test]
    async fn sweep_of_missing_directory_is_empty() {
        let temp = tempdir().expect("tempdir");
        let report = sweep_expired(&temp.path().join("missing"), Duration::from_secs(1))
            .await
            .expect("sweep");
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn sweep_all_covers_every_directory() {
        let upload = tempdir().expect("tempdir");
        let output = tempdir().expect("tempdir");
        let a = upload.path().join("a.pdf");
        let b = output.path().join("a.docx");
        for path in [&a, &b] {
            std::fs::write(path, b"x").expect("write");
            age_file(path, Duration::from_secs(3 * 60 * 60));
        }
        let dirs = vec![upload.path().to_path_buf(), output.path().to_path_buf()];
        let report = sweep_all(&dirs, Duration::from_secs(60 * 60)).await;
        assert_eq!(report.removed, 2);
        assert!(!a.exists() && !b.exists());
    }

    #[tokio::test]
    async fn guard_deletes_files_once_stream_is_dropped() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("in.pdf");
        let output = temp.path().join("out.docx");
        std::fs::write(&input, b"in").expect("write input");
        std::fs::write(&output, b"out").expect("write output");

        let guard = PendingCleanup::new(vec![input.clone(), output.clone()], Duration::ZERO);
        let mut body = Box::pin(guard.attach(stream::iter(vec![1, 2, 3])));
        assert_eq!(body.next().await, Some(1));
        tokio::task::yield_now().await;
        assert!(input.exists() && output.exists(), "deleted while streaming");

        while body.next().await.is_some() {}
        drop(body);
        assert!(wait_until_gone(&[&input, &output]).await);
    }

    #[tokio::test]
    async fn guard_tolerates_files_already_swept() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("gone.pdf");
        drop(PendingCleanup::new(vec![path.clone()], Duration::ZERO));
        tokio::task::yield_now().await;
        assert!(!path.exists());
    }
}
