//! 上传处理：扩展名校验、文件名清洗、唯一命名与落盘。

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use chrono::{DateTime, Local};
use futures_util::stream::{Stream, StreamExt};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::storage::Storage;

const RANDOM_ID_LEN: usize = 8;
const FALLBACK_STEM: &str = "upload";
const MAX_STEM_BYTES: usize = 100;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file provided")]
    NoFileProvided,
    #[error("No file selected")]
    NoFileSelected,
    #[error("Invalid file type. Only PDF files are allowed")]
    InvalidFileType,
    #[error("File too large. Maximum size is {0}MB")]
    TooLarge(u64),
    #[error("{0}")]
    Multipart(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 已落盘的上传文件。
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// 客户端声明的原始文件名（不可信）。
    pub original_name: String,
    /// `{timestamp}_{random}_{sanitized}` 形式的存储文件名。
    pub storage_name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
}

impl UploadedFile {
    /// 基于原始文件名生成下载名，替换扩展名。
    pub fn download_name(&self, extension: &str) -> String {
        let original_stem = match self.original_name.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => self.original_name.as_str(),
        };
        let stem = sanitize_filename(original_stem);
        format!("{}.{extension}", cap_stem(&stem))
    }
}

#[derive(Debug)]
pub struct UploadHandler {
    storage: Storage,
    allowed_extensions: HashSet<String>,
    max_upload_mb: u64,
}

impl UploadHandler {
    pub fn new(storage: Storage, config: &AppConfig) -> Self {
        Self {
            storage,
            allowed_extensions: config.allowed_extensions.clone(),
            max_upload_mb: config.max_upload_mb(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// 只检查最后一个 `.` 之后的扩展名（大小写不敏感）。
    pub fn allowed_file(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| self.allowed_extensions.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// 按顺序校验声明的文件名：非空，扩展名允许。
    pub fn validate<'a>(&self, declared: Option<&'a str>) -> Result<&'a str, UploadError> {
        let name = declared.unwrap_or_default();
        if name.is_empty() {
            return Err(UploadError::NoFileSelected);
        }
        if !self.allowed_file(name) {
            return Err(UploadError::InvalidFileType);
        }
        Ok(name)
    }

    /// 校验后以唯一文件名写入上传目录；失败时删除残留文件。
    pub async fn save<S>(&self, declared: &str, data: S) -> Result<UploadedFile, UploadError>
    where
        S: Stream<Item = Result<Bytes, MultipartError>>,
    {
        let declared = self.validate(Some(declared))?;
        let storage_name = unique_storage_name(declared);
        let path = self.storage_path(&storage_name)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let write_result: Result<u64, UploadError> = async {
            let mut total_written: u64 = 0;
            futures_util::pin_mut!(data);
            while let Some(chunk) = data.next().await {
                let chunk = chunk.map_err(|err| self.map_stream_error(err))?;
                if chunk.is_empty() {
                    continue;
                }
                total_written += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(total_written)
        }
        .await;

        let size = match write_result {
            Ok(size) => size,
            Err(err) => {
                drop(file);
                if let Err(remove_err) = fs::remove_file(&path).await {
                    warn!(path = ?path, error = %remove_err, "failed to remove partial upload");
                }
                return Err(err);
            }
        };

        info!(
            original = declared,
            storage_name,
            size,
            "upload saved"
        );
        Ok(UploadedFile {
            original_name: declared.to_string(),
            storage_name,
            path,
            created_at: Local::now(),
        })
    }

    /// 存储名解析失败属于服务端问题，不是客户端的文件类型错误。
    fn storage_path(&self, storage_name: &str) -> Result<PathBuf, UploadError> {
        self.storage.resolve(storage_name).map_err(|_| {
            UploadError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage name: {storage_name}"),
            ))
        })
    }

    fn map_stream_error(&self, err: MultipartError) -> UploadError {
        debug!(error = %err, "upload stream interrupted");
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::TooLarge(self.max_upload_mb)
        } else {
            UploadError::Multipart(err.body_text())
        }
    }
}

/// 生成 `{timestamp}_{8 位随机 id}_{清洗后的原始名}`。
///
/// 原始名的主干最多保留 `MAX_STEM_BYTES` 字节，扩展名保持不变，
/// 保证存储名及其派生的输出名、临时文件名都不超过文件系统的长度限制。
pub fn unique_storage_name(declared: &str) -> String {
    let sanitized = sanitize_filename(declared);
    let sanitized = match sanitized.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}.{ext}", cap_stem(stem)),
        _ => {
            let extension = declared
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
                .unwrap_or_default();
            format!("{FALLBACK_STEM}.{}", sanitize_filename(&extension))
        }
    };
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let random_id = Uuid::new_v4().simple().to_string();
    format!("{timestamp}_{}_{sanitized}", &random_id[..RANDOM_ID_LEN])
}

/// 截断文件名主干（按字节，落在字符边界上），为空时使用默认主干。
fn cap_stem(stem: &str) -> &str {
    let mut end = stem.len().min(MAX_STEM_BYTES);
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    let capped = stem[..end].trim_end_matches(['.', '_']);
    if capped.is_empty() { FALLBACK_STEM } else { capped }
}

/// 清洗不可信文件名：路径分隔符与空白折叠为 `_`，只保留 `[A-Za-z0-9_.-]`，去掉首尾的 `.` 和 `_`。
pub fn sanitize_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(['.', '_'])
        .to_string()
}
