//! `POST /api/convert`：接收上传的 PDF，转换为 DOCX 并以附件形式返回。

use axum::body::Body as AxumBody;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::cleanup::{PendingCleanup, remove_quietly};
use crate::config::{AppConfig, DOCX_MIME_TYPE};
use crate::converter::{PdfToDocxConverter, TARGET_EXTENSION};
use crate::error::ApiError;
use crate::upload::{UploadError, UploadHandler};

const FILE_FIELD: &str = "file";

/// 校验顺序：文件字段存在、文件名非空、扩展名允许；之后才落盘并转换。
///
/// 上传文件与输出文件由响应体流持有的清理守卫负责，流释放后一并删除。
pub async fn convert_pdf(
    Extension(config): Extension<Arc<AppConfig>>,
    Extension(uploads): Extension<Arc<UploadHandler>>,
    Extension(converter): Extension<Arc<PdfToDocxConverter>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!(error = %rejection, "request is not multipart");
            return Err(UploadError::NoFileProvided.into());
        }
    };

    let max_upload_mb = config.max_upload_mb();
    let field = loop {
        let next = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::from_multipart(err, max_upload_mb))?;
        match next {
            Some(field) if field.name() == Some(FILE_FIELD) && field.file_name().is_some() => {
                break field;
            }
            Some(_) => continue,
            None => return Err(UploadError::NoFileProvided.into()),
        }
    };

    let declared = uploads.validate(field.file_name())?.to_string();
    let upload = uploads.save(&declared, field).await?;

    let output = match converter.convert(&upload.path, None).await {
        Ok(output) => output,
        Err(err) => {
            remove_quietly(&upload.path).await;
            return Err(err.into());
        }
    };

    let cleanup = PendingCleanup::new(
        vec![upload.path.clone(), output.clone()],
        config.cleanup_grace,
    );
    let file = File::open(&output)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .len();

    let download_name = upload.download_name(TARGET_EXTENSION);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(DOCX_MIME_TYPE));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{download_name}\""))
            .map_err(|_| ApiError::Internal("failed to build response headers".into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

    info!(
        original = upload.original_name,
        storage_name = upload.storage_name,
        uploaded_at = %upload.created_at.to_rfc3339(),
        download_name,
        size,
        "sending converted document"
    );
    let stream = cleanup.attach(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}
