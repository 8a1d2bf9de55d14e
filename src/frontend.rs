//! 前端静态资源：首页、`css/` 与 `js/` 目录直出。

use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{Html, IntoResponse, Json, Response};
use serde::Serialize;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::config::{AppConfig, SERVICE_NAME};
use crate::error::ApiError;
use crate::storage::Storage;

#[derive(Serialize)]
struct ServiceDescriptor {
    service: &'static str,
    status: &'static str,
    endpoints: Endpoints,
}

#[derive(Serialize)]
struct Endpoints {
    convert: &'static str,
    health: &'static str,
}

/// 返回前端首页；缺失时返回 JSON 服务描述。
pub async fn serve_index(Extension(config): Extension<Arc<AppConfig>>) -> Response {
    let index = config.frontend_dir.join("index.html");
    match fs::read_to_string(&index).await {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            debug!(path = ?index, error = %err, "frontend index unavailable");
            Json(ServiceDescriptor {
                service: SERVICE_NAME,
                status: "active",
                endpoints: Endpoints {
                    convert: "/api/convert",
                    health: "/api/health",
                },
            })
            .into_response()
        }
    }
}

pub async fn serve_css(
    Path(path): Path<String>,
    Extension(config): Extension<Arc<AppConfig>>,
) -> Result<Response, ApiError> {
    load_asset(&Storage::new(config.frontend_dir.join("css")), &path).await
}

pub async fn serve_js(
    Path(path): Path<String>,
    Extension(config): Extension<Arc<AppConfig>>,
) -> Result<Response, ApiError> {
    load_asset(&Storage::new(config.frontend_dir.join("js")), &path).await
}

/// 读取资源目录下的文件并按扩展名设置 Content-Type。
async fn load_asset(dir: &Storage, relative: &str) -> Result<Response, ApiError> {
    let target = dir.resolve_relative(relative)?;
    let data = match fs::read(&target).await {
        Ok(data) => data,
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
            return Err(ApiError::NotFound("not found".into()));
        }
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    };
    let mime = mime_guess::from_path(&target).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    Ok((headers, data).into_response())
}
