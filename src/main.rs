//! AxoConvert server binary.
//!
//! This crate accepts PDF uploads over HTTP, converts them to DOCX, streams
//! the result back as an attachment and keeps the working directories bounded
//! through post-response cleanup and a periodic retention sweep.

mod atomic;
mod background;
mod cleanup;
mod config;
mod convert;
mod converter;
mod docx;
mod error;
mod frontend;
mod health;
mod http;
mod logging;
mod storage;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};

use crate::background::spawn_retention_sweep;
use crate::config::{AppConfig, Args};
use crate::converter::PdfToDocxConverter;
use crate::http::{add_security_headers, build_cors_layer, make_request_span};
use crate::storage::Storage;
use crate::upload::UploadHandler;

shadow!(build);

/// Starts the conversion server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let config = Arc::new(AppConfig::from_args(&args));
    if config.secret_key.is_default() {
        warn!("SECRET_KEY not set, using the built-in development key");
    }

    let upload_storage = Storage::new(config.upload_dir.clone());
    let output_storage = Storage::new(config.output_dir.clone());
    upload_storage.ensure_root().await?;
    output_storage.ensure_root().await?;
    let uploads = Arc::new(UploadHandler::new(upload_storage, &config));
    let converter = Arc::new(PdfToDocxConverter::new(output_storage));
    let sweep_dirs = vec![
        uploads.storage().root_path().to_path_buf(),
        converter.output_storage().root_path().to_path_buf(),
    ];

    let app = build_router(config.clone(), uploads, converter, args.cors_origins.as_deref());

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();
    let shutdown = CancellationToken::new();

    let sweep_task = spawn_retention_sweep(
        sweep_dirs,
        config.retention,
        config.sweep_interval,
        shutdown.clone(),
    );

    info!(
        upload_dir = ?config.upload_dir,
        output_dir = ?config.output_dir,
        max_upload_size = config.max_upload_size,
        "🚀 Starting HTTP server at {}",
        addr
    );

    tokio::spawn(shutdown_signal(handle.clone(), shutdown.clone()));
    let served = axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await;

    shutdown.cancel();
    if let Some(task) = sweep_task {
        let _ = task.await;
    }

    served
}

fn build_router(
    config: Arc<AppConfig>,
    uploads: Arc<UploadHandler>,
    converter: Arc<PdfToDocxConverter>,
    cors_origins: Option<&str>,
) -> Router {
    let body_limit = usize::try_from(config.max_upload_size).unwrap_or(usize::MAX);
    Router::new()
        .route("/", get(frontend::serve_index))
        .route("/css/{*path}", get(frontend::serve_css))
        .route("/js/{*path}", get(frontend::serve_js))
        .route("/api/health", get(health::health))
        .route("/api/version", get(health::get_version_info))
        .route(
            "/api/convert",
            post(convert::convert_pdf).layer(DefaultBodyLimit::max(body_limit)),
        )
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_request_span)
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(build_cors_layer(cors_origins))
        .layer(Extension(config))
        .layer(Extension(uploads))
        .layer(Extension(converter))
}

async fn shutdown_signal(handle: Handle, shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    shutdown.cancel();
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::tests::{json_error, multipart_request};
    use axum::http::StatusCode;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn oversized_upload_is_rejected_with_413() {
        let temp = tempdir().expect("tempdir");
        let upload_dir = temp.path().join("uploads");
        let output_dir = temp.path().join("converted");
        let args = Args::parse_from([
            "axo-convert",
            "--upload-dir",
            upload_dir.to_str().expect("utf8 path"),
            "--output-dir",
            output_dir.to_str().expect("utf8 path"),
            "--max-upload-size",
            "1048576",
        ]);
        let config = Arc::new(AppConfig::from_args(&args));
        let upload_storage = Storage::new(config.upload_dir.clone());
        upload_storage.ensure_root().await.expect("upload dir");
        let uploads = Arc::new(UploadHandler::new(upload_storage, &config));
        let converter = Arc::new(PdfToDocxConverter::new(Storage::new(
            config.output_dir.clone(),
        )));
        let app = build_router(config, uploads, converter, None);

        let payload = vec![b'x'; 3 * 1024 * 1024];
        let response = app
            .oneshot(multipart_request(&[("file", Some("big.pdf"), &payload)]))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            json_error(response).await,
            "File too large. Maximum size is 1MB"
        );
        let leftovers = std::fs::read_dir(&upload_dir).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }
}
