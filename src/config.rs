//! CLI arguments, environment configuration and service defaults.

use clap::Parser;
use shadow_rs::formatcp;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const SERVICE_NAME: &str = "AxoConvert PDF Converter";
pub const DEFAULT_SECRET_KEY: &str = "axo-convert-secret-key";
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: &str = "pdf";
pub const DEFAULT_RETENTION_HOURS: u64 = 1;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_CLEANUP_GRACE_SECS: u64 = 0;
pub const OUTPUT_TEMP_SUBDIR: &str = "axo-convert";
pub const DOCX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// CLI arguments and environment configuration for the converter.
#[derive(Parser, Debug)]
#[command(name = "axo-convert", version = VERSION_INFO, about = "AxoConvert PDF to DOCX service")]
pub struct Args {
    #[arg(
        short = 'u',
        long,
        env = "AXO_UPLOAD_DIR",
        default_value = ".axo/uploads",
        help = "Directory holding uploaded PDFs"
    )]
    pub upload_dir: String,
    #[arg(
        short = 'o',
        long,
        env = "AXO_OUTPUT_DIR",
        help = "Directory for generated DOCX files [default: <temp>/axo-convert]"
    )]
    pub output_dir: Option<String>,
    #[arg(
        short = 'f',
        long,
        env = "AXO_FRONTEND_DIR",
        default_value = "frontend",
        help = "Directory with index.html, css/ and js/"
    )]
    pub frontend_dir: String,
    #[arg(
        short = 'b',
        long = "bind",
        env = "AXO_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_PORT",
        default_value_t = 5000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "SECRET_KEY",
        default_value = DEFAULT_SECRET_KEY,
        hide_env_values = true,
        help = "Application secret key"
    )]
    pub secret_key: String,
    #[arg(
        long,
        env = "AXO_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max request body size in bytes"
    )]
    pub max_upload_size: u64,
    #[arg(
        long,
        env = "AXO_ALLOWED_EXTENSIONS",
        default_value = DEFAULT_ALLOWED_EXTENSIONS,
        help = "Comma separated list of accepted upload extensions"
    )]
    pub allowed_extensions: String,
    #[arg(
        long,
        env = "AXO_RETENTION_HOURS",
        default_value_t = DEFAULT_RETENTION_HOURS,
        help = "Files older than this many hours are removed by the sweep"
    )]
    pub retention_hours: u64,
    #[arg(
        long,
        env = "AXO_SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        help = "Retention sweep interval in seconds (0 to disable)"
    )]
    pub sweep_interval_secs: u64,
    #[arg(
        long,
        env = "AXO_CLEANUP_GRACE_SECS",
        default_value_t = DEFAULT_CLEANUP_GRACE_SECS,
        help = "Extra delay before deleting files once a download finished"
    )]
    pub cleanup_grace_secs: u64,
    #[arg(long, env = "AXO_CORS_ORIGINS", help = "Comma separated CORS origins ('*' for any)")]
    pub cors_origins: Option<String>,
}

/// 应用密钥；`Debug` 输出中不显示明文。
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_SECRET_KEY
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([redacted])")
    }
}

/// Immutable runtime configuration shared by every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub secret_key: SecretKey,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub max_upload_size: u64,
    pub allowed_extensions: HashSet<String>,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub cleanup_grace: Duration,
}

impl AppConfig {
    /// 由命令行参数构建运行时配置。
    pub fn from_args(args: &Args) -> Self {
        let output_dir = args
            .output_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(OUTPUT_TEMP_SUBDIR));
        Self {
            secret_key: SecretKey::new(args.secret_key.as_str()),
            upload_dir: PathBuf::from(&args.upload_dir),
            output_dir,
            frontend_dir: PathBuf::from(&args.frontend_dir),
            max_upload_size: args.max_upload_size,
            allowed_extensions: parse_extensions(&args.allowed_extensions),
            retention: Duration::from_secs(args.retention_hours.saturating_mul(60 * 60)),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            cleanup_grace: Duration::from_secs(args.cleanup_grace_secs),
        }
    }

    /// 最大上传体积（MB），用于错误提示。
    pub fn max_upload_mb(&self) -> u64 {
        self.max_upload_size / (1024 * 1024)
    }
}

/// 解析逗号分隔的扩展名列表（统一小写、去掉前导点）。
pub fn parse_extensions(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
