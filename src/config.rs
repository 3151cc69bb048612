//! Configuration loading and types for ImageVault.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, authorization, the metadata index, object
//! storage, upload validation, and observability.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authorization / secret store settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metadata index settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload validation settings.
    #[serde(default)]
    pub upload: UploadConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probes).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            index: IndexConfig::default(),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            logging: LoggingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used in presigned download links.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Authorization settings.
///
/// The shared API secret can come from an environment variable, a file,
/// or be given inline (`static`).  It is fetched once per process and
/// cached for the process lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret backend: `static`, `env`, or `file`.
    #[serde(default = "default_secret_backend")]
    pub secret_backend: String,

    /// Inline token for the `static` backend.
    #[serde(default = "default_api_token")]
    pub token: String,

    /// Environment variable name for the `env` backend.
    #[serde(default = "default_token_env_var")]
    pub env_var: String,

    /// File path for the `file` backend.
    #[serde(default)]
    pub file: String,

    /// Timeout for the first secret fetch, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_backend: default_secret_backend(),
            token: default_api_token(),
            env_var: default_token_env_var(),
            file: String::new(),
            fetch_timeout_seconds: default_fetch_timeout(),
        }
    }
}

/// Metadata index configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Backend type: `sqlite` or `memory`.
    #[serde(default = "default_index_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            engine: default_index_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific index configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_index_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local`, `memory`, or `s3`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// S3 gateway configuration.
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,

    /// Presigned link settings.
    #[serde(default)]
    pub presign: PresignConfig,

    /// Timeout for individual object-store calls, in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            s3: None,
            presign: PresignConfig::default(),
            operation_timeout_seconds: default_operation_timeout(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// S3 gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct S3StorageConfig {
    /// Backing S3 bucket name.
    pub bucket: String,
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix in the backing bucket.
    #[serde(default)]
    pub prefix: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
}

/// Presigned download link configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PresignConfig {
    /// Link lifetime in seconds.
    #[serde(default = "default_presign_ttl")]
    pub ttl_seconds: u64,

    /// HMAC signing key for local/memory backends.  A random per-process
    /// key is generated when empty, which invalidates outstanding links
    /// on restart.
    #[serde(default)]
    pub signing_key: String,
}

impl Default for PresignConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_presign_ttl(),
            signing_key: String::new(),
        }
    }
}

/// Upload validation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum upload size in bytes (default 10 MiB).
    #[serde(default = "default_max_upload_size")]
    pub max_size_bytes: u64,

    /// Allowed filename extensions.  Empty disables the extension check.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_upload_size(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9040
}

fn default_public_url() -> String {
    "http://localhost:9040".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_secret_backend() -> String {
    "static".to_string()
}

fn default_api_token() -> String {
    "imagevault-secret".to_string()
}

fn default_token_env_var() -> String {
    "IMAGEVAULT_API_TOKEN".to_string()
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_index_engine() -> String {
    "sqlite".to_string()
}

fn default_index_path() -> String {
    "./data/index.db".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presign_ttl() -> u64 {
    3600
}

fn default_operation_timeout() -> u64 {
    10
}

fn default_max_upload_size() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_allowed_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
