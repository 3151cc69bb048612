//! ImageVault server binary.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use imagevault::auth::{secret_store_from_config, AuthorizationGate, TokenCache};
use imagevault::config::{load_config, Config, LoggingConfig};
use imagevault::index::{MemoryIndex, MetadataIndex, SqliteIndex};
use imagevault::metrics::{describe_metrics, init_metrics};
use imagevault::server;
use imagevault::service::ImageService;
use imagevault::storage::{LocalStore, MemoryStore, ObjectStore, S3Store, UrlSigner};
use imagevault::AppState;

#[derive(Parser, Debug)]
#[command(
    name = "imagevault",
    version,
    about = "Image-asset metadata and retrieval service"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "imagevault.yaml")]
    config: PathBuf,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        Config::default()
    };

    init_tracing(&config.logging);

    if !cli.config.exists() {
        warn!(
            "config file {} not found, using defaults",
            cli.config.display()
        );
    }

    if config.observability.metrics {
        init_metrics();
        describe_metrics();
    }

    let addr = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    let state = build_state(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("imagevault listening on {addr}");

    axum::serve(listener, server::app(state))
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Assemble the application state from configuration.
async fn build_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let signer = Arc::new(UrlSigner::from_config(&config.storage.presign.signing_key));

    let store: Arc<dyn ObjectStore> = match config.storage.backend.as_str() {
        "local" => Arc::new(LocalStore::new(
            config.storage.local.root_dir.as_str(),
            signer.clone(),
            config.server.public_url.clone(),
        )?),
        "memory" => Arc::new(MemoryStore::new(
            signer.clone(),
            config.server.public_url.clone(),
        )),
        "s3" => {
            let s3_cfg = config.storage.s3.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.backend is 's3' but the storage.s3 section is missing")
            })?;
            Arc::new(S3Store::new(s3_cfg).await?)
        }
        other => anyhow::bail!("unknown storage backend: {other}"),
    };

    let index: Arc<dyn MetadataIndex> = match config.index.engine.as_str() {
        "sqlite" => {
            let path = &config.index.sqlite.path;
            if path != ":memory:" {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Arc::new(SqliteIndex::new(path)?)
        }
        "memory" => Arc::new(MemoryIndex::new()),
        other => anyhow::bail!("unknown index engine: {other}"),
    };

    let secret_store = secret_store_from_config(&config.auth)?;
    let gate = AuthorizationGate::new(TokenCache::new(
        secret_store,
        Duration::from_secs(config.auth.fetch_timeout_seconds),
    ));

    let service = Arc::new(ImageService::new(
        index,
        store.clone(),
        gate,
        Duration::from_secs(config.storage.presign.ttl_seconds),
        Duration::from_secs(config.storage.operation_timeout_seconds),
        config.upload.max_size_bytes,
        config.upload.allowed_extensions.clone(),
    ));

    Ok(Arc::new(AppState {
        config,
        service,
        store,
        signer,
    }))
}
