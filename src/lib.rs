//! ImageVault: image-asset metadata and retrieval service.
//!
//! Accepts image uploads into an object store, indexes their metadata
//! for owner-scoped filtered listing with cursor pagination, and hands
//! out time-limited presigned download links.

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod index;
pub mod metrics;
pub mod server;
pub mod service;
pub mod storage;

use std::sync::Arc;

use crate::config::Config;
use crate::service::ImageService;
use crate::storage::{ObjectStore, UrlSigner};

/// Shared application state, passed to every handler.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// The image service orchestrating index, store and authorization.
    pub service: Arc<ImageService>,
    /// Object store, used directly by the presigned download route.
    pub store: Arc<dyn ObjectStore>,
    /// Signer for verifying presigned download links.
    pub signer: Arc<UrlSigner>,
}
