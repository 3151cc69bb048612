//! Local filesystem object store.
//!
//! Objects are stored as flat files under a configurable root
//! directory, using the object key directly as a relative path.
//!
//! All writes follow the temp-fsync-rename pattern so a crash never
//! leaves a partially written object at its final path.

use bytes::Bytes;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::backend::{object_not_found, ObjectStore};
use super::presign::UrlSigner;
use crate::errors::ServiceError;

/// Stores objects on the local filesystem.
pub struct LocalStore {
    /// Root directory for all stored objects.
    root: PathBuf,
    /// Signer for presigned download links.
    signer: Arc<UrlSigner>,
    /// Externally reachable base URL for download links.
    public_url: String,
}

impl LocalStore {
    /// Create a new `LocalStore` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(
        root: impl Into<PathBuf>,
        signer: Arc<UrlSigner>,
        public_url: String,
    ) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        // Temp directory for atomic writes.
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self {
            root,
            signer,
            public_url,
        })
    }

    /// Resolve an object key to a file path, rejecting traversal.
    fn resolve(&self, object_key: &str) -> Result<PathBuf, ServiceError> {
        for component in std::path::Path::new(object_key).components() {
            if let std::path::Component::ParentDir = component {
                return Err(ServiceError::validation(format!(
                    "invalid object key: {object_key}"
                )));
            }
        }
        Ok(self.root.join(object_key))
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{id}"))
    }
}

impl ObjectStore for LocalStore {
    fn put(
        &self,
        object_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let final_path = self.resolve(&object_key)?;

            // Keys contain '/' separators; create intermediate dirs.
            if let Some(parent) = final_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ServiceError::Internal(e.into()))?;
            }

            let tmp_path = self.temp_path();
            if let Some(parent) = tmp_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ServiceError::Internal(e.into()))?;
            }

            let write = || -> std::io::Result<()> {
                let mut file = std::fs::File::create(&tmp_path)?;
                file.write_all(&data)?;
                file.sync_all()?;
                std::fs::rename(&tmp_path, &final_path)?;
                Ok(())
            };
            write().map_err(|e| ServiceError::Internal(e.into()))?;
            Ok(())
        })
    }

    fn get(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let path = self.resolve(&object_key)?;
            if !path.is_file() {
                return Err(object_not_found(&object_key));
            }
            let data =
                std::fs::read(&path).map_err(|e| ServiceError::Internal(e.into()))?;
            Ok(Bytes::from(data))
        })
    }

    fn delete(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let path = self.resolve(&object_key)?;
            // Idempotent: a missing file is not an error.
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|e| ServiceError::Internal(e.into()))?;
            }
            Ok(())
        })
    }

    fn exists(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let path = self.resolve(&object_key)?;
            Ok(path.is_file())
        })
    }

    fn presign_get(
        &self,
        object_key: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            Ok(self.signer.presign(&self.public_url, &object_key, ttl))
        })
    }
}
