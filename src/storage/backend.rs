//! Abstract object store trait.
//!
//! Every storage backend must implement [`ObjectStore`].  The trait
//! works in terms of opaque byte blobs keyed by the object key, so
//! callers do not need to know the underlying medium.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::ServiceError;

/// Async object storage contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Write `data` at `object_key`, overwriting any existing object.
    fn put(
        &self,
        object_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>>;

    /// Read the full object at `object_key`. Fails with `NotFound`.
    fn get(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, ServiceError>> + Send + '_>>;

    /// Delete the object at `object_key`. Idempotent.
    fn delete(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>>;

    /// Check whether an object exists at `object_key`.
    fn exists(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ServiceError>> + Send + '_>>;

    /// Produce a time-limited download URL for `object_key`.
    ///
    /// The URL is only generated; whether the object exists is the
    /// caller's concern.
    fn presign_get(
        &self,
        object_key: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>>;
}

/// `NotFound` for a missing object, keyed by the object key.
pub(crate) fn object_not_found(object_key: &str) -> ServiceError {
    ServiceError::NotFound {
        asset_id: object_key.to_string(),
    }
}
