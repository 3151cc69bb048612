//! Image service orchestration.
//!
//! Ties the authorization gate, metadata index and object store
//! together and owns the cross-component invariants:
//!
//!   - only mutating operations pass the authorization gate; reads are
//!     open, and read access control is carried by the unguessable
//!     asset id plus the expiring download link;
//!   - an upload writes the object first, then the index record, and
//!     compensates with an object delete if indexing fails, so the
//!     index never references bytes that were not stored;
//!   - every index and store call is bounded by the configured
//!     operation timeout and surfaces as `StoreUnavailable` when it
//!     elapses;
//!   - bulk deletion reports a per-id outcome instead of failing the
//!     whole batch.

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthorizationGate;
use crate::errors::ServiceError;
use crate::index::{
    AssetRecord, ListFilters, MetadataIndex, PageCursor, SortOrder, Visibility,
};
use crate::storage::ObjectStore;

/// Maximum number of ids accepted by one bulk delete call.
pub const MAX_BULK_DELETE: usize = 100;

/// Maximum length of an owner identifier.
const MAX_OWNER_ID_LEN: usize = 128;

/// Validated upload input, independent of the HTTP layer.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub category: String,
    pub tags: BTreeSet<String>,
    pub visibility: Visibility,
    pub data: Bytes,
}

/// One page of a listing, cursor already encoded for the wire.
#[derive(Debug)]
pub struct ListResult {
    pub records: Vec<AssetRecord>,
    pub next_cursor: Option<String>,
}

/// A single failed id within a bulk delete.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteFailure {
    pub asset_id: String,
    pub reason: String,
}

/// Per-id outcome of a bulk delete.
#[derive(Debug, Default, Serialize)]
pub struct DeleteSummary {
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

/// The image service. Cheap to clone via `Arc` in app state.
pub struct ImageService {
    index: Arc<dyn MetadataIndex>,
    store: Arc<dyn ObjectStore>,
    gate: AuthorizationGate,
    presign_ttl: Duration,
    op_timeout: Duration,
    max_upload_bytes: u64,
    allowed_extensions: Vec<String>,
}

impl ImageService {
    pub fn new(
        index: Arc<dyn MetadataIndex>,
        store: Arc<dyn ObjectStore>,
        gate: AuthorizationGate,
        presign_ttl: Duration,
        op_timeout: Duration,
        max_upload_bytes: u64,
        allowed_extensions: Vec<String>,
    ) -> Self {
        Self {
            index,
            store,
            gate,
            presign_ttl,
            op_timeout,
            max_upload_bytes,
            allowed_extensions,
        }
    }

    /// Bound an index/store call by the operation timeout.
    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| ServiceError::StoreUnavailable {
                message: format!("{what} timed out"),
            })?
    }

    // ── Upload ──────────────────────────────────────────────────────

    /// Store a new image and index its metadata.
    ///
    /// Returns the created record plus a presigned download URL.
    pub async fn upload(
        &self,
        credential: &str,
        req: UploadRequest,
    ) -> Result<(AssetRecord, String), ServiceError> {
        // Validation is pure; run it before the gate so a malformed
        // request never triggers a secret fetch.
        self.validate_upload(&req)?;
        self.gate.authorize(credential, &req.owner_id).await?;

        let asset_id = Uuid::new_v4().to_string();
        let object_key = format!("images/{}/{}", req.owner_id, asset_id);
        let record = AssetRecord {
            asset_id: asset_id.clone(),
            owner_id: req.owner_id.clone(),
            object_key: object_key.clone(),
            category: req.category.clone(),
            tags: req.tags.clone(),
            visibility: req.visibility,
            created_at: now_rfc3339_micros(),
            size_bytes: req.data.len() as u64,
            content_type: req.content_type.clone(),
            filename: sanitize_filename(&req.filename),
        };

        self.bounded("object put", self.store.put(&object_key, req.data))
            .await?;

        if let Err(index_err) = self
            .bounded("index put", self.index.put(record.clone()))
            .await
        {
            // Compensate so the stored bytes do not outlive the failed
            // index write. Best effort: a failed compensation leaves an
            // orphan object, which is reclaimable offline.
            match self
                .bounded("compensating delete", self.store.delete(&object_key))
                .await
            {
                Ok(()) => {
                    info!(%asset_id, "rolled back object after index failure");
                }
                Err(delete_err) => {
                    warn!(
                        %asset_id,
                        %object_key,
                        error = %delete_err,
                        "orphaned object: compensating delete failed"
                    );
                }
            }
            return Err(index_err);
        }

        let url = self
            .bounded(
                "presign",
                self.store.presign_get(&object_key, self.presign_ttl),
            )
            .await?;

        info!(%asset_id, owner_id = %record.owner_id, size = record.size_bytes, "image uploaded");
        Ok((record, url))
    }

    fn validate_upload(&self, req: &UploadRequest) -> Result<(), ServiceError> {
        validate_owner_id(&req.owner_id)?;
        if req.category.trim().is_empty() {
            return Err(ServiceError::validation("category must not be empty"));
        }
        if !req.content_type.starts_with("image/") {
            return Err(ServiceError::validation(format!(
                "content type must be an image type, got '{}'",
                req.content_type
            )));
        }
        if req.data.is_empty() {
            return Err(ServiceError::validation("uploaded file is empty"));
        }
        if req.data.len() as u64 > self.max_upload_bytes {
            return Err(ServiceError::validation(format!(
                "file exceeds the maximum size of {} bytes",
                self.max_upload_bytes
            )));
        }
        if !self.allowed_extensions.is_empty() {
            let ext = req
                .filename
                .rsplit_once('.')
                .map(|(_, e)| e.to_ascii_lowercase())
                .unwrap_or_default();
            if !self.allowed_extensions.iter().any(|a| *a == ext) {
                return Err(ServiceError::validation(format!(
                    "file extension must be one of: {}",
                    self.allowed_extensions.join(", ")
                )));
            }
        }
        Ok(())
    }

    // ── Retrieval ───────────────────────────────────────────────────

    /// Fetch one record plus a fresh presigned download URL.
    ///
    /// Reads take no credential; knowing the asset id is the
    /// capability, and the returned link expires on its own.
    pub async fn get(&self, asset_id: &str) -> Result<(AssetRecord, String), ServiceError> {
        let record = self
            .bounded("index get", self.index.get(asset_id))
            .await?;

        let url = self
            .bounded(
                "presign",
                self.store.presign_get(&record.object_key, self.presign_ttl),
            )
            .await?;
        Ok((record, url))
    }

    /// Owner-scoped listing with filters and cursor pagination.
    pub async fn list(
        &self,
        owner_id: &str,
        filters: &ListFilters,
        order: SortOrder,
        limit: u32,
        cursor_token: Option<&str>,
    ) -> Result<ListResult, ServiceError> {
        validate_owner_id(owner_id)?;
        if limit == 0 {
            return Err(ServiceError::validation("limit must be at least 1"));
        }

        let cursor = match cursor_token {
            Some(token) => {
                let cursor = PageCursor::decode(token)?;
                if cursor.owner_id != owner_id {
                    return Err(ServiceError::validation(
                        "cursor does not belong to this owner",
                    ));
                }
                Some(cursor)
            }
            None => None,
        };

        let page = self
            .bounded(
                "index list",
                self.index
                    .list(owner_id, filters, order, limit, cursor.as_ref()),
            )
            .await?;

        Ok(ListResult {
            records: page.records,
            next_cursor: page.next_cursor.map(|c| c.encode()),
        })
    }

    // ── Deletion ────────────────────────────────────────────────────

    /// Delete up to [`MAX_BULK_DELETE`] assets, reporting a per-id
    /// outcome. The index record is removed before the object so a
    /// partial failure never leaves a record pointing at deleted bytes.
    pub async fn delete_bulk(
        &self,
        credential: &str,
        owner_id: &str,
        asset_ids: &[String],
    ) -> Result<DeleteSummary, ServiceError> {
        validate_owner_id(owner_id)?;
        if asset_ids.is_empty() {
            return Err(ServiceError::validation("no asset ids given"));
        }
        if asset_ids.len() > MAX_BULK_DELETE {
            return Err(ServiceError::validation(format!(
                "at most {MAX_BULK_DELETE} assets may be deleted per request"
            )));
        }
        self.gate.authorize(credential, owner_id).await?;

        let mut summary = DeleteSummary::default();
        for asset_id in asset_ids {
            match self.delete_one(owner_id, asset_id).await {
                Ok(()) => summary.deleted.push(asset_id.clone()),
                Err(reason) => summary.failed.push(DeleteFailure {
                    asset_id: asset_id.clone(),
                    reason,
                }),
            }
        }

        info!(
            owner_id,
            deleted = summary.deleted.len(),
            failed = summary.failed.len(),
            "bulk delete finished"
        );
        Ok(summary)
    }

    /// Delete a single asset by id.
    ///
    /// The owning record decides whose credential is required, so a
    /// caller only needs the asset id plus their own credential.
    pub async fn delete(&self, credential: &str, asset_id: &str) -> Result<(), ServiceError> {
        let record = self.bounded("index get", self.index.get(asset_id)).await?;
        self.gate.authorize(credential, &record.owner_id).await?;

        self.bounded("index delete", self.index.delete(asset_id))
            .await?;

        if let Err(e) = self
            .bounded("object delete", self.store.delete(&record.object_key))
            .await
        {
            warn!(
                %asset_id,
                object_key = %record.object_key,
                error = %e,
                "orphaned object: delete failed after index removal"
            );
        }

        info!(%asset_id, owner_id = %record.owner_id, "image deleted");
        Ok(())
    }

    async fn delete_one(&self, owner_id: &str, asset_id: &str) -> Result<(), String> {
        let record = match self.bounded("index get", self.index.get(asset_id)).await {
            Ok(record) => record,
            Err(ServiceError::NotFound { .. }) => return Err("not_found".to_string()),
            Err(e) => return Err(e.code().to_string()),
        };
        if record.owner_id != owner_id {
            return Err("forbidden".to_string());
        }

        if let Err(e) = self
            .bounded("index delete", self.index.delete(asset_id))
            .await
        {
            return Err(e.code().to_string());
        }

        // The record is gone; a failed object delete only leaves an
        // orphan object, never a dangling record.
        if let Err(e) = self
            .bounded("object delete", self.store.delete(&record.object_key))
            .await
        {
            warn!(
                %asset_id,
                object_key = %record.object_key,
                error = %e,
                "orphaned object: delete failed after index removal"
            );
        }
        Ok(())
    }
}

/// Current time as a fixed-width RFC 3339 UTC string with microsecond
/// precision, so lexicographic order matches chronological order.
pub fn now_rfc3339_micros() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn validate_owner_id(owner_id: &str) -> Result<(), ServiceError> {
    if owner_id.is_empty() {
        return Err(ServiceError::validation("owner_id must not be empty"));
    }
    if owner_id.len() > MAX_OWNER_ID_LEN {
        return Err(ServiceError::validation(format!(
            "owner_id must be at most {MAX_OWNER_ID_LEN} characters"
        )));
    }
    if owner_id.contains('/') || owner_id.contains(':') {
        return Err(ServiceError::validation(
            "owner_id must not contain '/' or ':'",
        ));
    }
    Ok(())
}

/// Strip any path components and unusual characters from a client
/// supplied filename.
fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(255)
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
