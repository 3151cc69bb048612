//! Abstract metadata index trait and record types.
//!
//! Any index backend must implement [`MetadataIndex`].  The trait uses
//! `async_trait`-style methods (manual desugaring with pinned futures)
//! so it can be shared between the in-memory and SQLite backends.
//!
//! The index offers two access paths with immediate consistency:
//! a point lookup by `asset_id` and an owner-scoped range ordered by
//! `(created_at, asset_id)`, which is the pagination order.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use crate::errors::ServiceError;

/// Hard upper bound on a single page of the underlying scan.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size used when the caller does not supply a limit.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

// ── Record types ───────────────────────────────────────────────────

/// Asset visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    /// Parse from the wire form (`private` / `public`).
    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            other => Err(ServiceError::validation(format!(
                "visibility must be 'public' or 'private', got '{other}'"
            ))),
        }
    }

    /// The wire form of this visibility.
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }
}

/// Metadata record for one stored image.
///
/// Records are immutable after creation except for deletion; there is no
/// update-in-place path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Globally unique identifier, generated at upload time. Primary key.
    pub asset_id: String,
    /// Identifier of the uploading principal.
    pub owner_id: String,
    /// Opaque object-store key, derived from `asset_id`.
    pub object_key: String,
    /// Short classification string.
    pub category: String,
    /// Unordered tag set used for subset filtering.
    pub tags: BTreeSet<String>,
    /// Whether the asset is publicly visible.
    pub visibility: Visibility,
    /// RFC 3339 UTC creation timestamp with microsecond precision.
    /// Fixed-width, so lexicographic order is chronological order.
    pub created_at: String,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// MIME content type of the payload.
    pub content_type: String,
    /// Sanitized original filename.
    pub filename: String,
}

// ── Filters ─────────────────────────────────────────────────────────

/// Listing sort order over `created_at` (ties broken by `asset_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    /// Most-recent-first. The default.
    #[default]
    Descending,
}

/// Attribute filters applied to an owner-scoped listing.
///
/// Filters are applied to each fetched page after the owner+time scan,
/// so a page may contain fewer than `limit` matches even when more
/// matching records exist beyond it.
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    /// Exact category match.
    pub category: Option<String>,
    /// Subset match: every requested tag must be present on the record.
    pub tags: BTreeSet<String>,
    /// Exact visibility match.
    pub visibility: Option<Visibility>,
    /// Inclusive lower bound on `created_at` (RFC 3339).
    pub created_after: Option<String>,
    /// Inclusive upper bound on `created_at` (RFC 3339).
    pub created_before: Option<String>,
    /// Substring match on the stored filename.
    pub filename_contains: Option<String>,
}

impl ListFilters {
    /// Whether `record` satisfies every supplied filter.
    pub fn matches(&self, record: &AssetRecord) -> bool {
        if let Some(ref category) = self.category {
            if &record.category != category {
                return false;
            }
        }
        if !self.tags.is_subset(&record.tags) {
            return false;
        }
        if let Some(visibility) = self.visibility {
            if record.visibility != visibility {
                return false;
            }
        }
        if let Some(ref after) = self.created_after {
            if record.created_at.as_str() < after.as_str() {
                return false;
            }
        }
        if let Some(ref before) = self.created_before {
            if record.created_at.as_str() > before.as_str() {
                return false;
            }
        }
        if let Some(ref needle) = self.filename_contains {
            if !record.filename.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

// ── Cursor ──────────────────────────────────────────────────────────

/// Scan position of a paginated owner-scoped listing.
///
/// The cursor encodes the last-seen record of the *underlying scan*
/// (matching or not), never filter state.  It is serialized to an
/// opaque base64url token for the wire; callers echo it back unmodified
/// together with identical filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub owner_id: String,
    pub created_at: String,
    pub asset_id: String,
}

impl PageCursor {
    /// Position immediately after `record` in the scan order.
    pub fn after(record: &AssetRecord) -> Self {
        Self {
            owner_id: record.owner_id.clone(),
            created_at: record.created_at.clone(),
            asset_id: record.asset_id.clone(),
        }
    }

    /// Encode to the opaque wire token.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("cursor serialization cannot fail");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a wire token. Fails with `ValidationError` on any
    /// malformed input.
    pub fn decode(token: &str) -> Result<Self, ServiceError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ServiceError::validation("malformed pagination cursor"))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| ServiceError::validation("malformed pagination cursor"))
    }
}

/// One page of an owner-scoped listing.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Records on this page that matched the filters, in scan order.
    pub records: Vec<AssetRecord>,
    /// Position to resume from, present when the underlying scan has
    /// more entries beyond this page.
    pub next_cursor: Option<PageCursor>,
}

// ── Trait ───────────────────────────────────────────────────────────

/// Async metadata index contract.
pub trait MetadataIndex: Send + Sync + 'static {
    /// Insert a new record. Fails with `Conflict` if the `asset_id`
    /// already exists. The record is immediately visible to both
    /// `get` and `list`.
    fn put(
        &self,
        record: AssetRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>>;

    /// Point lookup by `asset_id`. Fails with `NotFound`.
    fn get(
        &self,
        asset_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AssetRecord, ServiceError>> + Send + '_>>;

    /// Owner-scoped listing ordered by `(created_at, asset_id)`.
    ///
    /// Scans at most `limit` entries (clamped to [`MAX_PAGE_SIZE`]) of
    /// the underlying owner range per call, applies `filters` to the
    /// scanned entries, and returns a cursor tracking the scan position
    /// when more entries exist beyond the page.
    fn list(
        &self,
        owner_id: &str,
        filters: &ListFilters,
        order: SortOrder,
        limit: u32,
        cursor: Option<&PageCursor>,
    ) -> Pin<Box<dyn Future<Output = Result<ListPage, ServiceError>> + Send + '_>>;

    /// Remove a record. Idempotent: deleting an unknown id is not an
    /// error at this layer.
    fn delete(
        &self,
        asset_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>>;
}

/// Clamp a caller-supplied page limit to the allowed range.
pub fn clamp_limit(limit: u32) -> u32 {
    limit.min(MAX_PAGE_SIZE)
}
