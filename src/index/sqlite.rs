//! SQLite-backed metadata index.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! The pagination order `(created_at, asset_id)` is served by a
//! composite index and keyset (`WHERE ... <`) queries, so each page is
//! an index seek rather than an OFFSET scan.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{
    clamp_limit, AssetRecord, ListFilters, ListPage, MetadataIndex, PageCursor, SortOrder,
    Visibility,
};
use crate::errors::ServiceError;

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Columns of the `assets` table in record order.
const ASSET_COLS: &str = "asset_id, owner_id, object_key, category, tags, visibility, \
                          created_at, size_bytes, content_type, filename";

/// Metadata index backed by a single SQLite database file.
pub struct SqliteIndex {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let index = Self {
            conn: Mutex::new(conn),
        };
        index.apply_pragmas()?;
        index.init_db()?;
        Ok(index)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// This is idempotent -- safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            -- Image asset records
            CREATE TABLE IF NOT EXISTS assets (
                asset_id     TEXT PRIMARY KEY,
                owner_id     TEXT NOT NULL,
                object_key   TEXT NOT NULL,
                category     TEXT NOT NULL,
                tags         TEXT NOT NULL DEFAULT '[]',
                visibility   TEXT NOT NULL DEFAULT 'private',
                created_at   TEXT NOT NULL,
                size_bytes   INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                filename     TEXT NOT NULL
            );

            -- Serves the owner-scoped keyset scan.
            CREATE INDEX IF NOT EXISTS idx_assets_owner_created
                ON assets(owner_id, created_at, asset_id);
            ",
        )?;

        // Record schema version if not already present.
        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.is_none() || existing.unwrap() < SCHEMA_VERSION {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now],
            )?;
        }

        Ok(())
    }
}

fn internal(e: rusqlite::Error) -> ServiceError {
    ServiceError::Internal(anyhow::Error::new(e))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetRecord> {
    let tags_json: String = row.get(4)?;
    let visibility: String = row.get(5)?;
    let size_bytes: i64 = row.get(7)?;
    Ok(AssetRecord {
        asset_id: row.get(0)?,
        owner_id: row.get(1)?,
        object_key: row.get(2)?,
        category: row.get(3)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        visibility: if visibility == "public" {
            Visibility::Public
        } else {
            Visibility::Private
        },
        created_at: row.get(6)?,
        size_bytes: size_bytes as u64,
        content_type: row.get(8)?,
        filename: row.get(9)?,
    })
}

impl MetadataIndex for SqliteIndex {
    fn put(
        &self,
        record: AssetRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let tags_json = serde_json::to_string(&record.tags)
                .map_err(|e| ServiceError::Internal(e.into()))?;
            let result = conn.execute(
                "INSERT INTO assets
                    (asset_id, owner_id, object_key, category, tags, visibility,
                     created_at, size_bytes, content_type, filename)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.asset_id,
                    record.owner_id,
                    record.object_key,
                    record.category,
                    tags_json,
                    record.visibility.as_str(),
                    record.created_at,
                    record.size_bytes as i64,
                    record.content_type,
                    record.filename,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(ServiceError::Conflict {
                        asset_id: record.asset_id,
                    })
                }
                Err(e) => Err(internal(e)),
            }
        })
    }

    fn get(
        &self,
        asset_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AssetRecord, ServiceError>> + Send + '_>> {
        let asset_id = asset_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    &format!("SELECT {ASSET_COLS} FROM assets WHERE asset_id = ?1"),
                    params![asset_id],
                    row_to_record,
                )
                .optional()
                .map_err(internal)?;
            result.ok_or(ServiceError::NotFound { asset_id })
        })
    }

    fn list(
        &self,
        owner_id: &str,
        filters: &ListFilters,
        order: SortOrder,
        limit: u32,
        cursor: Option<&PageCursor>,
    ) -> Pin<Box<dyn Future<Output = Result<ListPage, ServiceError>> + Send + '_>> {
        let owner_id = owner_id.to_string();
        let filters = filters.clone();
        let cursor = cursor.cloned();
        Box::pin(async move {
            let limit = clamp_limit(limit).max(1) as i64;
            let conn = self.conn.lock().expect("mutex poisoned");

            let (cmp, dir) = match order {
                SortOrder::Descending => ("<", "DESC"),
                SortOrder::Ascending => (">", "ASC"),
            };

            // Fetch one extra row past the page to learn whether the
            // underlying scan continues.
            let scanned: Vec<AssetRecord> = if let Some(c) = &cursor {
                let sql = format!(
                    "SELECT {ASSET_COLS} FROM assets
                     WHERE owner_id = ?1
                       AND (created_at {cmp} ?2 OR (created_at = ?2 AND asset_id {cmp} ?3))
                     ORDER BY created_at {dir}, asset_id {dir}
                     LIMIT ?4"
                );
                let mut stmt = conn.prepare(&sql).map_err(internal)?;
                let rows = stmt
                    .query_map(
                        params![owner_id, c.created_at, c.asset_id, limit + 1],
                        row_to_record,
                    )
                    .map_err(internal)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(internal)?
            } else {
                let sql = format!(
                    "SELECT {ASSET_COLS} FROM assets
                     WHERE owner_id = ?1
                     ORDER BY created_at {dir}, asset_id {dir}
                     LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql).map_err(internal)?;
                let rows = stmt
                    .query_map(params![owner_id, limit + 1], row_to_record)
                    .map_err(internal)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(internal)?
            };

            let more = scanned.len() as i64 > limit;
            let page = &scanned[..scanned.len().min(limit as usize)];

            let next_cursor = if more {
                page.last().map(PageCursor::after)
            } else {
                None
            };

            let records: Vec<AssetRecord> = page
                .iter()
                .filter(|r| filters.matches(r))
                .cloned()
                .collect();

            Ok(ListPage {
                records,
                next_cursor,
            })
        })
    }

    fn delete(
        &self,
        asset_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        let asset_id = asset_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute("DELETE FROM assets WHERE asset_id = ?1", params![asset_id])
                .map_err(internal)?;
            Ok(())
        })
    }
}
