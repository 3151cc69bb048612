//! In-memory metadata index.
//!
//! Keeps all records in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock` for thread-safe access.
//!
//! Two structures are maintained in lockstep under the same lock, so
//! point lookups and the owner-ordered listing are always mutually
//! consistent: a `HashMap` keyed by `asset_id` (primary) and a per-owner
//! `BTreeMap` keyed by `(created_at, asset_id)` (secondary ordering).

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{
    clamp_limit, AssetRecord, ListFilters, ListPage, MetadataIndex, PageCursor, SortOrder,
};
use crate::errors::ServiceError;

/// Secondary ordering key within one owner's range.
type OwnerScanKey = (String, String); // (created_at, asset_id)

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, AssetRecord>,
    by_owner: HashMap<String, BTreeMap<OwnerScanKey, String>>,
}

pub struct MemoryIndex {
    inner: RwLock<Inner>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataIndex for MemoryIndex {
    fn put(
        &self,
        record: AssetRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.records.contains_key(&record.asset_id) {
                return Err(ServiceError::Conflict {
                    asset_id: record.asset_id,
                });
            }
            let scan_key = (record.created_at.clone(), record.asset_id.clone());
            inner
                .by_owner
                .entry(record.owner_id.clone())
                .or_default()
                .insert(scan_key, record.asset_id.clone());
            inner.records.insert(record.asset_id.clone(), record);
            Ok(())
        })
    }

    fn get(
        &self,
        asset_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AssetRecord, ServiceError>> + Send + '_>> {
        let asset_id = asset_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            inner
                .records
                .get(&asset_id)
                .cloned()
                .ok_or(ServiceError::NotFound { asset_id })
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
            let limit = clamp_limit(limit).max(1) as usize;
            let inner = self.inner.read().expect("rwlock poisoned");

            let empty = BTreeMap::new();
            let owner_map = inner.by_owner.get(&owner_id).unwrap_or(&empty);

            let iter: Box<dyn Iterator<Item = (&OwnerScanKey, &String)>> = match (order, &cursor) {
                (SortOrder::Descending, Some(c)) => {
                    let bound = (c.created_at.clone(), c.asset_id.clone());
                    // RangeTo excludes the cursor position itself.
                    Box::new(owner_map.range(..bound).rev())
                }
                (SortOrder::Descending, None) => Box::new(owner_map.iter().rev()),
                (SortOrder::Ascending, Some(c)) => {
                    let bound = (c.created_at.clone(), c.asset_id.clone());
                    Box::new(owner_map.range((Bound::Excluded(bound), Bound::Unbounded)))
                }
                (SortOrder::Ascending, None) => Box::new(owner_map.iter()),
            };

            // Scan one bounded page of the underlying owner range; the
            // cursor tracks the last scanned entry, not the last match.
            let mut scanned_ids: Vec<&String> = Vec::with_capacity(limit);
            let mut last_scanned: Option<&OwnerScanKey> = None;
            let mut more = false;
            for (key, id) in iter {
                if scanned_ids.len() == limit {
                    more = true;
                    break;
                }
                scanned_ids.push(id);
                last_scanned = Some(key);
            }

            let records: Vec<AssetRecord> = scanned_ids
                .iter()
                .filter_map(|id| inner.records.get(*id))
                .filter(|r| filters.matches(r))
                .cloned()
                .collect();

            let next_cursor = if more {
                last_scanned.map(|(created_at, asset_id)| PageCursor {
                    owner_id: owner_id.clone(),
                    created_at: created_at.clone(),
                    asset_id: asset_id.clone(),
                })
            } else {
                None
            };

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
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if let Some(record) = inner.records.remove(&asset_id) {
                let owner_empty = match inner.by_owner.get_mut(&record.owner_id) {
                    Some(owner_map) => {
                        owner_map.remove(&(record.created_at.clone(), record.asset_id.clone()));
                        owner_map.is_empty()
                    }
                    None => false,
                };
                if owner_empty {
                    inner.by_owner.remove(&record.owner_id);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::store::Visibility;
    use std::collections::BTreeSet;

    fn make_record(owner: &str, id: &str, ts: &str, tags: &[&str]) -> AssetRecord {
        AssetRecord {
            asset_id: id.to_string(),
            owner_id: owner.to_string(),
            object_key: format!("images/{owner}/{id}"),
            category: "post".to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            visibility: Visibility::Public,
            created_at: ts.to_string(),
            size_bytes: 100,
            content_type: "image/jpeg".to_string(),
            filename: format!("{id}.jpg"),
        }
    }

    fn ts(n: u32) -> String {
        format!("2026-08-01T12:00:{n:02}.000000Z")
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let index = MemoryIndex::new();
        index
            .put(make_record("u1", "a1", &ts(0), &["sunset"]))
            .await
            .unwrap();

        let fetched = index.get("a1").await.unwrap();
        assert_eq!(fetched.owner_id, "u1");
        assert_eq!(fetched.category, "post");
        assert!(fetched.tags.contains("sunset"));
    }

    #[tokio::test]
    async fn test_put_duplicate_is_conflict() {
        let index = MemoryIndex::new();
        index
            .put(make_record("u1", "a1", &ts(0), &[]))
            .await
            .unwrap();
        let err = index
            .put(make_record("u1", "a1", &ts(1), &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let index = MemoryIndex::new();
        let err = index.get("nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_put_is_immediately_listable() {
        let index = MemoryIndex::new();
        index
            .put(make_record("u1", "a1", &ts(0), &[]))
            .await
            .unwrap();
        let page = index
            .list("u1", &ListFilters::default(), SortOrder::Descending, 10, None)
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].asset_id, "a1");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let index = MemoryIndex::new();
        index
            .put(make_record("u1", "a1", &ts(0), &[]))
            .await
            .unwrap();
        index.delete("a1").await.unwrap();
        // Second delete of the same id is not an error.
        index.delete("a1").await.unwrap();
        assert!(index.get("a1").await.is_err());
        let page = index
            .list("u1", &ListFilters::default(), SortOrder::Descending, 10, None)
            .await
            .unwrap();
        assert!(page.records.is_empty());
    }

    #[tokio::test]
    async fn test_default_order_is_descending() {
        let index = MemoryIndex::new();
        for i in 0..3 {
            index
                .put(make_record("u1", &format!("a{i}"), &ts(i), &[]))
                .await
                .unwrap();
        }
        let page = index
            .list("u1", &ListFilters::default(), SortOrder::Descending, 10, None)
            .await
            .unwrap();
        let ids: Vec<&str> = page.records.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1", "a0"]);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_cursor_pagination_no_duplicates_no_omissions() {
        let index = MemoryIndex::new();
        let n = 7;
        for i in 0..n {
            index
                .put(make_record("u1", &format!("a{i}"), &ts(i), &[]))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = index
                .list(
                    "u1",
                    &ListFilters::default(),
                    SortOrder::Descending,
                    3,
                    cursor.as_ref(),
                )
                .await
                .unwrap();
            seen.extend(page.records.iter().map(|r| r.asset_id.clone()));
            match page.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        assert_eq!(seen.len(), n as usize);
        let expected: Vec<String> = (0..n).rev().map(|i| format!("a{i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_ascending_pagination() {
        let index = MemoryIndex::new();
        for i in 0..5 {
            index
                .put(make_record("u1", &format!("a{i}"), &ts(i), &[]))
                .await
                .unwrap();
        }
        let first = index
            .list("u1", &ListFilters::default(), SortOrder::Ascending, 2, None)
            .await
            .unwrap();
        assert_eq!(first.records[0].asset_id, "a0");
        assert_eq!(first.records[1].asset_id, "a1");

        let second = index
            .list(
                "u1",
                &ListFilters::default(),
                SortOrder::Ascending,
                2,
                first.next_cursor.as_ref(),
            )
            .await
            .unwrap();
        assert_eq!(second.records[0].asset_id, "a2");
        assert_eq!(second.records[1].asset_id, "a3");
    }

    #[tokio::test]
    async fn test_timestamp_ties_broken_by_asset_id() {
        let index = MemoryIndex::new();
        let same = ts(0);
        for id in ["b", "a", "c"] {
            index.put(make_record("u1", id, &same, &[])).await.unwrap();
        }
        let page = index
            .list("u1", &ListFilters::default(), SortOrder::Descending, 10, None)
            .await
            .unwrap();
        let ids: Vec<&str> = page.records.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        // Paging through ties must not skip or duplicate.
        let first = index
            .list("u1", &ListFilters::default(), SortOrder::Descending, 2, None)
            .await
            .unwrap();
        let rest = index
            .list(
                "u1",
                &ListFilters::default(),
                SortOrder::Descending,
                2,
                first.next_cursor.as_ref(),
            )
            .await
            .unwrap();
        let mut all: Vec<&str> = first.records.iter().map(|r| r.asset_id.as_str()).collect();
        all.extend(rest.records.iter().map(|r| r.asset_id.as_str()));
        assert_eq!(all, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_cursor_tracks_scan_position_past_non_matches() {
        let index = MemoryIndex::new();
        // Only even-numbered records carry the tag.
        for i in 0..6 {
            let tags: &[&str] = if i % 2 == 0 { &["keep"] } else { &[] };
            index
                .put(make_record("u1", &format!("a{i}"), &ts(i), tags))
                .await
                .unwrap();
        }
        let mut filters = ListFilters::default();
        filters.tags = ["keep"].iter().map(|s| s.to_string()).collect();

        // Page of 3 underlying entries (a5, a4, a3) yields fewer matches
        // than the limit, but the cursor still advances past a3.
        let first = index
            .list("u1", &filters, SortOrder::Descending, 3, None)
            .await
            .unwrap();
        let ids: Vec<&str> = first.records.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["a4"]);
        let cursor = first.next_cursor.expect("more entries remain");
        assert_eq!(cursor.asset_id, "a3");

        let second = index
            .list("u1", &filters, SortOrder::Descending, 3, Some(&cursor))
            .await
            .unwrap();
        let ids: Vec<&str> = second.records.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a0"]);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_listing_is_owner_scoped() {
        let index = MemoryIndex::new();
        index
            .put(make_record("u1", "a1", &ts(0), &[]))
            .await
            .unwrap();
        index
            .put(make_record("u2", "b1", &ts(1), &[]))
            .await
            .unwrap();

        let page = index
            .list("u1", &ListFilters::default(), SortOrder::Descending, 10, None)
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].asset_id, "a1");
    }

    #[tokio::test]
    async fn test_writes_behind_cursor_do_not_disturb_scan() {
        let index = MemoryIndex::new();
        for i in 2..6 {
            index
                .put(make_record("u1", &format!("a{i}"), &ts(i), &[]))
                .await
                .unwrap();
        }
        let first = index
            .list("u1", &ListFilters::default(), SortOrder::Descending, 2, None)
            .await
            .unwrap();
        let cursor = first.next_cursor.clone().unwrap();

        // A record newer than the cursor position (inserted "behind" a
        // descending scan) must not be duplicated on later pages.
        index
            .put(make_record("u1", "a9", &ts(9), &[]))
            .await
            .unwrap();

        let second = index
            .list(
                "u1",
                &ListFilters::default(),
                SortOrder::Descending,
                10,
                Some(&cursor),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = second.records.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["a3", "a2"]);
    }

    #[tokio::test]
    async fn test_concrete_sunset_scenario() {
        let index = MemoryIndex::new();
        index
            .put(make_record("u1", "a0", &ts(0), &["sunset"]))
            .await
            .unwrap();
        index
            .put(make_record("u1", "a1", &ts(1), &["sunset", "beach"]))
            .await
            .unwrap();
        index
            .put(make_record("u1", "a2", &ts(2), &["city"]))
            .await
            .unwrap();

        let mut filters = ListFilters::default();
        filters.tags = ["sunset"].iter().map(|s| s.to_string()).collect();
        let page = index
            .list("u1", &filters, SortOrder::Descending, 10, None)
            .await
            .unwrap();
        let ids: Vec<&str> = page.records.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a0"]);
    }
}
