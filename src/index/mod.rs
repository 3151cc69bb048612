//! Metadata index: trait and backends.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;
pub use store::{
    clamp_limit, AssetRecord, ListFilters, ListPage, MetadataIndex, PageCursor, SortOrder,
    Visibility, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
