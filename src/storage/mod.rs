//! Object storage: trait, presigning, and backends.

pub mod backend;
pub mod local;
pub mod memory;
pub mod presign;
pub mod s3;

pub use backend::ObjectStore;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use presign::UrlSigner;
pub use s3::S3Store;
