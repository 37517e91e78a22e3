//! picmeta Storage - attribute storage engine
//!
//! This crate provides:
//! - Metadata sources (filesystem, camera, custom records, XMP) and the
//!   composite codec that merges them
//! - `FileStore`: attributes read from and written into image files, with
//!   atomic replacement on write
//! - `CacheStore`: a redb-backed write-behind cache of attribute sets
//! - `CachedStorage`: the file store behind the cache
//! - `EntityManager`: one shared live entity per path

pub mod cache;
pub mod cached;
pub mod compose;
pub mod file_store;
pub mod manager;
pub mod source;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use cache::{CacheError, CacheStats, CacheStore};
pub use cached::CachedStorage;
pub use compose::MetadataCodec;
pub use file_store::FileStore;
pub use manager::{EntityHandle, EntityManager};
pub use source::{MetadataSource, SourceContext};
pub use storage::AttributeStorage;
