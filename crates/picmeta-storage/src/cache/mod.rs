//! Accelerated attribute cache

mod error;
mod store;
pub mod tables;

pub use error::{CacheError, CacheResult};
pub use store::{CacheStats, CacheStore, FlushReport};
