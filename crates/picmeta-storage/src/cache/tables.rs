//! Redb table definitions for the attribute cache.

use chrono::{DateTime, Utc};
use picmeta_common::Attribute;
use redb::TableDefinition;
use serde::{Deserialize, Serialize};

// Key: file path, Value: bincode-encoded FileRow
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
// Key: file path, Value: bincode-encoded Vec<Attribute>
pub const ATTRIBUTES: TableDefinition<&str, &[u8]> = TableDefinition::new("attributes");

/// Per-file bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRow {
    /// Write time of the file when its attributes were cached
    pub last_write_time: DateTime<Utc>,
    /// Last time the cached row was used, drives eviction
    pub last_access_time: DateTime<Utc>,
}

/// Attribute list as persisted
pub type AttributeRows = Vec<Attribute>;
