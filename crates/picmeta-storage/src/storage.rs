//! Attribute storage abstraction

use picmeta_common::{Entity, Result};
use std::path::Path;

/// Where entities are loaded from and persisted to
///
/// Implementations must be safe to call from several threads at once.
pub trait AttributeStorage: Send + Sync {
    /// Full attribute set of the file at `path`
    fn load(&self, path: &Path) -> Result<Entity>;

    /// Persist the custom attributes of `entity` into its file
    fn store(&self, entity: &Entity) -> Result<()>;

    /// Delete the file and everything known about it
    fn remove(&self, path: &Path) -> Result<()>;

    /// Rename a file; fails if `to` already exists
    fn move_path(&self, from: &Path, to: &Path) -> Result<()>;
}
