//! Attribute storage backed directly by the image files
//!
//! Writes never modify a file in place: the new file is assembled in a
//! temporary file next to the original and renamed over it.

use crate::compose::MetadataCodec;
use crate::source::{FilesystemSource, MetadataSource, SourceContext};
use crate::storage::AttributeStorage;
use chrono::{DateTime, Utc};
use picmeta_codec::{JpegSegmentReader, JpegSegmentWriter, Segment};
use picmeta_common::{Attribute, Entity, Error, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Last-write and last-access time of a file, epoch when unavailable
pub fn file_times(metadata: &fs::Metadata) -> (DateTime<Utc>, DateTime<Utc>) {
    let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
    let accessed = metadata.accessed().unwrap_or(modified);
    (modified.into(), accessed.into())
}

pub struct FileStore {
    codec: MetadataCodec,
}

impl FileStore {
    pub const fn new(codec: MetadataCodec) -> Self {
        Self { codec }
    }

    pub const fn codec(&self) -> &MetadataCodec {
        &self.codec
    }

    /// Segment list of the file at `path` (up to and including SOS)
    pub fn read_segments(&self, path: &Path) -> Result<Vec<Segment>> {
        let file = File::open(path).map_err(|e| Error::from_io(path, e))?;
        JpegSegmentReader::new(BufReader::new(file)).read_all()
    }

    /// Bring the timestamps and the filesystem attributes of `entity` in
    /// line with its file after a write
    pub fn restamp(&self, entity: &mut Entity) -> Result<()> {
        let metadata =
            fs::metadata(entity.path()).map_err(|e| Error::from_io(entity.path(), e))?;
        self.refresh(entity, &metadata)
    }

    /// Same as [`restamp`](Self::restamp) with stat data already at hand
    pub fn refresh(&self, entity: &mut Entity, metadata: &fs::Metadata) -> Result<()> {
        let (modified, accessed) = file_times(metadata);
        entity.set_times(modified, accessed);
        if self.codec.has_source(FilesystemSource.name()) {
            let ctx = SourceContext {
                path: entity.path(),
                metadata,
            };
            let refreshed = FilesystemSource.read(&ctx, &[])?;
            entity.extend(refreshed);
        }
        Ok(())
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(MetadataCodec::default())
    }
}

impl AttributeStorage for FileStore {
    fn load(&self, path: &Path) -> Result<Entity> {
        let file = File::open(path).map_err(|e| Error::from_io(path, e))?;
        let metadata = file.metadata()?;
        let segments = JpegSegmentReader::new(BufReader::new(file)).read_all()?;

        let ctx = SourceContext {
            path,
            metadata: &metadata,
        };
        let attributes = self.codec.read(&ctx, &segments)?;
        let (modified, accessed) = file_times(&metadata);
        debug!(
            "Loaded {} attributes from {} ({} segments)",
            attributes.len(),
            path.display(),
            segments.len()
        );
        Ok(Entity::from_attributes(path, attributes).with_times(modified, accessed))
    }

    fn store(&self, entity: &Entity) -> Result<()> {
        let path = entity.path();
        let file = File::open(path).map_err(|e| Error::from_io(path, e))?;
        let metadata = file.metadata()?;
        let mut reader = JpegSegmentReader::new(BufReader::new(file));
        let segments = reader.read_all()?;

        let attributes: Vec<Attribute> = entity.custom_attributes().cloned().collect();
        let rewritten = self.codec.write(&segments, &attributes)?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        // Reserve the space up front, trimmed to the real size below
        tmp.as_file().set_len(metadata.len())?;

        let mut rest = reader.into_inner();
        let written = {
            let mut writer = JpegSegmentWriter::new(BufWriter::new(tmp.as_file_mut()));
            writer.write_all(&rewritten)?;
            let (buffered, written) = writer.finish(&mut rest)?;
            buffered.into_inner().map_err(|e| Error::Io(e.into_error()))?;
            written
        };
        drop(rest);

        tmp.as_file().set_len(written)?;
        tmp.as_file().sync_all()?;
        fs::set_permissions(tmp.path(), metadata.permissions())?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;

        info!(
            "Stored {} custom attributes in {} ({} -> {} bytes)",
            attributes.len(),
            path.display(),
            metadata.len(),
            written
        );
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| Error::from_io(path, e))?;
        debug!("Removed {}", path.display());
        Ok(())
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        if to.exists() {
            return Err(Error::invalid_argument(format!(
                "target {} already exists",
                to.display()
            )));
        }
        fs::rename(from, to).map_err(|e| Error::from_io(from, e))?;
        debug!("Moved {} to {}", from.display(), to.display());
        Ok(())
    }
}
