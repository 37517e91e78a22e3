//! Read-only attributes derived from file stat data

use super::{MetadataSource, SourceContext};
use chrono::{DateTime, Utc};
use picmeta_codec::Segment;
use picmeta_common::{Attribute, Result, Value};
use std::time::SystemTime;

pub const FILE_NAME: &str = "FileName";
pub const FILE_SIZE: &str = "FileSize";
pub const DIRECTORY: &str = "Directory";
pub const LAST_WRITE_TIME: &str = "LastWriteTime";
pub const LAST_ACCESS_TIME: &str = "LastAccessTime";
pub const CREATION_TIME: &str = "CreationTime";

#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemSource;

fn datetime(time: SystemTime) -> Value {
    Value::datetime(DateTime::<Utc>::from(time).fixed_offset())
}

impl MetadataSource for FilesystemSource {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn read(&self, ctx: &SourceContext<'_>, _segments: &[Segment]) -> Result<Vec<Attribute>> {
        let mut attributes = Vec::with_capacity(6);

        if let Some(name) = ctx.path.file_name() {
            attributes.push(Attribute::metadata(
                FILE_NAME,
                Value::text(name.to_string_lossy()),
            ));
        }

        let size = i32::try_from(ctx.metadata.len()).unwrap_or(i32::MAX);
        attributes.push(Attribute::metadata(FILE_SIZE, Value::integer(size)));

        if let Some(dir) = ctx.path.parent().and_then(|p| p.file_name()) {
            attributes.push(Attribute::metadata(
                DIRECTORY,
                Value::text(dir.to_string_lossy()),
            ));
        }

        if let Ok(time) = ctx.metadata.modified() {
            attributes.push(Attribute::metadata(LAST_WRITE_TIME, datetime(time)));
        }
        if let Ok(time) = ctx.metadata.accessed() {
            attributes.push(Attribute::metadata(LAST_ACCESS_TIME, datetime(time)));
        }
        // Not every platform/filesystem records a birth time
        if let Ok(time) = ctx.metadata.created() {
            attributes.push(Attribute::metadata(CREATION_TIME, datetime(time)));
        }

        Ok(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context_for;

    #[test]
    fn test_stat_attributes() {
        let (_dir, path, metadata) = context_for();
        let ctx = SourceContext {
            path: &path,
            metadata: &metadata,
        };
        let attributes = FilesystemSource.read(&ctx, &[]).unwrap();
        let get = |name: &str| {
            attributes
                .iter()
                .find(|a| a.name() == name)
                .map(|a| a.value().clone())
        };

        assert!(attributes.iter().all(|a| !a.is_custom()));
        assert_eq!(get(FILE_NAME), Some(Value::text("photo.jpg")));
        assert_eq!(
            get(FILE_SIZE),
            Some(Value::integer(i32::try_from(metadata.len()).unwrap()))
        );
        let dir_name = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap();
        assert_eq!(get(DIRECTORY), Some(Value::text(dir_name)));
        assert!(get(LAST_WRITE_TIME).is_some_and(|v| v.as_datetime().is_some()));
        assert!(get(LAST_ACCESS_TIME).is_some());
    }
}
