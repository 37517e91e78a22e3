//! Read-only camera metadata from the EXIF segment

use super::{MetadataSource, SourceContext};
use picmeta_codec::exif::{read_exif, EXIF_HEADER};
use picmeta_codec::jpeg::APP1;
use picmeta_codec::Segment;
use picmeta_common::{Attribute, Result};
use tracing::warn;

#[derive(Debug, Default, Clone, Copy)]
pub struct CameraSource;

impl MetadataSource for CameraSource {
    fn name(&self) -> &'static str {
        "camera"
    }

    /// A broken EXIF block never fails the load: it is logged and the
    /// source contributes nothing.
    fn read(&self, ctx: &SourceContext<'_>, segments: &[Segment]) -> Result<Vec<Attribute>> {
        let Some(segment) = segments.iter().find(|s| s.matches(APP1, EXIF_HEADER)) else {
            return Ok(Vec::new());
        };
        let base = segment.offset + 4 + EXIF_HEADER.len() as u64;
        match read_exif(&segment.payload[EXIF_HEADER.len()..], base) {
            Ok(attributes) => Ok(attributes),
            Err(e) => {
                warn!("Ignoring malformed EXIF in {}: {}", ctx.path.display(), e);
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_segments, context_for, exif_segment};
    use picmeta_common::Value;

    #[test]
    fn test_reads_camera_attributes() {
        let (_dir, path, metadata) = context_for();
        let ctx = SourceContext {
            path: &path,
            metadata: &metadata,
        };
        let mut segments = base_segments();
        segments.insert(1, exif_segment("Nikon", "Z6"));

        let attributes = CameraSource.read(&ctx, &segments).unwrap();
        assert!(attributes.contains(&Attribute::metadata("CameraMaker", Value::text("Nikon"))));
        assert!(attributes.contains(&Attribute::metadata("CameraModel", Value::text("Z6"))));
    }

    #[test]
    fn test_malformed_exif_contributes_nothing() {
        let (_dir, path, metadata) = context_for();
        let ctx = SourceContext {
            path: &path,
            metadata: &metadata,
        };
        let mut segments = base_segments();
        segments.insert(1, Segment::new(APP1, &b"Exif\0\0MM\x00\x2a\xff\xff\xff\xff"[..]));
        assert!(CameraSource.read(&ctx, &segments).unwrap().is_empty());
    }

    #[test]
    fn test_write_is_passthrough() {
        let mut segments = base_segments();
        segments.insert(1, exif_segment("Nikon", "Z6"));
        let written = CameraSource
            .write(&segments, &[Attribute::int("rating", 1)])
            .unwrap();
        assert_eq!(written, segments);
        assert!(CameraSource.is_read_only());
    }
}
