//! Composite codec over the configured metadata sources

use crate::source::{
    CameraSource, CustomRecordSource, FilesystemSource, MetadataSource, SourceContext, XmpSource,
};
use picmeta_codec::jpeg::{SOI, SOS};
use picmeta_codec::Segment;
use picmeta_common::config::CodecConfig;
use picmeta_common::{Attribute, Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Ordered list of metadata sources
///
/// Reads run every source and merge by name, later sources overriding
/// earlier ones. Writes run the sources as a pipeline: each stage gets the
/// segment list produced by the previous one.
pub struct MetadataCodec {
    sources: Vec<Box<dyn MetadataSource>>,
}

impl MetadataCodec {
    pub fn new(sources: Vec<Box<dyn MetadataSource>>) -> Self {
        Self { sources }
    }

    /// Sources enabled in `config`, in the order filesystem, camera,
    /// custom records, XMP
    pub fn from_config(config: &CodecConfig) -> Self {
        let mut sources: Vec<Box<dyn MetadataSource>> = Vec::with_capacity(4);
        if config.filesystem {
            sources.push(Box::new(FilesystemSource));
        }
        if config.camera {
            sources.push(Box::new(CameraSource));
        }
        if config.custom_records {
            sources.push(Box::new(CustomRecordSource));
        }
        if config.xmp {
            sources.push(Box::new(XmpSource));
        }
        Self::new(sources)
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.name() == name)
    }

    /// Merged attributes of every source
    pub fn read(&self, ctx: &SourceContext<'_>, segments: &[Segment]) -> Result<Vec<Attribute>> {
        let mut merged: BTreeMap<String, Attribute> = BTreeMap::new();
        for source in &self.sources {
            let attributes = source.read(ctx, segments)?;
            debug!(
                "{}: {} attributes from {}",
                ctx.path.display(),
                attributes.len(),
                source.name()
            );
            for attribute in attributes {
                merged.insert(attribute.name().to_string(), attribute);
            }
        }
        Ok(merged.into_values().collect())
    }

    /// New segment list carrying `attributes`; the input list is untouched
    pub fn write(&self, segments: &[Segment], attributes: &[Attribute]) -> Result<Vec<Segment>> {
        check_structure("input", segments)?;
        let mut current = segments.to_vec();
        for source in self.sources.iter().filter(|s| !s.is_read_only()) {
            current = source.write(&current, attributes)?;
            check_structure(source.name(), &current)?;
        }
        Ok(current)
    }
}

impl Default for MetadataCodec {
    fn default() -> Self {
        Self::from_config(&CodecConfig::default())
    }
}

/// SOI first, and nothing after SOS
fn check_structure(stage: &str, segments: &[Segment]) -> Result<()> {
    if segments.first().map(|s| s.marker) != Some(SOI) {
        return Err(Error::invalid_argument(format!(
            "{stage}: segment list does not start with SOI"
        )));
    }
    if let Some(sos) = segments.iter().position(|s| s.marker == SOS) {
        if sos + 1 != segments.len() {
            return Err(Error::invalid_argument(format!(
                "{stage}: segments after SOS"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RECORD_HEADER;
    use crate::test_support::{base_segments, context_for, exif_segment};
    use picmeta_codec::jpeg::APP1;
    use picmeta_codec::xmp::XMP_HEADER;
    use picmeta_common::{AttributeSource, Value};

    #[test]
    fn test_default_order() {
        let codec = MetadataCodec::default();
        assert_eq!(
            codec.source_names(),
            vec!["filesystem", "camera", "custom", "xmp"]
        );
    }

    #[test]
    fn test_from_config_skips_disabled() {
        let config = CodecConfig {
            xmp: false,
            camera: false,
            ..Default::default()
        };
        let codec = MetadataCodec::from_config(&config);
        assert_eq!(codec.source_names(), vec!["filesystem", "custom"]);
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, path, metadata) = context_for();
        let ctx = SourceContext {
            path: &path,
            metadata: &metadata,
        };
        let codec = MetadataCodec::default();
        let mut segments = base_segments();
        segments.insert(1, exif_segment("Canon", "R5"));

        let attributes = vec![
            Attribute::int("rating", 4),
            Attribute::text("caption", "Quay"),
        ];
        let written = codec.write(&segments, &attributes).unwrap();

        assert!(written.iter().any(|s| s.matches(APP1, RECORD_HEADER)));
        assert!(written.iter().any(|s| s.matches(APP1, XMP_HEADER)));
        // EXIF untouched and still ahead of the new segments
        assert_eq!(written[1], segments[1]);

        let read = codec.read(&ctx, &written).unwrap();
        let custom: Vec<_> = read.iter().filter(|a| a.is_custom()).cloned().collect();
        let mut expected = attributes.clone();
        expected.sort_by(|a, b| a.name().cmp(b.name()));
        assert_eq!(custom, expected);
        assert!(read
            .iter()
            .any(|a| a.name() == "CameraMaker" && a.source() == AttributeSource::Metadata));
        assert!(read.iter().any(|a| a.name() == "FileName"));
    }

    #[test]
    fn test_later_source_wins() {
        let (_dir, path, metadata) = context_for();
        let ctx = SourceContext {
            path: &path,
            metadata: &metadata,
        };
        // Records and XMP disagree: XMP is read last
        let records = MetadataCodec::new(vec![Box::new(CustomRecordSource)])
            .write(&base_segments(), &[Attribute::int("rating", 1)])
            .unwrap();
        let both = MetadataCodec::new(vec![Box::new(XmpSource)])
            .write(&records, &[Attribute::int("rating", 5)])
            .unwrap();

        let read = MetadataCodec::default().read(&ctx, &both).unwrap();
        let rating = read.iter().find(|a| a.name() == "rating").unwrap();
        assert_eq!(rating.value(), &Value::integer(5));
    }

    #[test]
    fn test_write_leaves_input_untouched() {
        let codec = MetadataCodec::default();
        let segments = base_segments();
        let snapshot = segments.clone();
        let _ = codec
            .write(&segments, &[Attribute::text("caption", "x")])
            .unwrap();
        assert_eq!(segments, snapshot);
    }

    #[test]
    fn test_write_rejects_missing_soi() {
        let codec = MetadataCodec::default();
        let segments = base_segments()[1..].to_vec();
        let err = codec.write(&segments, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
