//! Metadata sources
//!
//! Each source owns a disjoint slice of a file's metadata: its own segments
//! (matched by header) or, for the filesystem source, the stat data. Reads
//! see the full segment list; writes take a segment list and return a new
//! one, touching only the segments the source owns.

mod camera;
mod filesystem;
mod records;
mod xmp;

pub use camera::CameraSource;
pub use filesystem::FilesystemSource;
pub use records::{CustomRecordSource, RECORD_HEADER};
pub use xmp::XmpSource;

use picmeta_codec::jpeg::app_insert_position;
use picmeta_codec::Segment;
use picmeta_common::{Attribute, Result};
use std::fs;
use std::path::Path;

/// What a source may look at besides the segments
pub struct SourceContext<'a> {
    pub path: &'a Path,
    pub metadata: &'a fs::Metadata,
}

/// One independent metadata encoder/decoder
pub trait MetadataSource: Send + Sync {
    /// Short name for logs and diagnostics
    fn name(&self) -> &'static str;

    /// Decode this source's attributes
    fn read(&self, ctx: &SourceContext<'_>, segments: &[Segment]) -> Result<Vec<Attribute>>;

    /// Produce a new segment list carrying `attributes`
    ///
    /// Read-only sources keep the default, which returns the list unchanged.
    fn write(&self, segments: &[Segment], _attributes: &[Attribute]) -> Result<Vec<Segment>> {
        Ok(segments.to_vec())
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// New list with every segment matched by `owned` removed and `replacement`
/// put where the first owned segment was (or after the leading application
/// segments when there was none)
pub(crate) fn replace_owned(
    segments: &[Segment],
    owned: impl Fn(&Segment) -> bool,
    replacement: Vec<Segment>,
) -> Vec<Segment> {
    let mut out = Vec::with_capacity(segments.len() + replacement.len());
    let mut replacement = Some(replacement);
    for segment in segments {
        if owned(segment) {
            if let Some(new) = replacement.take() {
                out.extend(new);
            }
        } else {
            out.push(segment.clone());
        }
    }
    if let Some(new) = replacement {
        let at = app_insert_position(&out);
        out.splice(at..at, new);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use picmeta_codec::jpeg::{APP0, APP1, SOI, SOS};

    #[test]
    fn test_replace_owned_in_place() {
        let segments = vec![
            Segment::marker_only(SOI),
            Segment::new(APP1, &b"mine-1"[..]),
            Segment::new(APP0, &b"JFIF\0"[..]),
            Segment::new(APP1, &b"mine-2"[..]),
            Segment::marker_only(SOS),
        ];
        let out = replace_owned(
            &segments,
            |s| s.payload.starts_with(b"mine"),
            vec![Segment::new(APP1, &b"mine-new"[..])],
        );
        let payloads: Vec<&[u8]> = out.iter().map(|s| s.payload.as_ref()).collect();
        assert_eq!(payloads, vec![&b""[..], &b"mine-new"[..], &b"JFIF\0"[..], &b""[..]]);
    }

    #[test]
    fn test_replace_owned_inserts_after_app_segments() {
        let segments = vec![
            Segment::marker_only(SOI),
            Segment::new(APP0, &b"JFIF\0"[..]),
            Segment::new(0xDB, vec![0u8; 4]),
            Segment::marker_only(SOS),
        ];
        let out = replace_owned(&segments, |_| false, vec![Segment::new(APP1, &b"x"[..])]);
        assert_eq!(out.len(), 5);
        assert_eq!(out[2].marker, APP1);

        let removed = replace_owned(&out, |s| s.marker == APP1, Vec::new());
        assert_eq!(removed, segments);
    }
}
