//! Custom attributes as binary records in private APP1 segments

use super::{replace_owned, MetadataSource, SourceContext};
use picmeta_codec::jpeg::{join_payload, split_payload, APP1};
use picmeta_codec::record::{encode_attributes, AttributeReader};
use picmeta_codec::Segment;
use picmeta_common::{Attribute, Result};

/// Payload header of attribute record segments
pub const RECORD_HEADER: &[u8] = b"Attr\0";

/// Reads and writes `Custom` attributes as a record stream split across
/// `Attr\0` segments
#[derive(Debug, Default, Clone, Copy)]
pub struct CustomRecordSource;

fn is_record_segment(segment: &Segment) -> bool {
    segment.matches(APP1, RECORD_HEADER)
}

impl MetadataSource for CustomRecordSource {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn read(&self, _ctx: &SourceContext<'_>, segments: &[Segment]) -> Result<Vec<Attribute>> {
        let Some(stream) = join_payload(segments, APP1, RECORD_HEADER) else {
            return Ok(Vec::new());
        };
        // Offsets are positions in the joined stream, based at the first
        // record segment's data
        let base = segments
            .iter()
            .find(|s| is_record_segment(s))
            .map_or(0, |s| s.offset + 4 + RECORD_HEADER.len() as u64);
        AttributeReader::with_offset(stream.as_slice(), base).read_all()
    }

    fn write(&self, segments: &[Segment], attributes: &[Attribute]) -> Result<Vec<Segment>> {
        let stream = encode_attributes(attributes)?;
        let replacement = if stream.is_empty() {
            Vec::new()
        } else {
            split_payload(APP1, RECORD_HEADER, &stream)?
        };
        Ok(replace_owned(segments, is_record_segment, replacement))
    }

    fn is_read_only(&self) -> bool {
        false
    }
}
