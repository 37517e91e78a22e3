//! Custom attributes mirrored into the XMP packet

use super::{MetadataSource, SourceContext};
use picmeta_codec::xmp::{decode_segments, encode_segments};
use picmeta_codec::Segment;
use picmeta_common::{Attribute, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct XmpSource;

impl MetadataSource for XmpSource {
    fn name(&self) -> &'static str {
        "xmp"
    }

    fn read(&self, _ctx: &SourceContext<'_>, segments: &[Segment]) -> Result<Vec<Attribute>> {
        decode_segments(segments)
    }

    fn write(&self, segments: &[Segment], attributes: &[Attribute]) -> Result<Vec<Segment>> {
        encode_segments(segments, attributes)
    }

    fn is_read_only(&self) -> bool {
        false
    }
}
