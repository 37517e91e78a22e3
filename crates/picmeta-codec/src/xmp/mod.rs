//! XMP packets carrying custom attributes
//!
//! Custom attributes live in their own `rdf:Description` under a private
//! namespace:
//! ```text
//! <rdf:Description rdf:about="" xmlns:attr="http://ns.picmeta.dev/attributes/1.0/">
//!  <attr:attributes>
//!   <rdf:Bag>
//!    <rdf:li rdf:parseType="Resource">
//!     <attr:name>rating</attr:name>
//!     <attr:type>int</attr:type>
//!     <attr:value>5</attr:value>
//!    </rdf:li>
//!   </rdf:Bag>
//!  </attr:attributes>
//! </rdf:Description>
//! ```
//! Every other description in the packet belongs to someone else and is
//! carried through unchanged. When the packet does not fit in one APP1
//! segment our description moves to an extended packet and the standard
//! packet only announces it with `xmpNote:HasExtendedXMP`.

mod extended;
mod reader;
mod writer;

pub use extended::{extended_guid, join_extended, split_extended, GUID_LEN};
pub use reader::parse_packet;

use crate::jpeg::{app_insert_position, Segment, APP1, MAX_SEGMENT_PAYLOAD};
use picmeta_common::{Attribute, Error, Result, Value};
use tracing::{debug, warn};
use writer::Payload;

/// Payload header of the standard XMP segment
pub const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
/// Payload header of extended XMP segments
pub const XMP_EXTENSION_HEADER: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";

/// Private namespace of the attribute array
pub const ATTRIBUTES_NS: &str = "http://ns.picmeta.dev/attributes/1.0/";
pub(crate) const ATTRIBUTES_PREFIX: &str = "attr";
pub(crate) const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub(crate) const XMP_NOTE_NS: &str = "http://ns.adobe.com/xmp/note/";
pub(crate) const X_NS: &str = "adobe:ns:meta/";

/// What a packet yielded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmpPacket {
    /// Custom attributes found in the private array
    pub attributes: Vec<Attribute>,
    /// GUID of the extended packet announced by `xmpNote:HasExtendedXMP`
    pub extended_guid: Option<String>,
}

fn is_standard(segment: &Segment) -> bool {
    segment.matches(APP1, XMP_HEADER)
}

fn is_extension(segment: &Segment) -> bool {
    segment.matches(APP1, XMP_EXTENSION_HEADER)
}

/// Decode the custom attributes stored in the XMP segments
pub fn decode_segments(segments: &[Segment]) -> Result<Vec<Attribute>> {
    let Some(standard) = segments.iter().find(|s| is_standard(s)) else {
        return Ok(Vec::new());
    };
    let base = standard.offset + 4 + XMP_HEADER.len() as u64;
    let packet = parse_packet(&standard.payload[XMP_HEADER.len()..], base)?;
    let mut attributes = packet.attributes;

    if let Some(guid) = packet.extended_guid {
        match join_extended(segments, &guid)? {
            Some(xml) => {
                let base = segments
                    .iter()
                    .find(|s| is_extension(s))
                    .map_or(0, |s| s.offset);
                attributes.extend(parse_packet(&xml, base)?.attributes);
            }
            None => warn!("Extended XMP packet {} is announced but missing", guid),
        }
    }
    Ok(attributes)
}

/// Rewrite the XMP segments so they carry exactly the custom attributes in
/// `attributes`
///
/// Returns a new segment list; segments that are not XMP pass through in
/// order. Foreign descriptions in an existing packet are kept.
pub fn encode_segments(segments: &[Segment], attributes: &[Attribute]) -> Result<Vec<Segment>> {
    let mut custom = Vec::new();
    for attribute in attributes.iter().filter(|a| a.is_custom()) {
        match attribute.value() {
            v if v.is_null() => debug!("Skipping null attribute '{}'", attribute.name()),
            Value::Image(_) => {
                return Err(Error::encode(
                    attribute.name(),
                    "image values cannot be stored in XMP",
                ));
            }
            _ => custom.push(attribute),
        }
    }

    let existing = segments
        .iter()
        .find(|s| is_standard(s))
        .map(|s| &s.payload[XMP_HEADER.len()..]);

    let payload = if custom.is_empty() {
        Payload::Nothing
    } else {
        Payload::Attributes(&custom)
    };
    let (body, kept) = writer::build_packet(existing, payload)?;

    let mut xmp_segments = Vec::new();
    if !custom.is_empty() || kept > 0 {
        let packet = writer::wrap_packet(&body);
        if XMP_HEADER.len() + packet.len() <= MAX_SEGMENT_PAYLOAD {
            xmp_segments.push(standard_segment(&packet));
        } else if custom.is_empty() {
            return Err(Error::encode("xmp", "packet exceeds a single segment"));
        } else {
            let extended = writer::build_extended(&custom)?;
            let guid = extended_guid(&extended);
            let (body, _) = writer::build_packet(existing, Payload::ExtendedStub(&guid))?;
            let packet = writer::wrap_packet(&body);
            if XMP_HEADER.len() + packet.len() > MAX_SEGMENT_PAYLOAD {
                return Err(Error::encode(
                    "xmp",
                    "foreign XMP content exceeds a single segment",
                ));
            }
            debug!(
                "Moving {} attributes to extended XMP {} ({} bytes)",
                custom.len(),
                guid,
                extended.len()
            );
            xmp_segments.push(standard_segment(&packet));
            xmp_segments.extend(split_extended(&guid, &extended)?);
        }
    }

    Ok(replace_segments(segments, xmp_segments))
}

fn standard_segment(packet: &[u8]) -> Segment {
    let mut payload = Vec::with_capacity(XMP_HEADER.len() + packet.len());
    payload.extend_from_slice(XMP_HEADER);
    payload.extend_from_slice(packet);
    Segment::new(APP1, payload)
}

/// Drop every XMP segment and put `replacement` where the standard packet
/// was, or after the leading application segments
fn replace_segments(segments: &[Segment], replacement: Vec<Segment>) -> Vec<Segment> {
    let mut out = Vec::with_capacity(segments.len() + replacement.len());
    let mut replacement = Some(replacement);
    for segment in segments {
        if is_standard(segment) {
            if let Some(new) = replacement.take() {
                out.extend(new);
            }
        } else if !is_extension(segment) {
            out.push(segment.clone());
        }
    }
    if let Some(new) = replacement {
        let at = app_insert_position(&out);
        out.splice(at..at, new);
    }
    out
}
