//! JPEG segment container codec
//!
//! A JPEG file up to the start of scan is a sequence of segments:
//! ```text
//! FF D8                                  Start-Of-Image (no payload)
//! FF Ex  len:u16be  payload[len-2]       APPn and other marker segments
//! ...
//! FF DA                                  Start-Of-Scan, enumeration stops
//! <scan data ... FF D9>                  opaque, copied verbatim
//! ```
//! Markers `D0..=DA` carry no length and no payload.

mod reader;
mod split;
mod writer;

pub use reader::JpegSegmentReader;
pub use split::{join_payload, split_payload, split_payload_with_limit};
pub use writer::JpegSegmentWriter;

use bytes::Bytes;

/// Marker prefix byte
pub const MARKER_PREFIX: u8 = 0xFF;
/// Start-Of-Image
pub const SOI: u8 = 0xD8;
/// End-Of-Image
pub const EOI: u8 = 0xD9;
/// Start-Of-Scan
pub const SOS: u8 = 0xDA;
/// JFIF application segment
pub const APP0: u8 = 0xE0;
/// EXIF / XMP / custom attribute application segment
pub const APP1: u8 = 0xE1;
/// Largest payload a single segment can carry: the `u16` length field
/// counts its own two bytes
pub const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

/// Whether a marker is followed by a length and payload
#[must_use]
pub const fn has_payload(marker: u8) -> bool {
    !matches!(marker, 0xD0..=0xDA)
}

/// Whether a marker is one of the APPn application segments
#[must_use]
pub const fn is_app_marker(marker: u8) -> bool {
    matches!(marker, 0xE0..=0xEF)
}

/// One segment of a JPEG container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Marker type byte (the byte after `0xFF`)
    pub marker: u8,
    /// Payload without the length field
    pub payload: Bytes,
    /// Position of the marker prefix in the source file, 0 for new segments
    pub offset: u64,
}

impl Segment {
    /// New segment not yet placed in a file
    pub fn new(marker: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            marker,
            payload: payload.into(),
            offset: 0,
        }
    }

    /// Payload-less marker segment
    #[must_use]
    pub const fn marker_only(marker: u8) -> Self {
        Self {
            marker,
            payload: Bytes::new(),
            offset: 0,
        }
    }

    /// Whether this segment is an `marker` segment whose payload starts with
    /// `header`
    #[must_use]
    pub fn matches(&self, marker: u8, header: &[u8]) -> bool {
        self.marker == marker && self.payload.starts_with(header)
    }

    /// Size of the segment on disk
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        if has_payload(self.marker) {
            4 + self.payload.len()
        } else {
            2
        }
    }
}

/// Index at which new application segments go: after SOI and every leading
/// APPn segment
#[must_use]
pub fn app_insert_position(segments: &[Segment]) -> usize {
    segments
        .iter()
        .position(|s| s.marker != SOI && !is_app_marker(s.marker))
        .unwrap_or(segments.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_range() {
        assert!(!has_payload(SOI));
        assert!(!has_payload(SOS));
        assert!(!has_payload(0xD3));
        assert!(has_payload(APP1));
        assert!(has_payload(0xDB));
    }

    #[test]
    fn test_app_insert_position() {
        let segments = vec![
            Segment::marker_only(SOI),
            Segment::new(APP0, &b"JFIF\0"[..]),
            Segment::new(0xDB, vec![0u8; 65]),
            Segment::marker_only(SOS),
        ];
        assert_eq!(app_insert_position(&segments), 2);
        assert_eq!(app_insert_position(&segments[..1]), 1);
    }
}
