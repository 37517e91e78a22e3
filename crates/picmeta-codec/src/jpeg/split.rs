//! Splitting oversized payloads across consecutive segments
//!
//! Every physical segment repeats the identifying `header` followed by the
//! next chunk of data. Joining selects the segments carrying the header and
//! concatenates their chunks in stream order.

use super::{Segment, MAX_SEGMENT_PAYLOAD};
use bytes::{BufMut, BytesMut};
use picmeta_common::{Error, Result};

/// Split `data` into `marker` segments of at most [`MAX_SEGMENT_PAYLOAD`]
/// bytes each
pub fn split_payload(marker: u8, header: &[u8], data: &[u8]) -> Result<Vec<Segment>> {
    split_payload_with_limit(marker, header, data, MAX_SEGMENT_PAYLOAD)
}

/// Split with an explicit per-segment payload limit
///
/// Always yields at least one segment, so an empty payload still round-trips.
pub fn split_payload_with_limit(
    marker: u8,
    header: &[u8],
    data: &[u8],
    max_payload: usize,
) -> Result<Vec<Segment>> {
    let max_payload = max_payload.min(MAX_SEGMENT_PAYLOAD);
    if header.len() >= max_payload {
        return Err(Error::invalid_argument(format!(
            "header of {} bytes leaves no room in a {max_payload} byte segment",
            header.len()
        )));
    }
    let capacity = max_payload - header.len();

    let chunk = |part: &[u8]| {
        let mut payload = BytesMut::with_capacity(header.len() + part.len());
        payload.put_slice(header);
        payload.put_slice(part);
        Segment::new(marker, payload.freeze())
    };

    if data.is_empty() {
        return Ok(vec![chunk(data)]);
    }
    Ok(data.chunks(capacity).map(chunk).collect())
}

/// Concatenate the chunks of every `marker` segment starting with `header`
///
/// Returns `None` when no segment carries the header.
pub fn join_payload<'a>(
    segments: impl IntoIterator<Item = &'a Segment>,
    marker: u8,
    header: &[u8],
) -> Option<Vec<u8>> {
    let mut joined: Option<Vec<u8>> = None;
    for segment in segments {
        if segment.matches(marker, header) {
            joined
                .get_or_insert_with(Vec::new)
                .extend_from_slice(&segment.payload[header.len()..]);
        }
    }
    joined
}
