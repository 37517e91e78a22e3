//! Extended XMP segments
//!
//! ```text
//! +--------------------------------------+------------+-----------+-----------+-------+
//! | http://ns.adobe.com/xmp/extension/\0 | GUID (32)  | full: u32 | off: u32  | data  |
//! +--------------------------------------+------------+-----------+-----------+-------+
//! ```
//! Lengths are big-endian. Chunks are placed by their offset field, not by
//! their position in the file.

use super::XMP_EXTENSION_HEADER;
use crate::jpeg::{Segment, APP1, MAX_SEGMENT_PAYLOAD};
use picmeta_common::{Error, Result};
use sha2::{Digest, Sha256};

/// Length of the hex GUID shared by all chunks of one packet
pub const GUID_LEN: usize = 32;

const CHUNK_HEADER_LEN: usize = XMP_EXTENSION_HEADER.len() + GUID_LEN + 8;

/// GUID for an extended packet: uppercase hex of the first 16 bytes of its
/// SHA-256
#[must_use]
pub fn extended_guid(packet: &[u8]) -> String {
    let digest = Sha256::digest(packet);
    hex::encode_upper(&digest[..GUID_LEN / 2])
}

/// Cut an extended packet into APP1 segments
pub fn split_extended(guid: &str, packet: &[u8]) -> Result<Vec<Segment>> {
    if guid.len() != GUID_LEN {
        return Err(Error::invalid_argument(format!(
            "extended XMP GUID must be {GUID_LEN} characters"
        )));
    }
    let full_len = u32::try_from(packet.len())
        .map_err(|_| Error::encode("xmp", "extended packet exceeds 4 GiB"))?;
    let capacity = MAX_SEGMENT_PAYLOAD - CHUNK_HEADER_LEN;

    let mut segments = Vec::with_capacity(packet.len().div_ceil(capacity).max(1));
    let mut offset = 0usize;
    loop {
        let end = (offset + capacity).min(packet.len());
        let mut payload = Vec::with_capacity(CHUNK_HEADER_LEN + end - offset);
        payload.extend_from_slice(XMP_EXTENSION_HEADER);
        payload.extend_from_slice(guid.as_bytes());
        payload.extend_from_slice(&full_len.to_be_bytes());
        // offset < full_len <= u32::MAX
        payload.extend_from_slice(&(offset as u32).to_be_bytes());
        payload.extend_from_slice(&packet[offset..end]);
        segments.push(Segment::new(APP1, payload));

        offset = end;
        if offset >= packet.len() {
            break;
        }
    }
    Ok(segments)
}

/// One chunk of an extended packet, borrowed from its segment
struct Chunk<'a> {
    segment_offset: u64,
    full_len: usize,
    offset: usize,
    data: &'a [u8],
}

fn be_u32(bytes: &[u8]) -> usize {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

/// Reassemble the extended packet with the given GUID
///
/// Returns `None` when no chunk carries the GUID. Inconsistent lengths,
/// chunks outside the declared length and gaps are decode errors. The
/// packet buffer is allocated only once the chunks present can fill it.
pub fn join_extended(segments: &[Segment], guid: &str) -> Result<Option<Vec<u8>>> {
    let mut chunks = Vec::new();
    for segment in segments
        .iter()
        .filter(|s| s.matches(APP1, XMP_EXTENSION_HEADER))
    {
        let body = &segment.payload[XMP_EXTENSION_HEADER.len()..];
        if body.len() < GUID_LEN + 8 {
            return Err(Error::decode(segment.offset, "extended XMP chunk header truncated"));
        }
        if &body[..GUID_LEN] != guid.as_bytes() {
            continue;
        }
        chunks.push(Chunk {
            segment_offset: segment.offset,
            full_len: be_u32(&body[GUID_LEN..]),
            offset: be_u32(&body[GUID_LEN + 4..]),
            data: &body[GUID_LEN + 8..],
        });
    }

    let Some(first) = chunks.first() else {
        return Ok(None);
    };
    let (full_len, first_offset) = (first.full_len, first.segment_offset);

    let mut present = 0usize;
    let mut ranges = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        if chunk.full_len != full_len {
            return Err(Error::decode(
                chunk.segment_offset,
                format!(
                    "extended XMP length mismatch: {full_len} vs {}",
                    chunk.full_len
                ),
            ));
        }
        let end = chunk
            .offset
            .checked_add(chunk.data.len())
            .filter(|&end| end <= full_len)
            .ok_or_else(|| {
                Error::decode(
                    chunk.segment_offset,
                    format!(
                        "extended XMP chunk at {} overruns length {full_len}",
                        chunk.offset
                    ),
                )
            })?;
        present += chunk.data.len();
        ranges.push((chunk.offset, end));
    }
    if present < full_len {
        return Err(Error::decode(
            first_offset,
            format!("extended XMP declares {full_len} bytes, chunks hold {present}"),
        ));
    }

    ranges.sort_unstable();
    let mut covered = 0;
    for &(start, end) in &ranges {
        if start > covered {
            break;
        }
        covered = covered.max(end);
    }
    if covered != full_len {
        return Err(Error::decode(
            first_offset,
            format!("extended XMP incomplete: {covered} of {full_len} bytes present"),
        ));
    }

    let mut packet = vec![0u8; full_len];
    for chunk in &chunks {
        packet[chunk.offset..chunk.offset + chunk.data.len()].copy_from_slice(chunk.data);
    }
    Ok(Some(packet))
}
