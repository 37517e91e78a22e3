//! Segment enumeration

use super::{has_payload, Segment, EOI, MARKER_PREFIX, SOI, SOS};
use bytes::Bytes;
use picmeta_common::{Error, Result};
use std::io::{ErrorKind, Read};

/// Reads segments from the start of a JPEG stream up to Start-Of-Scan
///
/// After SOS (or EOI) has been returned the reader stops; the underlying
/// stream is left positioned right after that marker so the scan data can
/// be copied with [`JpegSegmentWriter::finish`](super::JpegSegmentWriter::finish).
pub struct JpegSegmentReader<R> {
    inner: R,
    offset: u64,
    started: bool,
    done: bool,
}

impl<R: Read> JpegSegmentReader<R> {
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            started: false,
            done: false,
        }
    }

    /// Logical position in the stream
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next segment, `None` once enumeration has ended
    pub fn read_segment(&mut self) -> Result<Option<Segment>> {
        if self.done {
            return Ok(None);
        }

        let start = self.offset;
        let Some(prefix) = self.read_byte_or_eof()? else {
            if !self.started {
                return Err(Error::decode(start, "empty stream"));
            }
            // Clean end between segments without a scan
            self.done = true;
            return Ok(None);
        };
        if prefix != MARKER_PREFIX {
            return Err(Error::decode(
                start,
                format!("expected marker prefix 0xFF, found 0x{prefix:02X}"),
            ));
        }

        // Any number of 0xFF fill bytes may precede the marker type
        let mut marker = self.read_byte()?;
        while marker == MARKER_PREFIX {
            marker = self.read_byte()?;
        }

        if !self.started {
            if marker != SOI {
                return Err(Error::decode(
                    start,
                    format!("first segment must be SOI, found 0x{marker:02X}"),
                ));
            }
            self.started = true;
        }

        if !has_payload(marker) {
            if marker == SOS || marker == EOI {
                self.done = true;
            }
            return Ok(Some(Segment {
                marker,
                payload: Bytes::new(),
                offset: start,
            }));
        }

        let length_at = self.offset;
        let mut len_bytes = [0u8; 2];
        self.read_exact(&mut len_bytes)?;
        let length = u16::from_be_bytes(len_bytes);
        if length < 2 {
            return Err(Error::decode(
                length_at,
                format!("segment length {length} is below 2"),
            ));
        }

        let mut payload = vec![0u8; usize::from(length) - 2];
        self.read_exact(&mut payload)?;

        Ok(Some(Segment {
            marker,
            payload: Bytes::from(payload),
            offset: start,
        }))
    }

    /// Read every segment up to and including SOS
    pub fn read_all(&mut self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        while let Some(segment) = self.read_segment()? {
            segments.push(segment);
        }
        Ok(segments)
    }

    /// The underlying stream, positioned after the last segment read
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_byte_or_eof(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.offset += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.read_byte_or_eof()?
            .ok_or_else(|| Error::decode(self.offset, "unexpected end of stream"))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::decode(self.offset, "unexpected end of stream"));
                }
                Ok(n) => {
                    filled += n;
                    self.offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for JpegSegmentReader<R> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_segment().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::super::APP1;
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_soi_then_sos() {
        let data = [0xFF, 0xD8, 0xFF, 0xDA, 0x12, 0x34];
        let mut reader = JpegSegmentReader::new(Cursor::new(&data[..]));

        let soi = reader.read_segment().unwrap().unwrap();
        assert_eq!(soi.marker, SOI);
        assert!(soi.payload.is_empty());
        assert_eq!(soi.offset, 0);

        let sos = reader.read_segment().unwrap().unwrap();
        assert_eq!(sos.marker, SOS);
        assert!(sos.payload.is_empty());
        assert_eq!(sos.offset, 2);

        assert!(reader.read_segment().unwrap().is_none());
        assert!(reader.read_segment().unwrap().is_none());

        // Scan bytes are untouched
        let cursor = reader.into_inner();
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn test_payload_segment() {
        let data = [
            0xFF, 0xD8, // SOI
            0xFF, 0xE1, 0x00, 0x05, b'a', b'b', b'c', // APP1
            0xFF, 0xFF, 0xDA, // fill byte then SOS
        ];
        let segments = JpegSegmentReader::new(&data[..]).read_all().unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].marker, APP1);
        assert_eq!(segments[1].payload.as_ref(), b"abc");
        assert_eq!(segments[1].offset, 2);
        assert_eq!(segments[2].marker, SOS);
    }

    #[test]
    fn test_first_segment_must_be_soi() {
        let data = [0xFF, 0xE1, 0x00, 0x02];
        let err = JpegSegmentReader::new(&data[..]).read_all().unwrap_err();
        assert_eq!(err.offset(), Some(0));
    }

    #[test]
    fn test_bad_marker_prefix() {
        let data = [0xFF, 0xD8, 0x00, 0xE1];
        let err = JpegSegmentReader::new(&data[..]).read_all().unwrap_err();
        assert!(err.is_decode());
        assert_eq!(err.offset(), Some(2));
    }

    #[test]
    fn test_length_below_two() {
        let data = [0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x01];
        let err = JpegSegmentReader::new(&data[..]).read_all().unwrap_err();
        assert_eq!(err.offset(), Some(4));
    }

    #[test]
    fn test_truncated_payload() {
        let data = [0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x10, 1, 2, 3];
        let err = JpegSegmentReader::new(&data[..]).read_all().unwrap_err();
        assert_eq!(err.offset(), Some(9));
    }

    #[test]
    fn test_empty_stream() {
        let err = JpegSegmentReader::new(&[0u8; 0][..]).read_all().unwrap_err();
        assert!(err.is_decode());
    }
}
