//! Segment serialization

use super::{has_payload, Segment, MARKER_PREFIX, MAX_SEGMENT_PAYLOAD};
use picmeta_common::{Error, Result};
use std::io::{self, Read, Write};

/// Writes a segment list followed by the untouched scan data
pub struct JpegSegmentWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> JpegSegmentWriter<W> {
    pub const fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Bytes written so far
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    pub fn write_segment(&mut self, segment: &Segment) -> Result<()> {
        if !has_payload(segment.marker) {
            if !segment.payload.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "marker 0x{:02X} cannot carry a payload",
                    segment.marker
                )));
            }
            self.inner.write_all(&[MARKER_PREFIX, segment.marker])?;
            self.written += 2;
            return Ok(());
        }

        let len = segment.payload.len();
        let length = u16::try_from(len + 2)
            .ok()
            .filter(|_| len <= MAX_SEGMENT_PAYLOAD)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "segment 0x{:02X} payload of {len} bytes exceeds {MAX_SEGMENT_PAYLOAD}",
                    segment.marker
                ))
            })?;
        self.inner.write_all(&[MARKER_PREFIX, segment.marker])?;
        self.inner.write_all(&length.to_be_bytes())?;
        self.inner.write_all(&segment.payload)?;
        self.written += 4 + len as u64;
        Ok(())
    }

    pub fn write_all(&mut self, segments: &[Segment]) -> Result<()> {
        for segment in segments {
            self.write_segment(segment)?;
        }
        Ok(())
    }

    /// Copy the remaining image data verbatim and flush
    ///
    /// Returns the inner writer and the total number of bytes written, so a
    /// pre-sized target can be truncated to the real length.
    pub fn finish(mut self, image_data: &mut impl Read) -> Result<(W, u64)> {
        self.written += io::copy(image_data, &mut self.inner)?;
        self.inner.flush()?;
        Ok((self.inner, self.written))
    }
}
