//! EXIF camera metadata
//!
//! Reads the TIFF structure carried by the `Exif\0\0` APP1 segment:
//! ```text
//! +------------+--------+-------------+
//! | II / MM    | 42     | IFD0 offset |   byte order, magic, u32 offset
//! +------------+--------+-------------+
//! IFD0  -> Make, Model, Orientation, ImageWidth/Length, Exif pointer
//!   Exif sub-IFD -> exposure, aperture, ISO, focal length, capture time,
//!                   pixel dimensions
//! IFD1  -> embedded JPEG thumbnail (offset + length)
//! ```
//! Every attribute produced is `Metadata`-sourced and never written back.

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use picmeta_common::{Attribute, Error, Result, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Payload header of the EXIF APP1 segment
pub const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Attribute names produced by [`read_exif`]
pub mod names {
    pub const IMAGE_WIDTH: &str = "ImageWidth";
    pub const IMAGE_HEIGHT: &str = "ImageHeight";
    pub const ORIENTATION: &str = "orientation";
    pub const CAMERA_MAKER: &str = "CameraMaker";
    pub const CAMERA_MODEL: &str = "CameraModel";
    pub const EXPOSURE_TIME: &str = "ExposureTime";
    pub const F_NUMBER: &str = "FNumber";
    pub const ISO_SPEED: &str = "ISOSpeed";
    pub const FOCAL_LENGTH: &str = "FocalLength";
    pub const DATE_TAKEN: &str = "DateTaken";
    pub const THUMBNAIL: &str = "thumbnail";
}

mod tags {
    pub const IMAGE_WIDTH: u16 = 0x0100;
    pub const IMAGE_LENGTH: u16 = 0x0101;
    pub const MAKE: u16 = 0x010F;
    pub const MODEL: u16 = 0x0110;
    pub const ORIENTATION: u16 = 0x0112;
    pub const THUMBNAIL_OFFSET: u16 = 0x0201;
    pub const THUMBNAIL_LENGTH: u16 = 0x0202;
    pub const EXIF_IFD: u16 = 0x8769;
    pub const EXPOSURE_TIME: u16 = 0x829A;
    pub const F_NUMBER: u16 = 0x829D;
    pub const ISO_SPEED: u16 = 0x8827;
    pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
    pub const OFFSET_TIME_ORIGINAL: u16 = 0x9011;
    pub const FOCAL_LENGTH: u16 = 0x920A;
    pub const PIXEL_X_DIMENSION: u16 = 0xA002;
    pub const PIXEL_Y_DIMENSION: u16 = 0xA003;
}

// TIFF field types
const TYPE_BYTE: u16 = 1;
const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_RATIONAL: u16 = 5;
const TYPE_UNDEFINED: u16 = 7;
const TYPE_SLONG: u16 = 9;
const TYPE_SRATIONAL: u16 = 10;

/// Maximum entries accepted in one directory
const MAX_IFD_ENTRIES: u16 = 1024;

/// Decode the camera metadata table from a TIFF block
///
/// `base` is the absolute position of `tiff` in the file and is only used
/// for error offsets.
pub fn read_exif(tiff: &[u8], base: u64) -> Result<Vec<Attribute>> {
    let tiff = Tiff::parse(tiff, base)?;

    let ifd0_pos = tiff.u32_at(4)? as usize;
    let (ifd0, ifd1_pos) = tiff.ifd(ifd0_pos)?;
    let exif = match ifd0.get(&tags::EXIF_IFD) {
        Some(entry) => {
            let pos = entry
                .integer(&tiff)?
                .ok_or_else(|| tiff.error(entry.pos, "bad Exif IFD pointer"))?;
            tiff.ifd(usize::try_from(pos).unwrap_or(usize::MAX))?.0
        }
        None => BTreeMap::new(),
    };
    let ifd1 = match ifd1_pos {
        0 => BTreeMap::new(),
        pos => tiff.ifd(pos)?.0,
    };

    let mut attributes = Vec::new();
    let mut push = |name: &str, value: Value| attributes.push(Attribute::metadata(name, value));

    let dimension = |primary: u16, fallback: u16| -> Result<Option<i32>> {
        let entry = exif.get(&primary).or_else(|| ifd0.get(&fallback));
        match entry {
            Some(entry) => Ok(entry.integer(&tiff)?.and_then(|v| i32::try_from(v).ok())),
            None => Ok(None),
        }
    };
    if let Some(width) = dimension(tags::PIXEL_X_DIMENSION, tags::IMAGE_WIDTH)? {
        push(names::IMAGE_WIDTH, Value::integer(width));
    }
    if let Some(height) = dimension(tags::PIXEL_Y_DIMENSION, tags::IMAGE_LENGTH)? {
        push(names::IMAGE_HEIGHT, Value::integer(height));
    }

    if let Some(entry) = ifd0.get(&tags::ORIENTATION) {
        if let Some(v) = entry.integer(&tiff)?.and_then(|v| i32::try_from(v).ok()) {
            push(names::ORIENTATION, Value::integer(v));
        }
    }
    if let Some(entry) = ifd0.get(&tags::MAKE) {
        if let Some(text) = entry.ascii(&tiff)? {
            push(names::CAMERA_MAKER, Value::text(text));
        }
    }
    if let Some(entry) = ifd0.get(&tags::MODEL) {
        if let Some(text) = entry.ascii(&tiff)? {
            push(names::CAMERA_MODEL, Value::text(text));
        }
    }

    for (tag, name) in [
        (tags::EXPOSURE_TIME, names::EXPOSURE_TIME),
        (tags::F_NUMBER, names::F_NUMBER),
        (tags::FOCAL_LENGTH, names::FOCAL_LENGTH),
    ] {
        if let Some(entry) = exif.get(&tag) {
            if let Some(v) = entry.rational(&tiff)? {
                push(name, Value::real(v));
            }
        }
    }

    if let Some(entry) = exif.get(&tags::ISO_SPEED) {
        if let Some(v) = entry.integer(&tiff)?.and_then(|v| i32::try_from(v).ok()) {
            push(names::ISO_SPEED, Value::integer(v));
        }
    }

    if let Some(entry) = exif.get(&tags::DATE_TIME_ORIGINAL) {
        let offset = match exif.get(&tags::OFFSET_TIME_ORIGINAL) {
            Some(entry) => entry.ascii(&tiff)?,
            None => None,
        };
        if let Some(text) = entry.ascii(&tiff)? {
            match parse_exif_datetime(&text, offset.as_deref()) {
                Some(dt) => push(names::DATE_TAKEN, Value::datetime(dt)),
                None => debug!("Ignoring unparseable DateTimeOriginal '{}'", text),
            }
        }
    }

    if let (Some(offset), Some(length)) = (
        ifd1.get(&tags::THUMBNAIL_OFFSET),
        ifd1.get(&tags::THUMBNAIL_LENGTH),
    ) {
        let start = offset.integer(&tiff)?.unwrap_or_default();
        let len = length.integer(&tiff)?.unwrap_or_default();
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        let bytes = tiff.slice(start, len)?;
        if !bytes.is_empty() {
            push(names::THUMBNAIL, Value::image(bytes.to_vec()));
        }
    }

    Ok(attributes)
}

/// `YYYY:MM:DD HH:MM:SS` plus an optional `+HH:MM` offset, UTC when absent
fn parse_exif_datetime(
    text: &str,
    offset: Option<&str>,
) -> Option<chrono::DateTime<FixedOffset>> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), "%Y:%m:%d %H:%M:%S").ok()?;
    let offset = offset
        .and_then(|o| o.trim().parse::<FixedOffset>().ok())
        .or_else(|| FixedOffset::east_opt(0))?;
    offset.from_local_datetime(&naive).single()
}

/// Byte-order aware view of a TIFF block
struct Tiff<'a> {
    data: &'a [u8],
    big_endian: bool,
    base: u64,
}

/// One directory entry
#[derive(Debug, Clone, Copy)]
struct Entry {
    kind: u16,
    count: u32,
    /// Position of the entry itself within the TIFF block
    pos: usize,
}

type Ifd = BTreeMap<u16, Entry>;

impl<'a> Tiff<'a> {
    fn parse(data: &'a [u8], base: u64) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::decode(base, "TIFF header truncated"));
        }
        let big_endian = match &data[..2] {
            b"II" => false,
            b"MM" => true,
            _ => return Err(Error::decode(base, "unknown TIFF byte order")),
        };
        let tiff = Self {
            data,
            big_endian,
            base,
        };
        if tiff.u16_at(2)? != 42 {
            return Err(tiff.error(2, "bad TIFF magic"));
        }
        Ok(tiff)
    }

    fn error(&self, pos: usize, message: &str) -> Error {
        Error::decode(self.base + pos as u64, message)
    }

    fn slice(&self, pos: usize, len: usize) -> Result<&'a [u8]> {
        pos.checked_add(len)
            .and_then(|end| self.data.get(pos..end))
            .ok_or_else(|| self.error(pos.min(self.data.len()), "offset out of range"))
    }

    fn u16_at(&self, pos: usize) -> Result<u16> {
        let b = self.slice(pos, 2)?;
        let b = [b[0], b[1]];
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u32_at(&self, pos: usize) -> Result<u32> {
        let b = self.slice(pos, 4)?;
        let b = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    /// Parse the directory at `pos`, returning its entries and the offset of
    /// the next directory (0 when there is none)
    fn ifd(&self, pos: usize) -> Result<(Ifd, usize)> {
        let count = self.u16_at(pos)?;
        if count > MAX_IFD_ENTRIES {
            return Err(self.error(pos, "too many directory entries"));
        }
        let mut entries = Ifd::new();
        for i in 0..usize::from(count) {
            let entry_pos = pos + 2 + i * 12;
            let tag = self.u16_at(entry_pos)?;
            let entry = Entry {
                kind: self.u16_at(entry_pos + 2)?,
                count: self.u32_at(entry_pos + 4)?,
                pos: entry_pos,
            };
            entries.insert(tag, entry);
        }
        let next = self.u32_at(pos + 2 + usize::from(count) * 12)?;
        Ok((entries, next as usize))
    }
}

impl Entry {
    const fn type_size(self) -> Option<usize> {
        match self.kind {
            TYPE_BYTE | TYPE_ASCII | TYPE_UNDEFINED => Some(1),
            TYPE_SHORT => Some(2),
            TYPE_LONG | TYPE_SLONG => Some(4),
            TYPE_RATIONAL | TYPE_SRATIONAL => Some(8),
            _ => None,
        }
    }

    /// Position of the value bytes: inline when they fit in four bytes
    fn value_pos(self, tiff: &Tiff<'_>) -> Result<Option<usize>> {
        let Some(size) = self.type_size() else {
            return Ok(None);
        };
        let total = size.saturating_mul(self.count as usize);
        if total <= 4 {
            Ok(Some(self.pos + 8))
        } else {
            let pos = tiff.u32_at(self.pos + 8)? as usize;
            tiff.slice(pos, total)?;
            Ok(Some(pos))
        }
    }

    /// First value as an unsigned integer
    fn integer(self, tiff: &Tiff<'_>) -> Result<Option<u32>> {
        if self.count == 0 {
            return Ok(None);
        }
        let Some(pos) = self.value_pos(tiff)? else {
            return Ok(None);
        };
        match self.kind {
            TYPE_BYTE => Ok(Some(u32::from(tiff.slice(pos, 1)?[0]))),
            TYPE_SHORT => Ok(Some(u32::from(tiff.u16_at(pos)?))),
            TYPE_LONG | TYPE_SLONG => Ok(Some(tiff.u32_at(pos)?)),
            _ => Ok(None),
        }
    }

    /// First value as a rational number
    #[allow(clippy::cast_possible_wrap)]
    fn rational(self, tiff: &Tiff<'_>) -> Result<Option<f64>> {
        if self.count == 0 {
            return Ok(None);
        }
        let Some(pos) = self.value_pos(tiff)? else {
            return Ok(None);
        };
        let num = tiff.u32_at(pos)?;
        let den = tiff.u32_at(pos + 4)?;
        let (num, den) = match self.kind {
            TYPE_RATIONAL => (f64::from(num), f64::from(den)),
            TYPE_SRATIONAL => (f64::from(num as i32), f64::from(den as i32)),
            _ => return Ok(None),
        };
        if den == 0.0 {
            return Ok(None);
        }
        Ok(Some(num / den))
    }

    /// NUL-terminated ASCII, trimmed; `None` when empty
    fn ascii(self, tiff: &Tiff<'_>) -> Result<Option<String>> {
        if self.kind != TYPE_ASCII {
            return Ok(None);
        }
        let Some(pos) = self.value_pos(tiff)? else {
            return Ok(None);
        };
        let bytes = tiff.slice(pos, self.count as usize)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let text = String::from_utf8_lossy(&bytes[..end]).trim().to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}
