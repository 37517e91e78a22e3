//! Binary attribute records
//!
//! Record layout, one record per attribute, no count prefix:
//! ```text
//! +-----------+----------------+---------------------------+
//! | type: u16 | name: UTF-8 \0 | value                     |
//! |   (LE)    |                |                           |
//! +-----------+----------------+---------------------------+
//! ```
//!
//! | Type | Tag | Value encoding                         |
//! |------|-----|----------------------------------------|
//! | Integer  | 1 | `i32` little-endian                |
//! | Real     | 2 | `f64` little-endian (binary64)     |
//! | Text     | 3 | UTF-8 bytes + `\0`                 |
//! | DateTime | 4 | `DATETIME_FORMAT` text + `\0`      |
//!
//! A stream is decoded until it ends exactly on a record boundary.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use picmeta_common::value::{format_datetime, parse_datetime};
use picmeta_common::{Attribute, AttributeSource, Error, Result, Value, ValueType};
use tracing::debug;

/// Size of the type tag
const TAG_SIZE: usize = 2;

/// Sequential decoder over a record stream
///
/// Every attribute produced is `Custom`-sourced.
pub struct AttributeReader<B> {
    buf: B,
    /// Absolute position of the next unread byte
    offset: u64,
}

impl<B: Buf> AttributeReader<B> {
    pub const fn new(buf: B) -> Self {
        Self::with_offset(buf, 0)
    }

    /// Reader whose reported offsets start at `base` (e.g. the position of
    /// the record stream inside a larger payload)
    pub const fn with_offset(buf: B, base: u64) -> Self {
        Self { buf, offset: base }
    }

    /// Current stream position
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Decode the next record, `None` at a clean end of stream
    pub fn read(&mut self) -> Result<Option<Attribute>> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }

        let record_start = self.offset;
        if self.buf.remaining() < TAG_SIZE {
            return Err(Error::decode(record_start, "truncated record type"));
        }
        let tag = self.buf.get_u16_le();
        self.offset += TAG_SIZE as u64;

        let value_type = ValueType::from_type_tag(tag).ok_or_else(|| {
            Error::decode(record_start, format!("unknown record type {tag}"))
        })?;

        let name_start = self.offset;
        let name = self.read_string()?;
        if name.is_empty() {
            return Err(Error::decode(name_start, "empty attribute name"));
        }

        let value = match value_type {
            ValueType::Integer => {
                self.ensure(4)?;
                self.offset += 4;
                Value::integer(self.buf.get_i32_le())
            }
            ValueType::Real => {
                self.ensure(8)?;
                self.offset += 8;
                Value::real(self.buf.get_f64_le())
            }
            ValueType::Text => Value::text(self.read_string()?),
            ValueType::DateTime => {
                let value_start = self.offset;
                let text = self.read_string()?;
                let dt = parse_datetime(&text).ok_or_else(|| {
                    Error::decode(value_start, format!("invalid datetime '{text}'"))
                })?;
                Value::datetime(dt)
            }
            // Image has no record tag, from_type_tag never yields it
            ValueType::Image => {
                return Err(Error::decode(record_start, "image records are not supported"));
            }
        };

        Ok(Some(Attribute::new(name, value, AttributeSource::Custom)))
    }

    /// Decode every remaining record
    pub fn read_all(&mut self) -> Result<Vec<Attribute>> {
        let mut attributes = Vec::new();
        while let Some(attribute) = self.read()? {
            attributes.push(attribute);
        }
        Ok(attributes)
    }

    /// Fail at the truncation point unless `len` more bytes are available
    fn ensure(&mut self, len: usize) -> Result<()> {
        let remaining = self.buf.remaining();
        if remaining < len {
            self.buf.advance(remaining);
            self.offset += remaining as u64;
            return Err(Error::decode(self.offset, "unexpected end of record"));
        }
        Ok(())
    }

    /// NUL-terminated UTF-8 string
    fn read_string(&mut self) -> Result<String> {
        let start = self.offset;
        let mut bytes = Vec::new();
        loop {
            if !self.buf.has_remaining() {
                return Err(Error::decode(self.offset, "unterminated string"));
            }
            let b = self.buf.get_u8();
            self.offset += 1;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8(bytes).map_err(|e| Error::decode(start, format!("invalid UTF-8: {e}")))
    }
}

impl<B: Buf> Iterator for AttributeReader<B> {
    type Item = Result<Attribute>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

/// Sequential encoder producing a record stream
pub struct AttributeWriter<B> {
    buf: B,
}

impl<B: BufMut> AttributeWriter<B> {
    pub const fn new(buf: B) -> Self {
        Self { buf }
    }

    /// Encode one attribute
    ///
    /// `Metadata` attributes and null values are skipped. Image values have
    /// no record form and fail with [`Error::Encode`].
    pub fn write(&mut self, attribute: &Attribute) -> Result<()> {
        if !attribute.is_custom() {
            return Ok(());
        }
        let name = attribute.name();
        check_nul_free(name, name)?;

        match attribute.value() {
            Value::Integer(Some(v)) => {
                self.put_header(ValueType::Integer, name);
                self.buf.put_i32_le(*v);
            }
            Value::Real(Some(v)) => {
                self.put_header(ValueType::Real, name);
                self.buf.put_f64_le(*v);
            }
            Value::Text(Some(v)) => {
                check_nul_free(name, v)?;
                self.put_header(ValueType::Text, name);
                put_string(&mut self.buf, v);
            }
            Value::DateTime(Some(v)) => {
                self.put_header(ValueType::DateTime, name);
                put_string(&mut self.buf, &format_datetime(v));
            }
            Value::Image(Some(_)) => {
                return Err(Error::encode(
                    name,
                    "image values cannot be stored as records",
                ));
            }
            _ => debug!("Skipping null attribute '{}'", name),
        }
        Ok(())
    }

    fn put_header(&mut self, value_type: ValueType, name: &str) {
        // Every type reaching here has a tag
        self.buf.put_u16_le(value_type.type_tag().unwrap_or_default());
        put_string(&mut self.buf, name);
    }

    pub fn into_inner(self) -> B {
        self.buf
    }
}

/// Encode a set of attributes into a fresh record stream
pub fn encode_attributes<'a>(attributes: impl IntoIterator<Item = &'a Attribute>) -> Result<Bytes> {
    let mut writer = AttributeWriter::new(BytesMut::new());
    for attribute in attributes {
        writer.write(attribute)?;
    }
    Ok(writer.into_inner().freeze())
}

/// Decode a complete record stream
pub fn decode_attributes(data: &[u8]) -> Result<Vec<Attribute>> {
    AttributeReader::new(data).read_all()
}

fn put_string<B: BufMut>(buf: &mut B, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn check_nul_free(name: &str, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::encode(name, "embedded NUL byte"));
    }
    Ok(())
}
