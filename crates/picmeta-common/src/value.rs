//! Attribute values
//!
//! A [`Value`] is a closed tagged union. The tag never changes after
//! construction and every variant can be null independently of its tag.
//!
//! Values have a single total order ([`Value::compare`]) used for every
//! multi-key sort:
//!
//! 1. null sorts last (null == null)
//! 2. values convertible to a number (Integer, Real, numeric Text) compare
//!    numerically and sort before everything else
//! 3. DateTime values (or Text holding a DateTime) compare chronologically
//! 4. everything else compares by canonical text, lexicographically

use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset, SubsecRound};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Text profile for DateTime values: RFC 3339, millisecond precision,
/// explicit offset (`2019-04-01T12:30:00.000+02:00`).
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Format a DateTime with [`DATETIME_FORMAT`]
#[must_use]
pub fn format_datetime(dt: &DateTime<FixedOffset>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Parse a DateTime written with [`DATETIME_FORMAT`] or any RFC 3339 variant
#[must_use]
pub fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, DATETIME_FORMAT))
        .ok()
}

/// Value type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Integer,
    Real,
    Text,
    DateTime,
    Image,
}

impl ValueType {
    /// All value types, in tag order
    pub const ALL: [Self; 5] = [
        Self::Integer,
        Self::Real,
        Self::Text,
        Self::DateTime,
        Self::Image,
    ];

    /// Binary record tag. Image values have no record representation.
    #[must_use]
    pub const fn type_tag(self) -> Option<u16> {
        match self {
            Self::Integer => Some(1),
            Self::Real => Some(2),
            Self::Text => Some(3),
            Self::DateTime => Some(4),
            Self::Image => None,
        }
    }

    /// Inverse of [`ValueType::type_tag`]
    #[must_use]
    pub const fn from_type_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Self::Integer),
            2 => Some(Self::Real),
            3 => Some(Self::Text),
            4 => Some(Self::DateTime),
            _ => None,
        }
    }

    /// Short name used in XMP packets and on the command line
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Integer => "int",
            Self::Real => "real",
            Self::Text => "string",
            Self::DateTime => "datetime",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(Self::Integer),
            "real" | "double" => Ok(Self::Real),
            "string" | "text" => Ok(Self::Text),
            "datetime" | "date" => Ok(Self::DateTime),
            "image" => Ok(Self::Image),
            other => Err(Error::invalid_argument(format!(
                "unknown value type: {other}"
            ))),
        }
    }
}

/// Tagged attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Integer(Option<i32>),
    Real(Option<f64>),
    Text(Option<String>),
    DateTime(Option<DateTime<FixedOffset>>),
    Image(Option<Vec<u8>>),
}

impl Value {
    pub const fn integer(v: i32) -> Self {
        Self::Integer(Some(v))
    }

    pub const fn real(v: f64) -> Self {
        Self::Real(Some(v))
    }

    pub fn text(v: impl Into<String>) -> Self {
        Self::Text(Some(v.into()))
    }

    /// DateTime value, truncated to the millisecond precision of
    /// [`DATETIME_FORMAT`]
    pub fn datetime(v: DateTime<FixedOffset>) -> Self {
        Self::DateTime(Some(v.trunc_subsecs(3)))
    }

    pub const fn image(v: Vec<u8>) -> Self {
        Self::Image(Some(v))
    }

    /// A null value of the given type
    #[must_use]
    pub const fn null(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Integer => Self::Integer(None),
            ValueType::Real => Self::Real(None),
            ValueType::Text => Self::Text(None),
            ValueType::DateTime => Self::DateTime(None),
            ValueType::Image => Self::Image(None),
        }
    }

    /// Parse `text` as a value of the declared type
    pub fn parse(value_type: ValueType, text: &str) -> Result<Self> {
        let invalid = || {
            Error::invalid_argument(format!("'{text}' is not a valid {value_type} value"))
        };
        match value_type {
            ValueType::Integer => text
                .trim()
                .parse::<i32>()
                .map(Self::integer)
                .map_err(|_| invalid()),
            ValueType::Real => text
                .trim()
                .parse::<f64>()
                .map(Self::real)
                .map_err(|_| invalid()),
            ValueType::Text => Ok(Self::text(text)),
            ValueType::DateTime => parse_datetime(text).map(Self::datetime).ok_or_else(invalid),
            ValueType::Image => Err(Error::invalid_argument(
                "image values cannot be parsed from text",
            )),
        }
    }

    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Integer(_) => ValueType::Integer,
            Self::Real(_) => ValueType::Real,
            Self::Text(_) => ValueType::Text,
            Self::DateTime(_) => ValueType::DateTime,
            Self::Image(_) => ValueType::Image,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        match self {
            Self::Integer(v) => v.is_none(),
            Self::Real(v) => v.is_none(),
            Self::Text(v) => v.is_none(),
            Self::DateTime(v) => v.is_none(),
            Self::Image(v) => v.is_none(),
        }
    }

    #[must_use]
    pub const fn as_integer(&self) -> Option<i32> {
        match self {
            Self::Integer(v) => *v,
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => *v,
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => v.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_datetime(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Self::DateTime(v) => v.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_image(&self) -> Option<&[u8]> {
        match self {
            Self::Image(v) => v.as_deref(),
            _ => None,
        }
    }

    /// Numeric view: Integer, Real, or Text that parses as a number
    #[must_use]
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => v.map(f64::from),
            Self::Real(v) => *v,
            Self::Text(Some(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Chronological view: DateTime, or Text holding a DateTime
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::DateTime(v) => *v,
            Self::Text(Some(s)) => parse_datetime(s),
            _ => None,
        }
    }

    /// Canonical text form, `None` for null values
    #[must_use]
    pub fn to_canonical_string(&self) -> Option<String> {
        match self {
            Self::Integer(v) => v.map(|v| v.to_string()),
            Self::Real(v) => v.map(|v| v.to_string()),
            Self::Text(v) => v.clone(),
            Self::DateTime(v) => v.as_ref().map(format_datetime),
            Self::Image(v) => v.as_ref().map(|bytes| format!("image({} bytes)", bytes.len())),
        }
    }

    /// Total order over values, see the module documentation
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }

        match (self.to_number(), other.to_number()) {
            (Some(a), Some(b)) => return a.total_cmp(&b),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }

        match (self.to_datetime(), other.to_datetime()) {
            (Some(a), Some(b)) => return a.cmp(&b),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }

        let a = self.to_canonical_string().unwrap_or_default();
        let b = other.to_canonical_string().unwrap_or_default();
        a.cmp(&b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_canonical_string() {
            Some(s) => f.write_str(&s),
            None => f.write_str("null"),
        }
    }
}
