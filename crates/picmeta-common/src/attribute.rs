//! Named attributes with provenance

use crate::value::{Value, ValueType};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an attribute came from
///
/// `Metadata` attributes are derived (camera metadata, filesystem stat data)
/// and are never written back by the attribute writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeSource {
    /// User-editable attribute
    Custom,
    /// Read-only derived metadata
    Metadata,
}

impl fmt::Display for AttributeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom => f.write_str("custom"),
            Self::Metadata => f.write_str("metadata"),
        }
    }
}

/// A named, typed value attached to an entity
///
/// Two attributes are equal iff name, value and source are all equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    value: Value,
    source: AttributeSource,
}

impl Attribute {
    /// Create an attribute. Panics in debug builds on an empty name.
    pub fn new(name: impl Into<String>, value: Value, source: AttributeSource) -> Self {
        let name = name.into();
        debug_assert!(!name.is_empty(), "attribute name must not be empty");
        Self {
            name,
            value,
            source,
        }
    }

    /// Custom integer attribute
    pub fn int(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, Value::integer(value), AttributeSource::Custom)
    }

    /// Custom real attribute
    pub fn real(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, Value::real(value), AttributeSource::Custom)
    }

    /// Custom text attribute
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, Value::text(value), AttributeSource::Custom)
    }

    /// Custom DateTime attribute
    pub fn datetime(name: impl Into<String>, value: DateTime<FixedOffset>) -> Self {
        Self::new(name, Value::datetime(value), AttributeSource::Custom)
    }

    /// Derived (read-only) attribute
    pub fn metadata(name: impl Into<String>, value: Value) -> Self {
        Self::new(name, value, AttributeSource::Metadata)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub const fn source(&self) -> AttributeSource {
        self.source
    }

    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    #[must_use]
    pub fn is_custom(&self) -> bool {
        self.source == AttributeSource::Custom
    }

    /// Consume the attribute, returning its value
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} ({}, {})",
            self.name,
            self.value,
            self.value.value_type(),
            self.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_equality_includes_source() {
        let custom = Attribute::int("rating", 5);
        let derived = Attribute::metadata("rating", Value::integer(5));
        assert_ne!(custom, derived);
        assert_eq!(custom, Attribute::int("rating", 5));
        assert_ne!(custom, Attribute::int("rating", 4));
        assert_ne!(custom, Attribute::int("stars", 5));
    }

    #[test]
    fn test_attribute_display() {
        let attr = Attribute::text("caption", "Lake");
        assert_eq!(attr.to_string(), "caption = Lake (string, custom)");
        assert!(attr.is_custom());
        assert_eq!(attr.value_type(), ValueType::Text);
    }
}
