//! picmeta Common - Shared types and utilities
//!
//! This crate provides the attribute data model (values, attributes,
//! entities), the value ordering used for sorting, the common error type
//! and the configuration structures shared by all picmeta components.

pub mod attribute;
pub mod config;
pub mod entity;
pub mod error;
pub mod value;

pub use attribute::{Attribute, AttributeSource};
pub use config::Config;
pub use entity::Entity;
pub use error::{Error, Result};
pub use value::{DATETIME_FORMAT, Value, ValueType};
