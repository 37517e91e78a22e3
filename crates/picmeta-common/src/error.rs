//! Error types for picmeta
//!
//! This module defines the common error type used by the codecs and the
//! storage layer.

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for picmeta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for picmeta
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed attribute record, JPEG segment structure or XMP packet.
    /// `offset` is the byte position the problem was detected at.
    #[error("decode error at offset {offset}: {message}")]
    Decode { offset: u64, message: String },

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot encode attribute '{name}': {reason}")]
    Encode { name: String, reason: String },

    #[error("cache store error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Create a decode error at the given offset
    pub fn decode(offset: u64, message: impl Into<String>) -> Self {
        Self::Decode {
            offset,
            message: message.into(),
        }
    }

    /// Create an encode error for the named attribute
    pub fn encode(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encode {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Map an I/O error on `path` into `NotFound` when the file is missing
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.into())
        } else {
            Self::Io(err)
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if this is a decode error
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Byte offset carried by a decode error
    #[must_use]
    pub const fn offset(&self) -> Option<u64> {
        match self {
            Self::Decode { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}
