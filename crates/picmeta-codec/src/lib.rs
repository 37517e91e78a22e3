//! picmeta-codec: on-disk formats for image attributes
//!
//! This crate provides:
//! - The binary attribute record codec
//! - JPEG segment enumeration and rewriting, with split/join of payloads
//!   larger than one segment
//! - The EXIF (TIFF directory) camera metadata reader
//! - XMP packet reading and writing, including extended XMP

pub mod exif;
pub mod jpeg;
pub mod record;
pub mod xmp;

pub use jpeg::{JpegSegmentReader, JpegSegmentWriter, Segment};
pub use record::{decode_attributes, encode_attributes, AttributeReader, AttributeWriter};
