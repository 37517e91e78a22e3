//! Fixtures shared by the storage tests

use picmeta_codec::exif::EXIF_HEADER;
use picmeta_codec::jpeg::{APP0, APP1, SOI, SOS};
use picmeta_codec::{JpegSegmentWriter, Segment};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Entropy-coded data after SOS: the scan header, a few bytes, EOI
pub const SCAN: &[u8] = &[
    0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0xD2, 0xCF, 0x20, 0xFF, 0x00, 0x11, 0xFF, 0xD9,
];

/// SOI, JFIF, one quantization table, SOS
pub fn base_segments() -> Vec<Segment> {
    vec![
        Segment::marker_only(SOI),
        Segment::new(APP0, &b"JFIF\0\x01\x01\x00\x00\x01\x00\x01\x00\x00"[..]),
        Segment::new(0xDB, vec![0x01u8; 65]),
        Segment::marker_only(SOS),
    ]
}

/// Encode `segments` followed by `SCAN`
pub fn jpeg_bytes(segments: &[Segment]) -> Vec<u8> {
    let mut writer = JpegSegmentWriter::new(Vec::new());
    writer.write_all(segments).unwrap();
    let (bytes, _) = writer.finish(&mut &SCAN[..]).unwrap();
    bytes
}

pub fn minimal_jpeg() -> Vec<u8> {
    jpeg_bytes(&base_segments())
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// A minimal JPEG on disk plus its stat data
pub fn context_for() -> (TempDir, PathBuf, fs::Metadata) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "photo.jpg", &minimal_jpeg());
    let metadata = fs::metadata(&path).unwrap();
    (dir, path, metadata)
}

/// Little-endian EXIF segment with Make and Model in IFD0
pub fn exif_segment(make: &str, model: &str) -> Segment {
    let strings = [(0x010Fu16, make), (0x0110u16, model)];
    let ifd_len = 2 + strings.len() * 12 + 4;
    let mut data_offset = 8 + ifd_len;

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&(strings.len() as u16).to_le_bytes());

    let mut data = Vec::new();
    for (tag, text) in strings {
        let mut value = text.as_bytes().to_vec();
        value.push(0);
        tiff.extend_from_slice(&tag.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&(value.len() as u32).to_le_bytes());
        if value.len() <= 4 {
            value.resize(4, 0);
            tiff.extend_from_slice(&value);
        } else {
            tiff.extend_from_slice(&(data_offset as u32).to_le_bytes());
            data_offset += value.len();
            data.extend_from_slice(&value);
        }
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff.extend_from_slice(&data);

    let mut payload = EXIF_HEADER.to_vec();
    payload.extend_from_slice(&tiff);
    Segment::new(APP1, payload)
}
