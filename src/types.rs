//! Core data types for the pixel store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::PixelShape;

/// 64-bit identifier naming a pixel set or a repository file. 0 is never a
/// valid identifier.
pub type ObjectId = u64;

/// Length in bytes of a content digest (SHA-1).
pub const DIGEST_LEN: usize = 20;

/// Sample types supported by the store, derived from the header's
/// bytes-per-pixel and signed/float flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// Unsigned 8-bit integer
    U8,
    /// Signed 8-bit integer
    I8,
    /// Unsigned 16-bit integer
    U16,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 32-bit integer
    I32,
    /// 32-bit floating point
    F32,
}

impl SampleType {
    /// Resolve a sample type from header fields. Returns `None` for
    /// combinations the store does not admit.
    pub fn from_header(bytes_per_pixel: u8, signed: bool, float: bool) -> Option<Self> {
        match (bytes_per_pixel, signed, float) {
            (4, true, true) => Some(SampleType::F32),
            (1, false, false) => Some(SampleType::U8),
            (1, true, false) => Some(SampleType::I8),
            (2, false, false) => Some(SampleType::U16),
            (2, true, false) => Some(SampleType::I16),
            (4, false, false) => Some(SampleType::U32),
            (4, true, false) => Some(SampleType::I32),
            _ => None,
        }
    }

    /// Size in bytes of this sample type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Header metadata for a pixel set.
///
/// Extents are fixed at creation and immutable thereafter. `finished`
/// transitions the set from write-only to read-only; the digest is computed
/// over the full pixel payload at that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelHeader {
    /// 5-axis extents
    pub shape: PixelShape,

    /// Bytes per pixel: 1, 2 or 4
    pub bytes_per_pixel: u8,

    /// Samples are signed
    pub signed: bool,

    /// Samples are 32-bit floats (implies signed and bytes_per_pixel = 4)
    pub float: bool,

    /// Set is read-only; before this it is write-only
    pub finished: bool,

    /// SHA-1 over the pixel payload, all zero until finished
    pub sha1: [u8; DIGEST_LEN],

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,
}

impl PixelHeader {
    /// Create a header for a fresh, unwritten pixel set.
    pub fn new(shape: PixelShape, bytes_per_pixel: u8, signed: bool, float: bool) -> Self {
        let now = Utc::now();
        Self {
            shape,
            bytes_per_pixel,
            signed,
            float,
            finished: false,
            sha1: [0; DIGEST_LEN],
            created_at: now,
            modified_at: now,
        }
    }

    /// The sample type encoded by this header.
    ///
    /// Headers are only ever constructed from validated creation requests,
    /// so the combination is always admissible.
    pub fn sample_type(&self) -> SampleType {
        SampleType::from_header(self.bytes_per_pixel, self.signed, self.float)
            .unwrap_or(SampleType::U8)
    }

    /// Total payload size in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.shape.total_pixels() * self.bytes_per_pixel as u64
    }

    /// Hex rendering of the content digest.
    pub fn sha1_hex(&self) -> String {
        digest_hex(&self.sha1)
    }

    /// Update the modification timestamp.
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

/// Metadata for a repository file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// Original (upload) name
    pub name: String,

    /// Length in bytes
    pub length: u64,

    /// SHA-1 over the file content
    pub sha1: [u8; DIGEST_LEN],

    /// Set when this entry is an alias of an earlier upload with identical
    /// content; names the original
    pub alias_of: Option<ObjectId>,

    /// Identifiers of entries aliasing this one
    pub aliases: Vec<ObjectId>,
}

impl FileInfo {
    pub fn sha1_hex(&self) -> String {
        digest_hex(&self.sha1)
    }
}

/// Render a digest as lowercase hex.
pub fn digest_hex(digest: &[u8; DIGEST_LEN]) -> String {
    let mut out = String::with_capacity(DIGEST_LEN * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_type_resolution() {
        assert_eq!(
            SampleType::from_header(1, false, false),
            Some(SampleType::U8)
        );
        assert_eq!(SampleType::from_header(2, true, false), Some(SampleType::I16));
        assert_eq!(SampleType::from_header(4, true, true), Some(SampleType::F32));
        // float requires 4 bytes and signed
        assert_eq!(SampleType::from_header(2, true, true), None);
        assert_eq!(SampleType::from_header(4, false, true), None);
        assert_eq!(SampleType::from_header(3, false, false), None);
    }

    #[test]
    fn test_sample_sizes() {
        assert_eq!(SampleType::U8.size_in_bytes(), 1);
        assert_eq!(SampleType::I16.size_in_bytes(), 2);
        assert_eq!(SampleType::F32.size_in_bytes(), 4);
    }

    #[test]
    fn test_digest_hex() {
        let mut digest = [0u8; DIGEST_LEN];
        digest[0] = 0xab;
        digest[19] = 0x01;
        let hex = digest_hex(&digest);
        assert_eq!(hex.len(), 40);
        assert!(hex.starts_with("ab"));
        assert!(hex.ends_with("01"));
    }

    #[test]
    fn test_header_total_bytes() {
        let shape = PixelShape::new(4, 4, 2, 3, 5);
        let head = PixelHeader::new(shape, 2, false, false);
        assert_eq!(head.total_bytes(), 4 * 4 * 2 * 3 * 5 * 2);
        assert!(!head.finished);
        assert_eq!(head.sha1, [0; DIGEST_LEN]);
    }
}
