//! Structured BAM decode errors.
//!
//! Record-level parsing reports failures through [`BamDecodeError`] so
//! callers can match on the specific violation; the conversion into
//! `io::Error` keeps the parsing layer's `io::Result` signatures uniform.

use std::io;
use thiserror::Error;

/// Errors that can occur while decoding a BAM record.
#[derive(Debug, Error)]
pub enum BamDecodeError {
    /// Reference sequence id outside {-1} ∪ [0, n_ref)
    #[error("Invalid {field} reference ID: {value} (must be -1 or >= 0)")]
    InvalidReferenceId {
        /// The invalid value
        value: i32,
        /// Which field held it ("read" or "mate")
        field: &'static str,
    },

    /// Read name length field of zero (spec minimum is 1)
    #[error("Invalid read name length at offset {offset}: 0 (must be >= 1)")]
    InvalidReadNameLength {
        /// Offset of the length byte within the record
        offset: usize,
    },

    /// CIGAR operation code outside 0-8
    #[error("Invalid CIGAR operation code: {code}")]
    InvalidCigarOp {
        /// The invalid code
        code: u32,
    },

    /// Tag type byte that names no known representation
    #[error("Invalid tag type code: {type_code}")]
    InvalidTagType {
        /// The invalid type byte
        type_code: u8,
    },

    /// Array tag with an element type byte that names no known representation
    #[error("Invalid array element type code: {subtype}")]
    InvalidArraySubtype {
        /// The invalid element type byte
        subtype: u8,
    },

    /// Same tag name appearing twice in one record
    #[error("Duplicate tag: {}{}", .tag[0] as char, .tag[1] as char)]
    DuplicateTag {
        /// The duplicated two-character name
        tag: [u8; 2],
    },

    /// Array tag whose element count does not fit in usize
    #[error("Array count too large for platform: {count}")]
    ArrayCountOverflow {
        /// The declared element count
        count: u32,
    },
}

impl From<BamDecodeError> for io::Error {
    fn from(e: BamDecodeError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    }
}
