//! Error types for bamseek

use thiserror::Error;

/// Result type alias for bamseek operations
pub type Result<T> = std::result::Result<T, BamseekError>;

/// Error types that can occur in bamseek
#[derive(Debug, Error)]
pub enum BamseekError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed query parameters (reference out of range, inverted interval)
    #[error("Invalid query: {msg}")]
    InvalidQuery {
        /// What was wrong with the query
        msg: String,
    },

    /// An interval query was requested but no index is available
    #[error("No index found at {path}")]
    IndexMissing {
        /// Path where the index was expected
        path: String,
    },

    /// Stream ended inside a header, block, or record
    #[error("Unexpected end of stream: {msg}")]
    UnexpectedEof {
        /// What was being read when the stream ended
        msg: String,
    },

    /// BGZF block failed framing, CRC, or size validation
    #[error("Corrupt BGZF block at offset {offset}: {msg}")]
    CorruptBlock {
        /// File offset of the offending block
        offset: u64,
        /// What failed to validate
        msg: String,
    },

    /// Alignment record failed to decode
    #[error("Corrupt BAM record: {msg}")]
    CorruptRecord {
        /// What failed to decode
        msg: String,
    },
}

impl From<BamseekError> for std::io::Error {
    fn from(e: BamseekError) -> Self {
        match e {
            BamseekError::Io(io_err) => io_err,
            BamseekError::UnexpectedEof { .. } => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e.to_string())
            }
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
