use thiserror::Error;

use crate::filesystem::FileSystemType;

/// Result type alias for disk image operations
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors that can occur when working with Apple II disk images
#[derive(Debug, Error)]
pub enum FsError {
    /// I/O error occurred while reading or writing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The buffer is not an instance of the format being tried
    #[error("Not a {format} image: {reason}")]
    FormatMismatch {
        /// Format that was attempted
        format: FileSystemType,
        /// Why the buffer was rejected
        reason: String,
    },

    /// The format was identified but its catalog is damaged
    #[error("Corrupt {format} image: {reason}")]
    Corruption {
        /// Format that was identified
        format: FileSystemType,
        /// Description of the damage
        reason: String,
    },

    /// Operation not supported by this file, fork or file system
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Disk parameters that no copier can honour
    #[error("Invalid disk parameters: {0}")]
    InvalidParameters(String),

    /// A buffer view that does not fit inside its backing array
    #[error("Invalid buffer view: offset {offset} + length {length} exceeds {capacity}")]
    InvalidBuffer {
        /// Requested offset
        offset: usize,
        /// Requested length
        length: usize,
        /// Size of the backing array
        capacity: usize,
    },

    /// File not found in file system
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A compressed stream could not be expanded
    #[error("Decompression error: {0}")]
    Decompression(String),
}

impl FsError {
    /// Create a format mismatch error
    pub fn mismatch<S: Into<String>>(format: FileSystemType, reason: S) -> Self {
        FsError::FormatMismatch {
            format,
            reason: reason.into(),
        }
    }

    /// Create a structural corruption error
    pub fn corrupt<S: Into<String>>(format: FileSystemType, reason: S) -> Self {
        FsError::Corruption {
            format,
            reason: reason.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        FsError::Unsupported(message.into())
    }

    /// Create a decompression error
    pub fn decompression<S: Into<String>>(message: S) -> Self {
        FsError::Decompression(message.into())
    }

    /// True when the error only means "this buffer is not that format"
    pub fn is_format_mismatch(&self) -> bool {
        matches!(self, FsError::FormatMismatch { .. })
    }
}
