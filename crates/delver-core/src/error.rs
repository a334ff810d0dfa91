//! Error types for the delver-core library.
//!
//! Errors fall into two groups. Configuration errors (a bad input path, a
//! worker pool that cannot be built) are fatal and abort a run before any
//! traversal happens. Everything else is a per-item error: it is caught at
//! the engine's unit boundary, logged, counted and the run moves on.

use crate::handler::HandlerId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for delver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all delver operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The scan root is neither a file nor a directory, or cannot be read
    #[error("invalid scan root '{path}': {reason}")]
    Configuration {
        /// Offending path
        path: PathBuf,
        /// Why the path was rejected
        reason: String,
    },

    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to create output directory
    #[error("failed to create directory '{path}': {source}")]
    DirectoryCreate {
        /// Path to the directory that failed to create
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Path traversal attempt detected (security error)
    #[error("path traversal detected: '{path}' would escape output directory")]
    PathTraversal {
        /// The suspicious path
        path: PathBuf,
    },

    /// A fixed-layout read ran past the end of its buffer
    #[error("truncated data at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        /// Offset of the failed read
        offset: usize,
        /// Bytes the read required
        needed: usize,
        /// Bytes actually left
        available: usize,
    },

    /// Structurally invalid container or stream
    #[error("corrupt {format} data: {details}")]
    Corrupt {
        /// Format being parsed
        format: &'static str,
        /// Detailed description of the issue
        details: String,
    },

    /// No factory is registered for a descriptor's handler
    #[error("no handler registered for '{0}'")]
    HandlerMissing(HandlerId),

    /// A container referenced a sibling file that could not be opened
    #[error("sibling '{name}' referenced by container could not be resolved")]
    SiblingMissing {
        /// Name as declared by the container
        name: String,
    },

    /// Decompression failed
    #[error("failed to decompress {format} stream: {source}")]
    Decompress {
        /// Compression format
        format: &'static str,
        /// Underlying decoder error
        #[source]
        source: std::io::Error,
    },

    /// Decompressed output exceeded the configured ceiling
    #[error("decompressed output exceeds limit of {limit} bytes")]
    DecompressLimit {
        /// Configured ceiling in bytes
        limit: u64,
    },

    /// ZIP container parse failure
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Worker pool construction failure
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Unclassified I/O failure against a byte source
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new configuration error
    pub fn configuration(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new directory creation error
    pub fn directory_create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreate {
            path: path.into(),
            source,
        }
    }

    /// Creates a new path traversal error
    pub fn path_traversal(path: impl Into<PathBuf>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Creates a new truncation error
    pub fn truncated(offset: usize, needed: usize, available: usize) -> Self {
        Self::Truncated {
            offset,
            needed,
            available,
        }
    }

    /// Creates a new corrupt data error
    pub fn corrupt(format: &'static str, details: impl Into<String>) -> Self {
        Self::Corrupt {
            format,
            details: details.into(),
        }
    }

    /// Creates a new sibling resolution error
    pub fn sibling_missing(name: impl Into<String>) -> Self {
        Self::SiblingMissing { name: name.into() }
    }

    /// Creates a new decompression error
    pub fn decompress(format: &'static str, source: std::io::Error) -> Self {
        Self::Decompress { format, source }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error only affects the item being processed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration { .. } | Self::ThreadPool(_))
    }

    /// Returns true if the error stems from malformed input rather than the environment
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::Corrupt { .. }
                | Self::Zip(_)
                | Self::Decompress { .. }
                | Self::DecompressLimit { .. }
        )
    }
}
