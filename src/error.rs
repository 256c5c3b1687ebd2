//! Error types for KeelKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using KeelError
pub type Result<T> = std::result::Result<T, KeelError>;

/// Unified error type for KeelKV operations
#[derive(Debug, Error)]
pub enum KeelError {
    /// The handle already owns an open file.
    #[error("store is already open")]
    AlreadyOpen,

    /// Opening a missing or empty file without a create flag, or the
    /// unique-key allocator exhausted its range.
    #[error("not found")]
    NotFound,

    /// The on-disk file is too short to hold a store header.
    #[error("file is shorter than a store header")]
    OutOfRange,

    /// A malformed image or a request that makes no sense.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A capacity or write request exceeds what the store may hold.
    #[error("request exceeds the store limits")]
    TooBig,

    /// The buffer could not be grown.
    #[error("out of memory")]
    OutOfMemory,

    /// The adjusted maximum size leaves no usable space.
    #[error("no usable space")]
    NoSpace,

    /// A filesystem primitive failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
