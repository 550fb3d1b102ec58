//! Error types for ZIM archive operations

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZimError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid archive format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported compression type {0}")]
    UnsupportedCompression(u8),

    #[error("{what} index {index} out of range (count {count})")]
    OutOfRange {
        what: &'static str,
        index: u64,
        count: u64,
    },

    #[error("Malformed directory entry: {0}")]
    MalformedDirent(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Decoded stream ended early: expected {expected} bytes, got {actual}")]
    TruncatedStream { expected: u64, actual: u64 },

    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),
}

pub type Result<T> = std::result::Result<T, ZimError>;
