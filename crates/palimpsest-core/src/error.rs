//! Error Types for the Palimpsest Codec Layer
//!
//! This module defines all error types that can occur while encoding or
//! decoding stored content.
//!
//! ## Error Categories
//!
//! ### Format Errors
//! - `InvalidEncoding`: Unknown encoding id — a data-format mismatch between
//!   the writer that produced a unit and the reader decoding it
//! - `MalformedPatch`: Patch bytes that cannot be parsed back into an edit
//!   sequence, or that do not fit the source they are applied to
//!
//! ### Codec Errors
//! - `Compression`: Failed to compress content
//! - `Decompression`: Failed to decompress content (likely corruption)
//!
//! ## Usage
//! All functions in this crate return `Result<T>` which is aliased to
//! `Result<T, Error>`. This allows using the `?` operator for error
//! propagation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid encoding id: {0}")]
    InvalidEncoding(u16),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Malformed patch: {0}")]
    MalformedPatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
