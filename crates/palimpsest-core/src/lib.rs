//! Palimpsest Core - Codec Primitives for Delta-Compressed Content Chains
//!
//! This crate is the leaf of the workspace: the byte-level machinery that
//! every stored page version passes through, with no I/O and no runtime
//! dependencies.
//!
//! - [`Encoding`]: the five storage encodings a content unit can carry
//! - [`codec`]: compress/decompress for the four self-contained encodings
//! - [`patch`]: diff/apply — the differential encoding used for most units
//! - [`varint`]: length encoding for the patch wire format
//!
//! ## The Round-Trip Contracts
//!
//! Everything above this crate leans on two equalities:
//!
//! ```text
//! decompress(compress(x, k), k) == x          for every full encoding k
//! apply(a, diff(a, b))          == b          for every pair (a, b)
//! ```
//!
//! Both are byte-exact, including empty inputs and `a == b`.

pub mod codec;
pub mod encoding;
pub mod error;
pub mod patch;
pub mod varint;

pub use codec::{compress, decompress};
pub use encoding::Encoding;
pub use error::{Error, Result};
pub use patch::{apply, diff};
