//! Palimpsest Chain - Reading and Rewriting Delta-Compressed Histories
//!
//! Everything that turns stored chain units back into plaintext, and the
//! one operation allowed to change history after the fact:
//!
//! - [`reconstruct`]: random-access decode of one chain position
//! - [`ChainStream`]: lazy forward decode of a whole chain with one
//!   rolling plaintext (the cheap way to read *every* version)
//! - [`rewrite_value`]: out-of-order edit with cascading re-diff of the
//!   affected tail
//!
//! Point and streaming reconstruction agree byte-for-byte on every
//! position of every chain — the integration tests pin that equivalence.

pub mod error;
pub mod mutator;
pub mod reconstruct;
pub mod stream;

pub use error::{ChainError, Result};
pub use mutator::{rewrite_value, RewriteOutcome};
pub use reconstruct::{plaintext_hash, reconstruct, reconstruct_unit};
pub use stream::ChainStream;
