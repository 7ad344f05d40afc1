//! Reconstruction Error Types
//!
//! ## Error Categories
//!
//! ### Corruption (fatal for the read in progress)
//! - `Corrupt`: a diff unit whose predecessor cannot be resolved, or a
//!   chain walk that dies before reaching a full unit. Never retried —
//!   the stored chain itself is broken.
//! - `HashMismatch`: reconstructed plaintext does not match the integrity
//!   hash recorded at write time.
//!
//! ### Propagated
//! - `Codec`: malformed patch bytes or a corrupt compression stream
//! - `Store`: the backing store failed
//!
//! Read APIs surface these synchronously to the caller; the write
//! pipelines catch them per task and count failures instead of throwing.

use palimpsest_store::{ChainId, StoreError, UnitId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChainError>;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Corrupt chain: {0}")]
    Corrupt(String),

    #[error("Integrity hash mismatch for unit {id:?} in chain {chain:?}")]
    HashMismatch { chain: ChainId, id: UnitId },

    #[error("Codec error: {0}")]
    Codec(#[from] palimpsest_core::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
