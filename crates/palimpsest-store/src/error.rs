//! Store Error Types
//!
//! ## Error Categories
//!
//! ### Write Errors
//! - `DuplicateUnit`: a unit with the same identity or chronological key
//!   already exists in the chain
//! - `UnitNotFound`: a rewrite targeted a unit that is not in the store
//!
//! ### Backend Errors
//! - `Database`: the SQLite backend failed (connection, query, transaction)
//!
//! All store operations return `Result<T>`, aliased to
//! `Result<T, StoreError>`, so `?` propagates cleanly.

use thiserror::Error;

use crate::{ChainId, UnitId, UnitKey};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate unit {id:?} at {key:?} in chain {chain:?}")]
    DuplicateUnit {
        chain: ChainId,
        id: UnitId,
        key: UnitKey,
    },

    #[error("Unit {id:?} not found in chain {chain:?}")]
    UnitNotFound { chain: ChainId, id: UnitId },

    #[error("Invalid stored encoding id: {0}")]
    InvalidEncoding(u16),

    #[error("Cursor used after close")]
    CursorClosed,
}
