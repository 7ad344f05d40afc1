//! Pipeline Error Types
//!
//! ## Error Categories
//!
//! ### Caller Errors
//! - `InvalidConfig`: the pipeline cannot run with this configuration
//! - `Closed`: a submission arrived after `finish()` tore the pipeline down
//!
//! ### Task Errors (retried, then absorbed)
//! - `Render`: the external render engine failed
//! - `Chain` / `Codec` / `Store`: reconstruction, diffing or persistence
//!   failed inside a worker
//!
//! Task errors never escape a worker: they feed the retry loop, and on
//! exhaustion the task is committed as an empty placeholder and counted in
//! the pipeline stats. Only caller errors surface from the public API.

use palimpsest_chain::ChainError;
use palimpsest_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Pipeline is closed")]
    Closed,

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Codec error: {0}")]
    Codec(#[from] palimpsest_core::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal pipeline error: {0}")]
    Internal(String),
}
