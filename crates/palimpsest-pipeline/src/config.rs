//! Pipeline Configuration
//!
//! This module defines configuration for the write pipelines.
//!
//! ## ArchiveConfig
//!
//! Controls how chains are encoded and how the worker pools behave:
//!
//! - **keyframe_interval**: Max consecutive diff units before a forced full
//!   keyframe (default: 50). Bounds the backward run a point read pays.
//! - **workers**: Worker pool size per pipeline (default: half of available
//!   hardware concurrency).
//! - **cache_capacity**: Plaintext cache size in units (default: 256).
//! - **seal_chain_tails**: Force the final unit of a finished chain to a
//!   full keyframe (default: true), making the most commonly read — latest
//!   — version an O(1) reconstruction.
//! - **full_encoding**: Encoding used for keyframes (default: Gzip; must
//!   not be Diff).
//! - **retry_attempts / retry_delay_ms**: Fixed-bound, fixed-delay retry
//!   for failed render/compress tasks (defaults: 16 attempts, 5s apart).
//! - **flush_batch / flush_interval_ms**: Completed units are flushed to
//!   the store in batches of this size, or after this interval, whichever
//!   comes first (defaults: 64 units, 1s).
//! - **queue_depth**: Bounded ingestion queue; a saturated pipeline blocks
//!   the submitting thread (default: 2 × workers).
//!
//! ## Usage
//!
//! ```ignore
//! use palimpsest_pipeline::ArchiveConfig;
//!
//! // Production defaults
//! let config = ArchiveConfig::default();
//!
//! // Test config: tight interval, fast retries
//! let config = ArchiveConfig {
//!     keyframe_interval: 2,
//!     workers: 1,
//!     retry_attempts: 2,
//!     retry_delay_ms: 10,
//!     ..Default::default()
//! };
//! ```

use palimpsest_core::Encoding;
use serde::{Deserialize, Serialize};

use crate::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Max consecutive diff units before a forced keyframe (default: 50)
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,

    /// Worker pool size per pipeline (default: half of hardware concurrency)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Plaintext cache capacity, in units (default: 256)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Force a finished chain's last unit to a full keyframe (default: true)
    #[serde(default = "default_seal_chain_tails")]
    pub seal_chain_tails: bool,

    /// Encoding for keyframes; must not be `Diff` (default: Gzip)
    #[serde(default = "default_full_encoding")]
    pub full_encoding: Encoding,

    /// Attempts before a failing task is given up on (default: 16)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between attempts, in milliseconds (default: 5000)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Units per store flush batch (default: 64)
    #[serde(default = "default_flush_batch")]
    pub flush_batch: usize,

    /// Max milliseconds a completed unit waits in the flush buffer
    /// (default: 1000)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Bounded ingestion queue depth (default: 2 × workers)
    #[serde(default)]
    pub queue_depth: Option<usize>,
}

fn default_keyframe_interval() -> u32 {
    50
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

fn default_cache_capacity() -> usize {
    256
}

fn default_seal_chain_tails() -> bool {
    true
}

fn default_full_encoding() -> Encoding {
    Encoding::Gzip
}

fn default_retry_attempts() -> u32 {
    16
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_flush_batch() -> usize {
    64
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            keyframe_interval: default_keyframe_interval(),
            workers: default_workers(),
            cache_capacity: default_cache_capacity(),
            seal_chain_tails: default_seal_chain_tails(),
            full_encoding: default_full_encoding(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            flush_batch: default_flush_batch(),
            flush_interval_ms: default_flush_interval_ms(),
            queue_depth: None,
        }
    }
}

impl ArchiveConfig {
    /// Effective ingestion queue depth.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(self.workers * 2).max(1)
    }

    /// Reject configurations the pipelines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.full_encoding == Encoding::Diff {
            return Err(PipelineError::InvalidConfig(
                "full_encoding must be a self-contained encoding, not Diff".to_string(),
            ));
        }
        if self.keyframe_interval == 0 {
            return Err(PipelineError::InvalidConfig(
                "keyframe_interval must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.flush_batch == 0 {
            return Err(PipelineError::InvalidConfig(
                "flush_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
