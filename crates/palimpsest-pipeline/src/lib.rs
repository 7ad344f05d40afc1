//! Palimpsest Pipeline - Concurrent Write Paths for Content Chains
//!
//! Two pipelines feed the archive, sharing one scheduling skeleton
//! (bounded ingestion queue → single staging task → worker pool → batched
//! flusher):
//!
//! - [`CompressionScheduler`]: raw-text ingestion (dump import). Workers
//!   diff each version against its predecessor's plaintext, cached at
//!   submission time — no cross-worker dependency, full parallelism.
//! - [`RenderPipeline`]: rendered snapshot tiers. Workers first run the
//!   external [`RenderEngine`], and diff against the *predecessor's
//!   rendered output*, handed across workers through a one-shot
//!   completion map.
//!
//! All keyframe cadence and chain-finality bookkeeping is owned by the
//! single staging task — workers never share mutable scheduling state.
//! Failed tasks retry on a fixed cadence and then degrade to empty
//! placeholder units; the operator-facing result is a [`StatsSnapshot`],
//! never a per-unit error.

pub mod cache;
pub mod config;
pub mod error;
mod flush;
pub mod render;
pub mod scheduler;
mod sequencer;
pub mod stats;

pub use cache::PlainTextCache;
pub use config::ArchiveConfig;
pub use error::{PipelineError, Result};
pub use render::{RenderEngine, RenderPipeline, RenderSubmission};
pub use scheduler::{CompressionScheduler, RawSubmission};
pub use stats::{PipelineStats, StatsSnapshot};
