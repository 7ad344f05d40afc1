//! Compression Scheduler - Concurrent Write Path for Raw-Text Ingestion
//!
//! This is the dump-import write path: a single ingestion thread submits
//! raw revisions, grouped by page and chronological within a page, and a
//! bounded worker pool turns each into a chain unit — a diff against its
//! predecessor's plaintext, or a full keyframe on the configured cadence.
//!
//! ## Shape
//!
//! ```text
//! submit() ──bounded queue──▶ staging task ──▶ worker pool (P) ──▶ flusher ──▶ store
//!                              │ sequencer:                │ diff/compress
//!                              │ keyframe + finality       │ predecessor text from
//!                              │ (single-threaded state)   │ cache, store on miss
//! ```
//!
//! A saturated pipeline blocks `submit()` — backpressure, not loss. The
//! staging task owns all keyframe bookkeeping (see the sequencer module);
//! workers share nothing but the plaintext cache, which is locked per
//! operation.
//!
//! Intra-chain tasks have no cross-worker data dependency: a worker needs
//! its predecessor's *plaintext*, which was known at submission time and
//! cached then. The one-submission staging lag is an ordering throttle,
//! not a correctness dependency, so tasks parallelize freely up to P.
//!
//! ## Failure Policy
//!
//! A failing task retries on a fixed cadence, then commits an empty raw
//! unit and bumps the failure counter. Ingestion never sees a per-unit
//! error; operators read the stats snapshot.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use palimpsest_chain::{plaintext_hash, reconstruct};
use palimpsest_core::{compress, diff, Encoding};
use palimpsest_store::{ChainId, ChainStore, ContentUnit, Track, UnitId, UnitKey};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::cache::PlainTextCache;
use crate::flush::spawn_flusher;
use crate::sequencer::{ChainSequencer, StagedTask};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::{ArchiveConfig, PipelineError, Result};

/// One raw-text version awaiting compression.
#[derive(Debug, Clone)]
pub struct RawSubmission {
    pub chain: ChainId,
    pub id: UnitId,
    pub key: UnitKey,
    pub text: Bytes,
}

/// Concurrent compression pipeline over a [`ChainStore`].
pub struct CompressionScheduler {
    submit_tx: mpsc::Sender<RawSubmission>,
    staging: JoinHandle<()>,
    flusher: JoinHandle<()>,
    stats: Arc<PipelineStats>,
}

impl CompressionScheduler {
    pub fn new(store: Arc<dyn ChainStore>, config: ArchiveConfig) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(PipelineStats::default());
        let cache = Arc::new(PlainTextCache::new(config.cache_capacity, stats.clone()));
        let (submit_tx, submit_rx) = mpsc::channel(config.queue_depth());
        let (result_tx, result_rx) = mpsc::channel(config.flush_batch * 2);

        let flusher = spawn_flusher(
            store.clone(),
            result_rx,
            config.flush_batch,
            Duration::from_millis(config.flush_interval_ms),
            stats.clone(),
        );

        let staging = tokio::spawn(staging_loop(
            store,
            cache,
            config,
            stats.clone(),
            submit_rx,
            result_tx,
        ));

        Ok(Self {
            submit_tx,
            staging,
            flusher,
            stats,
        })
    }

    /// Submit one raw version. Blocks when the pipeline is saturated.
    pub async fn submit(&self, submission: RawSubmission) -> Result<()> {
        self.stats.inc_submitted();
        self.submit_tx
            .send(submission)
            .await
            .map_err(|_| PipelineError::Closed)
    }

    /// Current counters, without waiting for in-flight work.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Drain the pipeline: dispatch the staged task, wait for every
    /// worker, flush the last batch, and report the final counters.
    pub async fn finish(self) -> Result<StatsSnapshot> {
        drop(self.submit_tx);
        self.staging
            .await
            .map_err(|e| PipelineError::Internal(format!("staging task failed: {e}")))?;
        self.flusher
            .await
            .map_err(|e| PipelineError::Internal(format!("flusher task failed: {e}")))?;
        Ok(self.stats.snapshot())
    }
}

async fn staging_loop(
    store: Arc<dyn ChainStore>,
    cache: Arc<PlainTextCache>,
    config: ArchiveConfig,
    stats: Arc<PipelineStats>,
    mut submit_rx: mpsc::Receiver<RawSubmission>,
    result_tx: mpsc::Sender<ContentUnit>,
) {
    let mut sequencer = ChainSequencer::new(config.keyframe_interval, config.seal_chain_tails);
    let pool = Arc::new(Semaphore::new(config.workers));

    while let Some(submission) = submit_rx.recv().await {
        // Cache the plaintext under this unit's identity *before* any
        // successor can be dispatched: that successor's worker will look
        // it up here.
        cache.put(submission.chain, submission.id, submission.text.clone());

        if let Some(staged) = sequencer.stage(submission.chain, submission.id, submission) {
            dispatch(staged, &store, &cache, &config, &stats, &result_tx, &pool).await;
        }
    }

    if let Some(staged) = sequencer.finish() {
        dispatch(staged, &store, &cache, &config, &stats, &result_tx, &pool).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    staged: StagedTask<RawSubmission>,
    store: &Arc<dyn ChainStore>,
    cache: &Arc<PlainTextCache>,
    config: &ArchiveConfig,
    stats: &Arc<PipelineStats>,
    result_tx: &mpsc::Sender<ContentUnit>,
    pool: &Arc<Semaphore>,
) {
    // Blocks staging (and transitively the ingestion thread) while the
    // pool is saturated.
    let permit = pool
        .clone()
        .acquire_owned()
        .await
        .expect("worker pool semaphore is never closed");

    let store = store.clone();
    let cache = cache.clone();
    let config = config.clone();
    let stats = stats.clone();
    let result_tx = result_tx.clone();

    tokio::spawn(async move {
        let unit = compress_task(&staged, store.as_ref(), &cache, &config, &stats).await;
        // The flusher outlives every worker; an error here only happens on
        // teardown after a panic.
        let _ = result_tx.send(unit).await;
        drop(permit);
    });
}

/// Run one compression task to completion: bounded retries, then the
/// empty-unit fallback that keeps the pipeline moving.
async fn compress_task(
    staged: &StagedTask<RawSubmission>,
    store: &dyn ChainStore,
    cache: &PlainTextCache,
    config: &ArchiveConfig,
    stats: &PipelineStats,
) -> ContentUnit {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match build_unit(staged, store, cache, config).await {
            Ok(unit) => {
                stats.inc_completed();
                if staged.keyframe {
                    stats.inc_keyframes();
                } else {
                    stats.inc_diff_units();
                }
                return unit;
            }
            Err(e) if attempt < config.retry_attempts => {
                stats.inc_retries();
                warn!(
                    page_id = staged.chain.page_id,
                    unit_id = staged.task.id.0,
                    attempt,
                    error = %e,
                    "compression task failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
            }
            Err(e) => {
                stats.inc_failed();
                error!(
                    page_id = staged.chain.page_id,
                    unit_id = staged.task.id.0,
                    attempts = attempt,
                    error = %e,
                    "compression task failed permanently, committing empty unit"
                );
                return empty_unit(staged.chain, staged.task.id, staged.task.key, staged.prev);
            }
        }
    }
}

async fn build_unit(
    staged: &StagedTask<RawSubmission>,
    store: &dyn ChainStore,
    cache: &PlainTextCache,
    config: &ArchiveConfig,
) -> Result<ContentUnit> {
    let submission = &staged.task;

    let (encoding, payload) = if staged.keyframe {
        (
            config.full_encoding,
            compress(&submission.text, config.full_encoding)?,
        )
    } else {
        let prev_id = staged
            .prev
            .ok_or_else(|| PipelineError::Internal("diff task without predecessor".to_string()))?;

        let prev_plain = match cache.get(submission.chain, prev_id) {
            Some(plain) => plain,
            // Evicted under pressure: rebuild from the store. If the
            // predecessor is still sitting in the flush buffer this fails,
            // and the retry cadence outlasts the flush interval.
            None => reconstruct(store, &submission.chain, prev_id).await?,
        };

        (Encoding::Diff, diff(&prev_plain, &submission.text)?)
    };

    Ok(ContentUnit {
        chain: submission.chain,
        id: submission.id,
        key: submission.key,
        parent: explicit_parent(submission.chain, staged.prev),
        encoding,
        payload,
        content_hash: Some(plaintext_hash(&submission.text)),
    })
}

/// Forward-progress fallback for an exhausted task.
pub(crate) fn empty_unit(
    chain: ChainId,
    id: UnitId,
    key: UnitKey,
    prev: Option<UnitId>,
) -> ContentUnit {
    ContentUnit {
        chain,
        id,
        key,
        parent: explicit_parent(chain, prev),
        encoding: Encoding::Raw,
        payload: Bytes::new(),
        content_hash: Some(plaintext_hash(b"")),
    }
}

/// Edit-history chains record explicit parent ids; snapshot chains rely
/// on chronological order.
pub(crate) fn explicit_parent(chain: ChainId, prev: Option<UnitId>) -> Option<UnitId> {
    match chain.track {
        Track::Source => prev,
        Track::Tier(_) => None,
    }
}
