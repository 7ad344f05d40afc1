//! Render Pipeline - Concurrent Write Path for Rendered Snapshot Tiers
//!
//! Same scheduling shape as the compression scheduler, with one twist that
//! changes the coordination problem entirely: the diff input for a
//! non-keyframe unit is the *rendered output* of the predecessor — and
//! that output may still be mid-computation on a sibling worker.
//!
//! ## The Handoff
//!
//! Workers share a [`RenderExchange`]: a mutex-guarded map from unit
//! identity to a one-shot completion slot. The producing worker publishes
//! its rendered output *before* starting its own diff/compress step; the
//! single consumer takes the entry (consume-once) and parks on a oneshot
//! if it arrives first. Two facts make this deadlock-free:
//!
//! - per-chain submission order means a predecessor is always dispatched
//!   strictly before its successor, so nobody waits on a task that will
//!   never be scheduled — pool size 1 included
//! - a worker that exhausts its retries still publishes (an empty
//!   rendering), so its successor never waits on a value that will not
//!   arrive — and the successor's diff against that empty rendering stays
//!   consistent with the empty unit the failed task commits
//!
//! A successor can still finish rendering and then sit blocked on a slower
//! predecessor; with a finite pool that stall is the accepted cost of this
//! design.
//!
//! ## The Render Boundary
//!
//! Wikitext-to-HTML conversion itself is a collaborator behind the
//! [`RenderEngine`] trait. Engines may call back into the store to resolve
//! embedded content as of the unit's timestamp.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use palimpsest_chain::plaintext_hash;
use palimpsest_core::{compress, diff, Encoding};
use palimpsest_store::{ChainId, ChainStore, ContentUnit, UnitId, UnitKey};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::flush::spawn_flusher;
use crate::scheduler::{empty_unit, explicit_parent};
use crate::sequencer::{ChainSequencer, StagedTask};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::{ArchiveConfig, PipelineError, Result};

/// Wikitext-to-HTML renderer, supplied by the embedding application.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Render `wikitext` as the page looked at `as_of_ms`.
    async fn render(&self, title: &str, wikitext: &str, as_of_ms: i64) -> Result<String>;
}

/// One revision awaiting render-and-diff.
#[derive(Debug, Clone)]
pub struct RenderSubmission {
    /// Target chain — a tier track of the page.
    pub chain: ChainId,
    pub id: UnitId,
    pub key: UnitKey,
    pub title: String,
    pub wikitext: String,
}

/// Concurrent render-and-diff pipeline over a [`ChainStore`].
pub struct RenderPipeline {
    submit_tx: mpsc::Sender<RenderSubmission>,
    staging: JoinHandle<()>,
    flusher: JoinHandle<()>,
    stats: Arc<PipelineStats>,
}

impl RenderPipeline {
    pub fn new(
        store: Arc<dyn ChainStore>,
        engine: Arc<dyn RenderEngine>,
        config: ArchiveConfig,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(PipelineStats::default());
        let (submit_tx, submit_rx) = mpsc::channel(config.queue_depth());
        let (result_tx, result_rx) = mpsc::channel(config.flush_batch * 2);

        let flusher = spawn_flusher(
            store,
            result_rx,
            config.flush_batch,
            Duration::from_millis(config.flush_interval_ms),
            stats.clone(),
        );

        let staging = tokio::spawn(staging_loop(
            engine,
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

    /// Submit one revision for rendering. Blocks when the pipeline is
    /// saturated.
    pub async fn submit(&self, submission: RenderSubmission) -> Result<()> {
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

    /// Drain the pipeline and report the final counters.
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
    engine: Arc<dyn RenderEngine>,
    config: ArchiveConfig,
    stats: Arc<PipelineStats>,
    mut submit_rx: mpsc::Receiver<RenderSubmission>,
    result_tx: mpsc::Sender<ContentUnit>,
) {
    let mut sequencer = ChainSequencer::new(config.keyframe_interval, config.seal_chain_tails);
    let pool = Arc::new(Semaphore::new(config.workers));
    let exchange = Arc::new(RenderExchange::default());

    while let Some(submission) = submit_rx.recv().await {
        if let Some(staged) = sequencer.stage(submission.chain, submission.id, submission) {
            dispatch(staged, &engine, &exchange, &config, &stats, &result_tx, &pool).await;
        }
    }

    if let Some(staged) = sequencer.finish() {
        dispatch(staged, &engine, &exchange, &config, &stats, &result_tx, &pool).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    staged: StagedTask<RenderSubmission>,
    engine: &Arc<dyn RenderEngine>,
    exchange: &Arc<RenderExchange>,
    config: &ArchiveConfig,
    stats: &Arc<PipelineStats>,
    result_tx: &mpsc::Sender<ContentUnit>,
    pool: &Arc<Semaphore>,
) {
    let permit = pool
        .clone()
        .acquire_owned()
        .await
        .expect("worker pool semaphore is never closed");

    let engine = engine.clone();
    let exchange = exchange.clone();
    let config = config.clone();
    let stats = stats.clone();
    let result_tx = result_tx.clone();

    tokio::spawn(async move {
        let unit = render_task(&staged, engine.as_ref(), &exchange, &config, &stats).await;
        let _ = result_tx.send(unit).await;
        drop(permit);
    });
}

/// Run one render-and-diff task: bounded render retries, publish the
/// output for the successor, then encode against the predecessor's
/// rendered output.
async fn render_task(
    staged: &StagedTask<RenderSubmission>,
    engine: &dyn RenderEngine,
    exchange: &RenderExchange,
    config: &ArchiveConfig,
    stats: &PipelineStats,
) -> ContentUnit {
    let submission = &staged.task;

    let rendered = match render_with_retries(staged, engine, config, stats).await {
        Ok(html) => Bytes::from(html),
        Err(e) => {
            stats.inc_failed();
            error!(
                page_id = submission.chain.page_id,
                unit_id = submission.id.0,
                title = %submission.title,
                error = %e,
                "render task failed permanently, committing empty unit"
            );
            // Unblock the successor with the same empty value the store
            // will hold for this unit.
            if !staged.chain_final {
                exchange.publish(submission.chain, submission.id, Bytes::new());
            }
            return empty_unit(submission.chain, submission.id, submission.key, staged.prev);
        }
    };

    // Publish before the diff/compress step so the successor can start
    // as soon as possible; chain-final tasks have no consumer.
    if !staged.chain_final {
        exchange.publish(submission.chain, submission.id, rendered.clone());
    }

    match encode_rendered(staged, &rendered, exchange, config).await {
        Ok(unit) => {
            stats.inc_completed();
            if staged.keyframe {
                stats.inc_keyframes();
            } else {
                stats.inc_diff_units();
            }
            unit
        }
        Err(e) => {
            stats.inc_failed();
            error!(
                page_id = submission.chain.page_id,
                unit_id = submission.id.0,
                error = %e,
                "encoding rendered unit failed, committing empty unit"
            );
            empty_unit(submission.chain, submission.id, submission.key, staged.prev)
        }
    }
}

async fn render_with_retries(
    staged: &StagedTask<RenderSubmission>,
    engine: &dyn RenderEngine,
    config: &ArchiveConfig,
    stats: &PipelineStats,
) -> Result<String> {
    let submission = &staged.task;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match engine
            .render(
                &submission.title,
                &submission.wikitext,
                submission.key.timestamp_ms,
            )
            .await
        {
            Ok(html) => return Ok(html),
            Err(e) if attempt < config.retry_attempts => {
                stats.inc_retries();
                warn!(
                    page_id = submission.chain.page_id,
                    unit_id = submission.id.0,
                    title = %submission.title,
                    attempt,
                    error = %e,
                    "render failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn encode_rendered(
    staged: &StagedTask<RenderSubmission>,
    rendered: &Bytes,
    exchange: &RenderExchange,
    config: &ArchiveConfig,
) -> Result<ContentUnit> {
    let submission = &staged.task;

    let (encoding, payload) = if staged.keyframe {
        (config.full_encoding, compress(rendered, config.full_encoding)?)
    } else {
        let prev_id = staged
            .prev
            .ok_or_else(|| PipelineError::Internal("diff task without predecessor".to_string()))?;
        let prev_rendered = exchange.take(submission.chain, prev_id).await?;
        (Encoding::Diff, diff(&prev_rendered, rendered)?)
    };

    Ok(ContentUnit {
        chain: submission.chain,
        id: submission.id,
        key: submission.key,
        parent: explicit_parent(submission.chain, staged.prev),
        encoding,
        payload,
        content_hash: Some(plaintext_hash(rendered)),
    })
}

/// Rendezvous map from unit identity to its completed rendering.
///
/// Entries are produced once and consumed once. The lock guards map
/// operations only — a waiting consumer parks on its oneshot with the
/// lock released.
#[derive(Default)]
struct RenderExchange {
    slots: Mutex<HashMap<(ChainId, UnitId), Slot>>,
}

enum Slot {
    /// Producer finished first.
    Ready(Bytes),
    /// Consumer arrived first and is parked on the receiver half.
    Waiting(oneshot::Sender<Bytes>),
}

impl RenderExchange {
    fn publish(&self, chain: ChainId, id: UnitId, rendered: Bytes) {
        let waiter = {
            let mut slots = self.slots.lock().expect("exchange lock poisoned");
            match slots.remove(&(chain, id)) {
                Some(Slot::Waiting(tx)) => Some(tx),
                _ => {
                    slots.insert((chain, id), Slot::Ready(rendered.clone()));
                    None
                }
            }
        };

        if let Some(tx) = waiter {
            // The consumer only drops its receiver on teardown.
            let _ = tx.send(rendered);
        }
    }

    async fn take(&self, chain: ChainId, id: UnitId) -> Result<Bytes> {
        let receiver = {
            let mut slots = self.slots.lock().expect("exchange lock poisoned");
            match slots.remove(&(chain, id)) {
                Some(Slot::Ready(rendered)) => return Ok(rendered),
                Some(Slot::Waiting(_)) => {
                    return Err(PipelineError::Internal(format!(
                        "two consumers for rendered unit {id:?}"
                    )));
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert((chain, id), Slot::Waiting(tx));
                    rx
                }
            }
        };

        receiver.await.map_err(|_| {
            PipelineError::Internal(format!("producer of rendered unit {id:?} vanished"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exchange_producer_first() {
        let exchange = RenderExchange::default();
        let chain = ChainId::tier(1, 0);
        exchange.publish(chain, UnitId(1), Bytes::from_static(b"<p>html</p>"));

        let taken = exchange.take(chain, UnitId(1)).await.unwrap();
        assert_eq!(taken, Bytes::from_static(b"<p>html</p>"));

        // Consume-once: the entry is gone; a second take would park, so
        // only verify the map is empty.
        assert!(exchange.slots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_consumer_first() {
        let exchange = Arc::new(RenderExchange::default());
        let chain = ChainId::tier(1, 0);

        let consumer = {
            let exchange = exchange.clone();
            tokio::spawn(async move { exchange.take(chain, UnitId(1)).await })
        };

        // Give the consumer time to park.
        tokio::task::yield_now().await;
        exchange.publish(chain, UnitId(1), Bytes::from_static(b"late"));

        let taken = consumer.await.unwrap().unwrap();
        assert_eq!(taken, Bytes::from_static(b"late"));
        assert!(exchange.slots.lock().unwrap().is_empty());
    }
}
