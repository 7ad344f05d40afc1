//! Batched Store Flushing
//!
//! Workers complete units far faster than a transaction-per-unit store
//! write path could absorb them. Both pipelines therefore funnel completed
//! units into one flusher task, which appends them in batches — a batch
//! fills up, or the flush interval elapses, whichever comes first. The
//! final drain happens when the last worker hangs up its sender.
//!
//! A failed batch is counted against the pipeline's failure stats and
//! logged; the write path never throws per unit.

use std::sync::Arc;
use std::time::Duration;

use palimpsest_store::{ChainStore, ContentUnit};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::stats::PipelineStats;

pub(crate) fn spawn_flusher(
    store: Arc<dyn ChainStore>,
    mut results: mpsc::Receiver<ContentUnit>,
    batch_size: usize,
    interval: Duration,
    stats: Arc<PipelineStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer: Vec<ContentUnit> = Vec::with_capacity(batch_size);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = results.recv() => match received {
                    Some(unit) => {
                        buffer.push(unit);
                        if buffer.len() >= batch_size {
                            flush(store.as_ref(), &mut buffer, &stats).await;
                        }
                    }
                    // All worker senders dropped: drain and stop.
                    None => break,
                },
                _ = ticker.tick() => {
                    flush(store.as_ref(), &mut buffer, &stats).await;
                }
            }
        }

        flush(store.as_ref(), &mut buffer, &stats).await;
    })
}

async fn flush(store: &dyn ChainStore, buffer: &mut Vec<ContentUnit>, stats: &PipelineStats) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);

    match store.append_units(&batch).await {
        Ok(()) => {
            debug!(units = batch.len(), "flushed unit batch");
        }
        Err(e) => {
            for _ in &batch {
                stats.inc_failed();
            }
            error!(error = %e, units = batch.len(), "failed to flush unit batch");
        }
    }
}
