//! Import Demo: compress a small revision history and read it back
//!
//! Feeds a few pages of synthetic revisions through the compression
//! scheduler, prints the pipeline counters, then walks one page's chain
//! with the streaming reconstructor.
//!
//! ```bash
//! cargo run -p palimpsest-pipeline --example import_demo
//! ```

use std::sync::Arc;

use bytes::Bytes;
use palimpsest_chain::ChainStream;
use palimpsest_pipeline::{ArchiveConfig, CompressionScheduler, RawSubmission};
use palimpsest_store::{ChainId, ChainStore, MemoryChainStore, UnitId, UnitKey};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let store: Arc<dyn ChainStore> = Arc::new(MemoryChainStore::new());
    let config = ArchiveConfig {
        keyframe_interval: 5,
        workers: 2,
        ..Default::default()
    };
    let scheduler = CompressionScheduler::new(store.clone(), config)?;

    // Three pages, twelve revisions each, grouped by page.
    for page_id in 1..=3u64 {
        let mut body = format!("== Page {page_id} ==\n");
        for revision in 0..12u32 {
            body.push_str(&format!("Revision {revision} adds this sentence.\n"));
            scheduler
                .submit(RawSubmission {
                    chain: ChainId::source(page_id),
                    id: UnitId(revision as u64 + 1),
                    key: UnitKey::new(1_700_000_000_000 + revision as i64 * 60_000, revision),
                    text: Bytes::from(body.clone()),
                })
                .await?;
        }
    }

    let stats = scheduler.finish().await?;
    println!(
        "imported: {} units ({} keyframes, {} diffs, {} failed)",
        stats.completed, stats.keyframes, stats.diff_units, stats.failed
    );

    // Stream page 1's whole history with one rolling plaintext.
    let mut stream = ChainStream::open(store, ChainId::source(1), None).await?;
    while let Some((unit, plaintext)) = stream.next().await? {
        println!(
            "unit {:>2}  {:>6?}  {:>5} bytes plain, {:>4} bytes stored",
            unit.id.0,
            unit.encoding,
            plaintext.len(),
            unit.payload.len()
        );
    }
    stream.close().await?;

    Ok(())
}
