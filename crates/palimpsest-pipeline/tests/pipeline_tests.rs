//! End-to-end pipeline tests: keyframe cadence, interleaved owners, cache
//! pressure, render handoff and failure degradation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use palimpsest_chain::{reconstruct, ChainStream};
use palimpsest_core::Encoding;
use palimpsest_pipeline::{
    ArchiveConfig, CompressionScheduler, PipelineError, RawSubmission, RenderEngine,
    RenderPipeline, RenderSubmission,
};
use palimpsest_store::{ChainId, ChainStore, ContentUnit, MemoryChainStore, UnitId, UnitKey};

fn test_config() -> ArchiveConfig {
    ArchiveConfig {
        keyframe_interval: 2,
        workers: 2,
        seal_chain_tails: false,
        retry_attempts: 3,
        retry_delay_ms: 10,
        flush_batch: 8,
        flush_interval_ms: 20,
        ..Default::default()
    }
}

fn raw(chain: ChainId, id: u64, order: u32, text: &str) -> RawSubmission {
    RawSubmission {
        chain,
        id: UnitId(id),
        key: UnitKey::new(1_000 * (order as i64 + 1), order),
        text: Bytes::copy_from_slice(text.as_bytes()),
    }
}

async fn chain_units(store: &dyn ChainStore, chain: ChainId) -> Vec<ContentUnit> {
    store.tail(&chain, UnitKey::new(0, 0)).await.unwrap()
}

#[tokio::test]
async fn test_forced_keyframe_scenario() {
    let store = Arc::new(MemoryChainStore::new());
    let scheduler = CompressionScheduler::new(store.clone(), test_config()).unwrap();
    let chain = ChainId::source(1);

    let texts = ["Hello", "Hello world", "Hello world!"];
    for (i, text) in texts.iter().enumerate() {
        scheduler
            .submit(raw(chain, i as u64 + 1, i as u32, text))
            .await
            .unwrap();
    }
    let stats = scheduler.finish().await.unwrap();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 0);

    let units = chain_units(store.as_ref(), chain).await;
    let encodings: Vec<Encoding> = units.iter().map(|u| u.encoding).collect();
    // K=2: the counter hits the interval at the third unit.
    assert_eq!(
        encodings,
        vec![Encoding::Gzip, Encoding::Diff, Encoding::Gzip]
    );

    // The forced keyframe decodes with no predecessor walk at all.
    assert!(units[2].encoding.is_full());
    let r3 = reconstruct(store.as_ref(), &chain, UnitId(3)).await.unwrap();
    assert_eq!(&r3[..], b"Hello world!");
}

#[tokio::test]
async fn test_interleaved_owners_keep_independent_keyframe_cadence() {
    let store = Arc::new(MemoryChainStore::new());
    let scheduler = CompressionScheduler::new(store.clone(), test_config()).unwrap();
    let a = ChainId::source(1);
    let b = ChainId::source(2);

    // A1 B1 A2 B2 A3 B3 with a pool of two workers.
    for i in 0..3u32 {
        for (chain, tag) in [(a, "a"), (b, "b")] {
            scheduler
                .submit(raw(chain, i as u64 + 1, i, &format!("{tag} version {i}")))
                .await
                .unwrap();
        }
    }
    let stats = scheduler.finish().await.unwrap();
    assert_eq!(stats.completed, 6);

    // Each owner's cadence follows its own submission sequence only.
    for (chain, tag) in [(a, "a"), (b, "b")] {
        let units = chain_units(store.as_ref(), chain).await;
        let encodings: Vec<Encoding> = units.iter().map(|u| u.encoding).collect();
        assert_eq!(
            encodings,
            vec![Encoding::Gzip, Encoding::Diff, Encoding::Gzip],
            "chain {tag}"
        );

        for (i, unit) in units.iter().enumerate() {
            let plain = reconstruct(store.as_ref(), &chain, unit.id).await.unwrap();
            assert_eq!(&plain[..], format!("{tag} version {i}").as_bytes());
        }
    }
}

#[tokio::test]
async fn test_finished_chain_tail_is_sealed() {
    let store = Arc::new(MemoryChainStore::new());
    let config = ArchiveConfig {
        keyframe_interval: 50,
        seal_chain_tails: true,
        ..test_config()
    };
    let scheduler = CompressionScheduler::new(store.clone(), config).unwrap();
    let a = ChainId::source(1);
    let b = ChainId::source(2);

    for i in 0..3u32 {
        scheduler
            .submit(raw(a, i as u64 + 1, i, &format!("a version {i}")))
            .await
            .unwrap();
    }
    scheduler.submit(raw(b, 1, 0, "b version 0")).await.unwrap();
    scheduler.finish().await.unwrap();

    let units = chain_units(store.as_ref(), a).await;
    let encodings: Vec<Encoding> = units.iter().map(|u| u.encoding).collect();
    // The owner switch retroactively sealed A's last unit: its latest
    // version now decodes without touching any predecessor.
    assert_eq!(
        encodings,
        vec![Encoding::Gzip, Encoding::Diff, Encoding::Gzip]
    );

    let latest = store.latest(&a).await.unwrap().unwrap();
    assert!(latest.encoding.is_full());
    assert_eq!(
        &reconstruct(store.as_ref(), &a, latest.id).await.unwrap()[..],
        b"a version 2"
    );
}

#[tokio::test]
async fn test_unsealed_tail_stays_a_diff() {
    let store = Arc::new(MemoryChainStore::new());
    let config = ArchiveConfig {
        keyframe_interval: 50,
        seal_chain_tails: false,
        ..test_config()
    };
    let scheduler = CompressionScheduler::new(store.clone(), config).unwrap();
    let chain = ChainId::source(1);

    for i in 0..3u32 {
        scheduler
            .submit(raw(chain, i as u64 + 1, i, &format!("version {i}")))
            .await
            .unwrap();
    }
    scheduler.finish().await.unwrap();

    let latest = store.latest(&chain).await.unwrap().unwrap();
    assert_eq!(latest.encoding, Encoding::Diff);
}

#[tokio::test]
async fn test_cache_pressure_falls_back_to_the_store() {
    let store = Arc::new(MemoryChainStore::new());
    let config = ArchiveConfig {
        keyframe_interval: 50,
        workers: 1,
        cache_capacity: 1,
        seal_chain_tails: false,
        retry_attempts: 20,
        retry_delay_ms: 25,
        flush_batch: 8,
        flush_interval_ms: 5,
        ..Default::default()
    };
    let scheduler = CompressionScheduler::new(store.clone(), config).unwrap();
    let chain = ChainId::source(1);

    for i in 0..3u32 {
        scheduler
            .submit(raw(chain, i as u64 + 1, i, &format!("version {i}")))
            .await
            .unwrap();
    }
    let stats = scheduler.finish().await.unwrap();

    // A one-entry cache cannot hold any predecessor; the workers must have
    // reconstructed from the store, and every value still converged.
    assert!(stats.cache_misses > 0);
    assert_eq!(stats.failed, 0);
    for i in 0..3u64 {
        let plain = reconstruct(store.as_ref(), &chain, UnitId(i + 1)).await.unwrap();
        assert_eq!(&plain[..], format!("version {i}").as_bytes());
    }
}

#[tokio::test]
async fn test_long_import_bounds_reconstruction_runs() {
    let store = Arc::new(MemoryChainStore::new());
    let config = ArchiveConfig {
        keyframe_interval: 10,
        workers: 4,
        seal_chain_tails: true,
        flush_batch: 16,
        flush_interval_ms: 20,
        ..test_config()
    };
    let scheduler = CompressionScheduler::new(store.clone(), config).unwrap();
    let chain = ChainId::source(1);

    let mut body = String::from("== Start ==\n");
    let mut texts = Vec::new();
    for i in 0..120u32 {
        body.push_str(&format!("Edit number {i} adds this line.\n"));
        texts.push(body.clone());
        scheduler
            .submit(raw(chain, i as u64 + 1, i, &body))
            .await
            .unwrap();
    }
    let stats = scheduler.finish().await.unwrap();
    assert_eq!(stats.completed, 120);
    assert_eq!(stats.failed, 0);
    assert!(stats.keyframes >= 12);

    // No stored run of consecutive diffs may exceed the interval.
    let units = chain_units(store.as_ref(), chain).await;
    assert_eq!(units.len(), 120);
    let mut run = 0u32;
    for unit in &units {
        if unit.encoding == Encoding::Diff {
            run += 1;
            assert!(run <= 10, "diff run exceeded the keyframe interval");
        } else {
            run = 0;
        }
    }

    // Point and streaming reconstruction agree on the whole import.
    let dyn_store: Arc<dyn ChainStore> = store.clone();
    let mut stream = ChainStream::open(dyn_store, chain, None).await.unwrap();
    for (unit, text) in units.iter().zip(&texts) {
        let point = reconstruct(store.as_ref(), &chain, unit.id).await.unwrap();
        let (_, streamed) = stream.next().await.unwrap().unwrap();
        assert_eq!(point, streamed);
        assert_eq!(&point[..], text.as_bytes());
    }
    assert!(stream.next().await.unwrap().is_none());
    stream.close().await.unwrap();
}

// ---------------------------------------------------------------
// Render pipeline
// ---------------------------------------------------------------

#[derive(Default)]
struct MockEngine {
    calls: Mutex<Vec<String>>,
    /// Titles that fail on every attempt.
    broken_titles: HashSet<String>,
    /// Titles that fail once, then succeed.
    flaky_titles: Mutex<HashSet<String>>,
}

impl MockEngine {
    fn broken(titles: &[&str]) -> Self {
        Self {
            broken_titles: titles.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn flaky(titles: &[&str]) -> Self {
        Self {
            flaky_titles: Mutex::new(titles.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        }
    }

    fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderEngine for MockEngine {
    async fn render(
        &self,
        title: &str,
        wikitext: &str,
        as_of_ms: i64,
    ) -> Result<String, PipelineError> {
        self.calls.lock().unwrap().push(title.to_string());

        if self.broken_titles.contains(title) {
            return Err(PipelineError::Render(format!("no parse for {title}")));
        }
        if self.flaky_titles.lock().unwrap().remove(title) {
            return Err(PipelineError::Render(format!("transient failure for {title}")));
        }

        Ok(format!("<html data-asof=\"{as_of_ms}\">{wikitext}</html>"))
    }
}

fn rendered_html(wikitext: &str, order: u32) -> String {
    format!(
        "<html data-asof=\"{}\">{wikitext}</html>",
        1_000 * (order as i64 + 1)
    )
}

fn render_sub(chain: ChainId, id: u64, order: u32, title: &str, wikitext: &str) -> RenderSubmission {
    RenderSubmission {
        chain,
        id: UnitId(id),
        key: UnitKey::new(1_000 * (order as i64 + 1), order),
        title: title.to_string(),
        wikitext: wikitext.to_string(),
    }
}

#[tokio::test]
async fn test_render_handoff_with_pool_of_one() {
    let store = Arc::new(MemoryChainStore::new());
    let engine = Arc::new(MockEngine::default());
    let config = ArchiveConfig {
        keyframe_interval: 100,
        workers: 1,
        seal_chain_tails: false,
        ..test_config()
    };
    let pipeline = RenderPipeline::new(store.clone(), engine.clone(), config).unwrap();
    let chain = ChainId::tier(1, 0);

    let texts = ["first draft", "second draft", "third draft"];
    for (i, text) in texts.iter().enumerate() {
        pipeline
            .submit(render_sub(
                chain,
                i as u64 + 1,
                i as u32,
                &format!("Lighthouse r{}", i + 1),
                text,
            ))
            .await
            .unwrap();
    }
    let stats = pipeline.finish().await.unwrap();

    // Three chained tasks on a single worker: no deadlock, and the render
    // calls happened in submission order.
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        engine.call_log(),
        vec!["Lighthouse r1", "Lighthouse r2", "Lighthouse r3"]
    );

    let units = chain_units(store.as_ref(), chain).await;
    assert_eq!(units.len(), 3);
    for (i, (unit, text)) in units.iter().zip(&texts).enumerate() {
        let plain = reconstruct(store.as_ref(), &chain, unit.id).await.unwrap();
        assert_eq!(&plain[..], rendered_html(text, i as u32).as_bytes());
    }
}

#[tokio::test]
async fn test_render_diffs_are_based_on_rendered_output() {
    let store = Arc::new(MemoryChainStore::new());
    let engine = Arc::new(MockEngine::default());
    let config = ArchiveConfig {
        keyframe_interval: 100,
        workers: 2,
        seal_chain_tails: false,
        ..test_config()
    };
    let pipeline = RenderPipeline::new(store.clone(), engine, config).unwrap();
    let chain = ChainId::tier(1, 0);

    pipeline
        .submit(render_sub(chain, 1, 0, "Lighthouse", "alpha"))
        .await
        .unwrap();
    pipeline
        .submit(render_sub(chain, 2, 1, "Lighthouse", "alpha beta"))
        .await
        .unwrap();
    pipeline.finish().await.unwrap();

    let units = chain_units(store.as_ref(), chain).await;
    assert_eq!(units[0].encoding, Encoding::Gzip);
    assert_eq!(units[1].encoding, Encoding::Diff);

    // The second unit's patch replays against the predecessor's *rendered*
    // output — if it had been diffed against raw wikitext, this decode
    // could not produce the rendered html.
    let second = reconstruct(store.as_ref(), &chain, UnitId(2)).await.unwrap();
    assert_eq!(&second[..], rendered_html("alpha beta", 1).as_bytes());
}

#[tokio::test]
async fn test_render_failure_degrades_to_empty_unit_and_unblocks_successor() {
    let store = Arc::new(MemoryChainStore::new());
    let engine = Arc::new(MockEngine::broken(&["Broken"]));
    let config = ArchiveConfig {
        keyframe_interval: 100,
        workers: 2,
        seal_chain_tails: false,
        retry_attempts: 2,
        retry_delay_ms: 10,
        ..test_config()
    };
    let pipeline = RenderPipeline::new(store.clone(), engine, config).unwrap();
    let chain = ChainId::tier(1, 0);

    pipeline
        .submit(render_sub(chain, 1, 0, "Good", "intro"))
        .await
        .unwrap();
    pipeline
        .submit(render_sub(chain, 2, 1, "Broken", "unparseable"))
        .await
        .unwrap();
    pipeline
        .submit(render_sub(chain, 3, 2, "Good", "outro"))
        .await
        .unwrap();
    let stats = pipeline.finish().await.unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 2);

    // The failed unit is an empty raw placeholder...
    let broken = store.unit(&chain, UnitId(2)).await.unwrap().unwrap();
    assert_eq!(broken.encoding, Encoding::Raw);
    assert_eq!(
        reconstruct(store.as_ref(), &chain, UnitId(2)).await.unwrap(),
        Bytes::new()
    );

    // ...and its successor diffed against the same empty rendering, so the
    // chain stays decodable end to end.
    let third = reconstruct(store.as_ref(), &chain, UnitId(3)).await.unwrap();
    assert_eq!(&third[..], rendered_html("outro", 2).as_bytes());
}

#[tokio::test]
async fn test_transient_render_failure_is_retried() {
    let store = Arc::new(MemoryChainStore::new());
    let engine = Arc::new(MockEngine::flaky(&["Flaky"]));
    let config = ArchiveConfig {
        keyframe_interval: 100,
        workers: 1,
        seal_chain_tails: false,
        retry_attempts: 3,
        retry_delay_ms: 5,
        ..test_config()
    };
    let pipeline = RenderPipeline::new(store.clone(), engine.clone(), config).unwrap();
    let chain = ChainId::tier(1, 0);

    pipeline
        .submit(render_sub(chain, 1, 0, "Flaky", "recovers"))
        .await
        .unwrap();
    let stats = pipeline.finish().await.unwrap();

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
    assert!(stats.retries >= 1);
    assert_eq!(engine.call_log().len(), 2);

    let plain = reconstruct(store.as_ref(), &chain, UnitId(1)).await.unwrap();
    assert_eq!(&plain[..], rendered_html("recovers", 0).as_bytes());
}

#[tokio::test]
async fn test_empty_ingestion_stream_finishes_clean() {
    let store = Arc::new(MemoryChainStore::new());
    let scheduler = CompressionScheduler::new(store.clone(), test_config()).unwrap();
    let stats = scheduler.finish().await.unwrap();
    assert_eq!(stats.submitted, 0);
    assert_eq!(stats.completed, 0);
    assert_eq!(store.unit_count().await, 0);
}
