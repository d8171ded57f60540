//! End-to-end request handling through the orchestrator.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{CountingGenerator, DIM, KeywordEmbedder, assert_window_bound};
use quill_rag::{
    CacheConfig, CostModel, FlatIndex, GenerationParams, Length, RagConfig, RagError,
    RagOrchestrator, RequestParams, ResultCache, SourceText, Stage, Style,
};

struct Harness {
    orchestrator: Arc<RagOrchestrator>,
    embedder: Arc<KeywordEmbedder>,
    generator: Arc<CountingGenerator>,
}

fn harness(config: RagConfig, generator: CountingGenerator) -> Harness {
    let embedder = Arc::new(KeywordEmbedder::default());
    let generator = Arc::new(generator);
    let orchestrator = RagOrchestrator::builder()
        .config(config)
        .embedding_provider(embedder.clone())
        .generation_provider(generator.clone())
        .build()
        .unwrap();
    Harness { orchestrator: Arc::new(orchestrator), embedder, generator }
}

fn default_harness() -> Harness {
    harness(RagConfig::default(), CountingGenerator::default())
}

fn params(pairs: &[(&str, &str)]) -> RequestParams {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[tokio::test]
async fn identical_requests_within_ttl_generate_once() {
    let h = default_harness();
    let p = params(&[("style", "witty"), ("tone", "playful")]);

    let first = h.orchestrator.handle("X", &p).await.unwrap();
    let second = h.orchestrator.handle("X", &p).await.unwrap();

    assert_eq!(h.generator.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(first.params.style, Style::Witty);

    let stats = h.orchestrator.stats().await;
    assert_eq!((stats.requests, stats.cache_hits, stats.generations), (2, 1, 1));
    // the cache hit never reached the rate limiter
    assert_eq!(stats.rate_limiter.grants, 1);
}

#[tokio::test]
async fn incidental_formatting_maps_to_the_same_entry() {
    let h = default_harness();
    let a = h
        .orchestrator
        .handle("summer  sale\n", &params(&[("Style", " WITTY "), ("language", "EN")]))
        .await
        .unwrap();
    let b = h.orchestrator.handle("  summer sale", &params(&[("style", "witty")])).await.unwrap();

    assert_eq!(a.fingerprint, b.fingerprint);
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn unsupported_style_fails_before_any_work() {
    let h = default_harness();
    let err = h.orchestrator.handle("X", &params(&[("style", "limerick")])).await.unwrap_err();

    assert_eq!(err.stage, Stage::Validating);
    assert!(matches!(err.error, RagError::InvalidArgument(_)));
    assert!(!err.is_retryable());
    assert_eq!(h.embedder.calls(), 0);
    assert_eq!(h.generator.calls(), 0);

    let stats = h.orchestrator.stats().await;
    assert_eq!(stats.rate_limiter.grants, 0);
    assert_eq!(stats.failures.validating, 1);
    assert_eq!(stats.cache.entries, 0);
}

#[tokio::test]
async fn empty_query_is_invalid() {
    let h = default_harness();
    let err = h.orchestrator.handle(" \t ", &RequestParams::new()).await.unwrap_err();
    assert_eq!(err.stage, Stage::Validating);
}

#[tokio::test]
async fn concurrent_identical_misses_are_coalesced() {
    let h = harness(RagConfig::default(), CountingGenerator::with_delay(Duration::from_millis(50)));
    let p = params(&[("length", "short")]);

    let (a, b) = tokio::join!(
        h.orchestrator.handle("flash sale", &p),
        h.orchestrator.handle("flash sale", &p)
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(h.generator.calls(), 1);
    let stats = h.orchestrator.stats().await;
    assert_eq!((stats.coalesced, stats.rate_limiter.grants), (1, 1));
}

#[tokio::test]
async fn failed_leader_does_not_poison_followers() {
    let h = harness(RagConfig::default(), CountingGenerator::failing(1));
    let p = RequestParams::new();

    let (a, b) =
        tokio::join!(h.orchestrator.handle("promo", &p), h.orchestrator.handle("promo", &p));

    let err = a.unwrap_err();
    assert_eq!(err.stage, Stage::Generating);
    assert!(matches!(err.error, RagError::GenerationFailed { status: Some(503), .. }));
    assert!(err.is_retryable());
    assert!(b.is_ok());

    // the failure was not cached; the follower paid for its own generation
    assert_eq!(h.generator.calls(), 2);
    let stats = h.orchestrator.stats().await;
    assert_eq!((stats.failures.generating, stats.rate_limiter.grants), (1, 2));
}

#[tokio::test]
async fn retrieved_context_is_passed_to_generation() {
    let h = harness(RagConfig::builder().top_k(2).build().unwrap(), CountingGenerator::default());
    let indexed = h
        .orchestrator
        .ingest_batch(vec![
            SourceText::new("coffee", "coffee beans roasted daily"),
            SourceText::new("tea", "green tea leaves"),
            SourceText::new("cake", "chocolate cake slices").with_metadata("source", "menu"),
        ])
        .await
        .unwrap();
    assert_eq!(indexed, 3);

    let result = h.orchestrator.handle("coffee beans", &RequestParams::new()).await.unwrap();
    assert_eq!(result.sources.len(), 2);
    assert_eq!(result.sources[0].id, "coffee");
    assert!(result.text.ends_with("(2 sources)"));
    assert!(result.sources[0].score >= result.sources[1].score);
}

#[tokio::test]
async fn similarity_threshold_filters_weak_matches() {
    let config = RagConfig::builder().top_k(5).similarity_threshold(0.5).build().unwrap();
    let h = harness(config, CountingGenerator::default());
    h.orchestrator.ingest(SourceText::new("coffee", "coffee beans")).await.unwrap();

    let hits = h.orchestrator.retrieve("coffee beans").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].score > 0.99);

    let embedding = common::keyword_embedding("coffee beans");
    let orthogonal = (0..DIM).find(|&i| embedding[i] == 0.0).unwrap();
    let mut other = vec![0.0; DIM];
    other[orthogonal] = 1.0;
    h.orchestrator
        .add_document(quill_rag::Document::new("unrelated", "unrelated", other))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.retrieve("coffee beans").await.unwrap().len(), 1);
}

#[tokio::test]
async fn ingest_reports_index_errors() {
    let h = default_harness();
    h.orchestrator.ingest(SourceText::new("a", "alpha text")).await.unwrap();
    let err = h.orchestrator.ingest(SourceText::new("a", "other text")).await.unwrap_err();
    assert_eq!(err, RagError::DuplicateId("a".into()));

    assert!(h.orchestrator.remove_document("a").await.unwrap());
    assert_eq!(h.orchestrator.stats().await.index.documents, 0);
}

#[tokio::test]
async fn embedding_outage_fails_at_retrieval() {
    let h = default_harness();
    h.embedder.fail.store(true, Ordering::SeqCst);

    let err = h.orchestrator.handle("anything", &RequestParams::new()).await.unwrap_err();
    assert_eq!(err.stage, Stage::Retrieving);
    assert!(matches!(err.error, RagError::EmbeddingUnavailable { .. }));
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.orchestrator.stats().await.rate_limiter.grants, 0);

    // nothing was cached, so the next request retries the full path
    h.embedder.fail.store(false, Ordering::SeqCst);
    h.orchestrator.handle("anything", &RequestParams::new()).await.unwrap();
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn results_expire_after_ttl() {
    let config = RagConfig::builder().cache_ttl(Duration::from_secs(10)).build().unwrap();
    let h = harness(config, CountingGenerator::default());
    let p = RequestParams::new();

    h.orchestrator.handle("X", &p).await.unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;
    h.orchestrator.handle("X", &p).await.unwrap();
    assert_eq!(h.generator.calls(), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    h.orchestrator.handle("X", &p).await.unwrap();
    assert_eq!(h.generator.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn fifty_concurrent_requests_stay_within_rate_budget() {
    let config = RagConfig::builder()
        .rate_limit(10)
        .rate_window(Duration::from_secs(1))
        .build()
        .unwrap();
    let h = harness(config, CountingGenerator::default());
    let start = tokio::time::Instant::now();

    let mut handles = Vec::new();
    for i in 0..50 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.handle(&format!("campaign {i}"), &RequestParams::new()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.generator.calls(), 50);
    let grants: Vec<_> = h.generator.start_times().into_iter().map(|t| (t, 1)).collect();
    assert_window_bound(&grants, 10, Duration::from_secs(1));

    // five windows of ten: the last batch starts four seconds in
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(4) && elapsed < Duration::from_millis(4050),
        "{elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn rate_gate_timeout_is_reported_and_retryable() {
    let config = RagConfig::builder()
        .rate_limit(1)
        .rate_window(Duration::from_secs(60))
        .acquire_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let h = harness(config, CountingGenerator::default());

    h.orchestrator.handle("first", &RequestParams::new()).await.unwrap();
    let err = h.orchestrator.handle("second", &RequestParams::new()).await.unwrap_err();

    assert_eq!(err.stage, Stage::RateGate);
    assert_eq!(err.error, RagError::RateLimitTimeout { waited: Duration::from_millis(100) });
    assert!(err.is_retryable());
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.orchestrator.stats().await.failures.rate_gate, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_request_strands_nothing() {
    let config = RagConfig::builder()
        .rate_limit(1)
        .rate_window(Duration::from_secs(60))
        .build()
        .unwrap();
    let h = harness(config, CountingGenerator::default());
    h.orchestrator.handle("first", &RequestParams::new()).await.unwrap();

    // the caller gives up while the request waits for a permit
    let second_params = RequestParams::new();
    let second = h.orchestrator.handle("second", &second_params);
    let abandoned = tokio::time::timeout(Duration::from_secs(1), second).await;
    assert!(abandoned.is_err());
    assert_eq!(h.orchestrator.cache().len(), 1);
    assert_eq!(h.orchestrator.rate_limiter().stats().grants, 1);

    // the budget recovers on schedule and the same request can be served
    let result = h.orchestrator.handle("second", &RequestParams::new()).await.unwrap();
    assert_eq!(result.sources.len(), 0);
    assert_eq!(h.generator.calls(), 2);
    assert_eq!(h.orchestrator.rate_limiter().stats().grants, 2);
}

#[tokio::test]
async fn token_metered_cost_scales_with_length() {
    let config = RagConfig::builder()
        .rate_limit(10)
        .cost_model(CostModel::PerTokens { tokens_per_permit: 100 })
        .build()
        .unwrap();
    let h = harness(config, CountingGenerator::default());

    let typed = GenerationParams::default().with_length(Length::Long);
    h.orchestrator.handle_params("big launch", typed).await.unwrap();
    assert_eq!(h.orchestrator.rate_limiter().stats().permits_granted, 8);
}

#[test]
fn builder_requires_consistent_collaborators() {
    let missing =
        RagOrchestrator::builder().embedding_provider(Arc::new(KeywordEmbedder::default())).build();
    assert!(matches!(missing, Err(RagError::ConfigError(_))));

    let mismatched = RagOrchestrator::builder()
        .embedding_provider(Arc::new(KeywordEmbedder::default()))
        .generation_provider(Arc::new(CountingGenerator::default()))
        .index(Arc::new(FlatIndex::new(DIM + 1).unwrap()))
        .build();
    assert!(matches!(
        mismatched,
        Err(RagError::ConfigError(ref msg)) if msg.contains("dimensions")
    ));
}

#[test]
fn builder_validates_literal_configs() {
    let build = |config: RagConfig| {
        RagOrchestrator::builder()
            .config(config)
            .embedding_provider(Arc::new(KeywordEmbedder::default()))
            .generation_provider(Arc::new(CountingGenerator::default()))
            .cache(Arc::new(ResultCache::new(10, Duration::from_secs(60)).unwrap()))
            .build()
    };

    // A shared cache would otherwise hide the zero TTL until every put failed.
    let zero_ttl = RagConfig {
        cache: CacheConfig { capacity: 10, ttl: Duration::ZERO },
        ..Default::default()
    };
    assert!(matches!(build(zero_ttl), Err(RagError::ConfigError(ref msg)) if msg.contains("ttl")));
    assert!(matches!(
        build(RagConfig { top_k: 0, ..Default::default() }),
        Err(RagError::ConfigError(_))
    ));
    assert!(matches!(
        build(RagConfig { similarity_threshold: f32::NAN, ..Default::default() }),
        Err(RagError::ConfigError(_))
    ));
    assert!(build(RagConfig::default()).is_ok());
}

#[test]
fn request_params_reject_unknown_names() {
    let raw: RequestParams = HashMap::from([("mood".to_string(), "sunny".to_string())]);
    assert!(GenerationParams::from_raw(&raw).is_err());
}
