//! RAG request orchestrator.
//!
//! The [`RagOrchestrator`] serves content-generation requests:
//!
//! ```text
//! validate → fingerprint → cache ─hit──────────────────────────────→ done
//!                               └miss→ retrieve → rate gate → generate → cache → done
//! ```
//!
//! Cache hits never touch the index, the rate limiter or the provider.
//! Concurrent identical misses are coalesced: one request computes, the
//! others wait and reuse the cached result. Errors are never cached.
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_rag::{RagOrchestrator, RagConfig};
//!
//! let orchestrator = RagOrchestrator::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .generation_provider(Arc::new(my_llm))
//!     .build()?;
//!
//! let voice = SourceText::new("brand-voice", "We never take ourselves seriously.");
//! orchestrator.ingest(voice).await?;
//! let post = orchestrator.handle("new coffee blend launch", &params).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cache::{CacheStats, ResultCache};
use crate::config::RagConfig;
use crate::document::{Document, SearchResult, SourceText};
use crate::embedding::EmbeddingProvider;
use crate::error::{HandleError, RagError, Result, Stage};
use crate::fingerprint::{fingerprint, normalize_query};
use crate::generation::GenerationProvider;
use crate::index::{FlatIndex, IndexStats, VectorIndex};
use crate::inflight::InFlight;
use crate::params::{GenerationParams, RequestParams};
use crate::rate_limit::{RateLimiter, RateLimiterStats};

/// A document that supported a generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub id: String,
    pub score: f32,
}

/// The outcome of a successful [`RagOrchestrator::handle`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedResult {
    /// Generated content.
    pub text: String,
    /// Retrieved documents passed to the provider, most relevant first.
    pub sources: Vec<SourceRef>,
    /// Cache key of the request.
    pub fingerprint: String,
    /// The validated parameters the text was generated with.
    pub params: GenerationParams,
    /// Name of the provider that produced `text`.
    pub provider: String,
    pub generated_at: DateTime<Utc>,
}

/// Failures per request stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFailures {
    pub validating: u64,
    pub retrieving: u64,
    pub rate_gate: u64,
    pub generating: u64,
}

/// Snapshot of orchestrator activity and of the components it drives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorStats {
    /// Calls to `handle`.
    pub requests: u64,
    /// Requests answered straight from the cache.
    pub cache_hits: u64,
    /// Requests answered by waiting on an identical in-flight request.
    pub coalesced: u64,
    /// Successful provider calls.
    pub generations: u64,
    pub failures: StageFailures,
    pub cache: CacheStats,
    pub rate_limiter: RateLimiterStats,
    pub index: IndexStats,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    generations: AtomicU64,
    failures: [AtomicU64; 4],
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn failure(&self, stage: Stage) {
        let slot = match stage {
            Stage::Validating => 0,
            Stage::Retrieving => 1,
            Stage::RateGate => 2,
            Stage::Generating => 3,
        };
        Self::bump(&self.failures[slot]);
    }

    fn failures(&self) -> StageFailures {
        let [validating, retrieving, rate_gate, generating] =
            self.failures.each_ref().map(|c| c.load(Ordering::Relaxed));
        StageFailures { validating, retrieving, rate_gate, generating }
    }
}

/// The RAG serving core.
///
/// Construct one via [`RagOrchestrator::builder()`]. The orchestrator is
/// `Send + Sync`; share it behind an `Arc` across request handlers.
pub struct RagOrchestrator {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    generation_provider: Arc<dyn GenerationProvider>,
    index: Arc<dyn VectorIndex>,
    cache: Arc<ResultCache<GeneratedResult>>,
    rate_limiter: Arc<RateLimiter>,
    inflight: InFlight,
    counters: Counters,
}

impl RagOrchestrator {
    /// Create a new [`RagOrchestratorBuilder`].
    pub fn builder() -> RagOrchestratorBuilder {
        RagOrchestratorBuilder::default()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn cache(&self) -> &Arc<ResultCache<GeneratedResult>> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Serve one content-generation request.
    ///
    /// `params` is the raw parameter map from the caller; it is validated
    /// before anything else happens.
    ///
    /// # Errors
    ///
    /// Returns a [`HandleError`] carrying the failing [`Stage`] and the
    /// unmodified underlying error.
    pub async fn handle(
        &self,
        query: &str,
        params: &RequestParams,
    ) -> std::result::Result<GeneratedResult, HandleError> {
        Counters::bump(&self.counters.requests);
        let params =
            GenerationParams::from_raw(params).map_err(|e| self.fail(Stage::Validating, e))?;
        self.serve(query, params).await
    }

    /// Like [`handle`](Self::handle), with parameters that are already typed.
    pub async fn handle_params(
        &self,
        query: &str,
        params: GenerationParams,
    ) -> std::result::Result<GeneratedResult, HandleError> {
        Counters::bump(&self.counters.requests);
        self.serve(query, params).await
    }

    async fn serve(
        &self,
        query: &str,
        params: GenerationParams,
    ) -> std::result::Result<GeneratedResult, HandleError> {
        let query = normalize_query(query);
        if query.is_empty() {
            return Err(self.fail(Stage::Validating, RagError::invalid("query must not be empty")));
        }
        let key = fingerprint(&query, &params);
        let span = info_span!(
            "rag.handle",
            fingerprint = %&key[..12],
            style = %params.style,
            length = %params.length,
        );

        async move {
            if let Some(hit) = self.cache.get(&key) {
                Counters::bump(&self.counters.cache_hits);
                debug!("served from cache");
                return Ok(hit);
            }

            let flight = self.inflight.enter(&key).await;
            if let Some(hit) = self.cache.get(&key) {
                Counters::bump(&self.counters.coalesced);
                debug!(waited = flight.waited(), "served from coalesced request");
                return Ok(hit);
            }

            let result = self.generate(&query, params, key.clone()).await?;
            if let Err(e) = self.cache.put(key.as_str(), result.clone(), self.config.cache.ttl) {
                warn!(error = %e, "failed to cache generated result");
            }
            drop(flight);
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn generate(
        &self,
        query: &str,
        params: GenerationParams,
        key: String,
    ) -> std::result::Result<GeneratedResult, HandleError> {
        let started = Instant::now();

        let context = self.retrieve(query).await.map_err(|e| self.fail(Stage::Retrieving, e))?;

        let permits = self.config.cost_model.permits(&params, self.rate_limiter.limit());
        let acquired = match self.config.rate_limit.acquire_timeout {
            Some(timeout) => self.rate_limiter.acquire_with_timeout(permits, timeout).await,
            None => self.rate_limiter.acquire(permits).await,
        };
        acquired.map_err(|e| self.fail(Stage::RateGate, e))?;

        let text = self
            .generation_provider
            .generate(query, &context, &params)
            .await
            .map_err(|e| self.fail(Stage::Generating, e))?;
        Counters::bump(&self.counters.generations);

        info!(
            provider = self.generation_provider.name(),
            sources = context.len(),
            permits,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated content"
        );

        Ok(GeneratedResult {
            text,
            sources: context
                .into_iter()
                .map(|r| SourceRef { id: r.document.id, score: r.score })
                .collect(),
            fingerprint: key,
            params,
            provider: self.generation_provider.name().to_string(),
            generated_at: Utc::now(),
        })
    }

    /// Embed `query` and return the supporting documents above the configured
    /// similarity threshold, most relevant first. No generation happens.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty query, or the embedding
    /// provider's or index's error.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::invalid("query must not be empty"));
        }
        let embedding = self.embedding_provider.embed(query).await?;
        let results = self.index.search(&embedding, self.config.top_k).await?;

        let threshold = self.config.similarity_threshold;
        let filtered: Vec<SearchResult> =
            results.into_iter().filter(|r| r.score >= threshold).collect();
        debug!(result_count = filtered.len(), "retrieved context");
        Ok(filtered)
    }

    /// Embed and index one document.
    ///
    /// # Errors
    ///
    /// Returns the embedding provider's error, or `DuplicateId` /
    /// `DimensionMismatch` / `InvalidArgument` from the index.
    pub async fn ingest(&self, source: SourceText) -> Result<()> {
        let embedding = self.embedding_provider.embed(&source.text).await?;
        let id = source.id.clone();
        self.index.add(source.into_document(embedding)).await?;
        info!(document.id = %id, "ingested document");
        Ok(())
    }

    /// Embed a batch in one provider call and index every document.
    ///
    /// Stops at the first indexing failure; documents before it stay indexed.
    /// Returns the number of documents indexed.
    pub async fn ingest_batch(&self, sources: Vec<SourceText>) -> Result<usize> {
        if sources.is_empty() {
            return Ok(0);
        }
        let texts: Vec<&str> = sources.iter().map(|s| s.text.as_str()).collect();
        let embeddings = self.embedding_provider.embed_batch(&texts).await?;
        if embeddings.len() != sources.len() {
            return Err(RagError::EmbeddingUnavailable {
                provider: self.embedding_provider.name().to_string(),
                message: format!(
                    "expected {} embeddings, got {}",
                    sources.len(),
                    embeddings.len()
                ),
            });
        }

        let count = sources.len();
        for (source, embedding) in sources.into_iter().zip(embeddings) {
            self.index.add(source.into_document(embedding)).await?;
        }
        info!(document_count = count, "ingested batch");
        Ok(count)
    }

    /// Remove a document from the index. Returns whether it was present.
    pub async fn remove_document(&self, id: &str) -> Result<bool> {
        self.index.remove(id).await
    }

    /// Insert an already-embedded document.
    pub async fn add_document(&self, document: Document) -> Result<()> {
        self.index.add(document).await
    }

    /// Snapshot of request counters and component statistics.
    pub async fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            generations: self.counters.generations.load(Ordering::Relaxed),
            failures: self.counters.failures(),
            cache: self.cache.stats(),
            rate_limiter: self.rate_limiter.stats(),
            index: self.index.stats().await,
        }
    }

    fn fail(&self, stage: Stage, error: RagError) -> HandleError {
        self.counters.failure(stage);
        warn!(stage = %stage, error = %error, retryable = error.is_retryable(), "request failed");
        HandleError::new(stage, error)
    }
}

/// Builder for constructing a [`RagOrchestrator`].
///
/// The embedding and generation providers are required. The index, cache
/// and rate limiter default to fresh instances sized from the config; pass
/// shared ones to let several orchestrators draw on one budget.
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = RagOrchestrator::builder()
///     .config(config)
///     .embedding_provider(Arc::new(embedder))
///     .generation_provider(Arc::new(llm))
///     .rate_limiter(shared_limiter)  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagOrchestratorBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generation_provider: Option<Arc<dyn GenerationProvider>>,
    index: Option<Arc<dyn VectorIndex>>,
    cache: Option<Arc<ResultCache<GeneratedResult>>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl RagOrchestratorBuilder {
    /// Set the orchestrator configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generation provider.
    pub fn generation_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.generation_provider = Some(provider);
        self
    }

    /// Use `index` instead of a new [`FlatIndex`].
    pub fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Use a shared result cache.
    pub fn cache(mut self, cache: Arc<ResultCache<GeneratedResult>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use a shared rate limiter.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Build the [`RagOrchestrator`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the configuration fails
    /// [`RagConfig::validate`], if a provider is missing, or if the index
    /// dimensionality differs from the embedding provider's.
    pub fn build(self) -> Result<RagOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self.embedding_provider.ok_or_else(|| {
            RagError::ConfigError("embedding_provider is required".to_string())
        })?;
        let generation_provider = self.generation_provider.ok_or_else(|| {
            RagError::ConfigError("generation_provider is required".to_string())
        })?;

        let dimensions = embedding_provider.dimensions();
        let index: Arc<dyn VectorIndex> = match self.index {
            Some(index) => index,
            None => Arc::new(FlatIndex::new(dimensions).map_err(as_config_error)?),
        };
        if index.dimensions() != dimensions {
            return Err(RagError::ConfigError(format!(
                "index dimensions ({}) do not match embedding provider ({dimensions})",
                index.dimensions()
            )));
        }

        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(ResultCache::from_config(&config.cache).map_err(as_config_error)?),
        };
        let rate_limiter = match self.rate_limiter {
            Some(limiter) => limiter,
            None => {
                Arc::new(RateLimiter::from_config(&config.rate_limit).map_err(as_config_error)?)
            }
        };

        Ok(RagOrchestrator {
            config,
            embedding_provider,
            generation_provider,
            index,
            cache,
            rate_limiter,
            inflight: InFlight::new(),
            counters: Counters::default(),
        })
    }
}

fn as_config_error(error: RagError) -> RagError {
    match error {
        RagError::InvalidArgument(message) => RagError::ConfigError(message),
        other => other,
    }
}
