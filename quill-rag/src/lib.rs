//! # quill-rag
//!
//! Retrieval-augmented generation serving core for Quill, a marketing-content
//! service.
//!
//! ## Overview
//!
//! Four pieces, each usable on its own:
//!
//! - [`VectorIndex`] - document embeddings with nearest-neighbor search
//!   ([`FlatIndex`] exact, [`ClusteredIndex`] approximate)
//! - [`ResultCache`] - fingerprint-keyed results bounded by capacity (LRU) and age (TTL)
//! - [`RateLimiter`] - shared permit budget for the upstream LLM provider
//! - [`RagOrchestrator`] - binds them: cache check, retrieval, rate gate, generation
//!
//! The embedding model and the LLM are external collaborators behind the
//! [`EmbeddingProvider`] and [`GenerationProvider`] traits.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use quill_rag::{RagConfig, RagOrchestrator, SourceText};
//!
//! let orchestrator = RagOrchestrator::builder()
//!     .config(RagConfig::from_env()?)
//!     .embedding_provider(Arc::new(embedder))
//!     .generation_provider(Arc::new(llm))
//!     .build()?;
//!
//! orchestrator.ingest(SourceText::new("tone-guide", "Irony over insult.")).await?;
//!
//! let params = HashMap::from([("style".to_string(), "witty".to_string())]);
//! let post = orchestrator.handle("launch of our oat latte", &params).await?;
//! println!("{}", post.text);
//! ```
//!
//! ## Features
//!
//! - `openai` - OpenAI-compatible embedding and chat-completion providers

pub mod cache;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod generation;
pub mod index;
mod inflight;
#[cfg(feature = "openai")]
pub mod openai;
pub mod orchestrator;
pub mod params;
pub mod rate_limit;
pub mod telemetry;

pub use cache::{CacheStats, ResultCache};
pub use config::{
    CacheConfig, CostModel, MAX_DURATION, RagConfig, RagConfigBuilder, RateLimitConfig,
};
pub use document::{Document, MetadataValue, SearchResult, SourceText};
pub use embedding::EmbeddingProvider;
pub use error::{HandleError, RagError, Result, Stage};
pub use fingerprint::fingerprint;
pub use generation::{GenerationProvider, render_context};
pub use index::{
    ClusteredIndex, ClusteredIndexConfig, FlatIndex, IndexStats, InsertMode, VectorIndex,
};
#[cfg(feature = "openai")]
pub use openai::{OpenAIEmbeddingProvider, OpenAIGenerationProvider};
pub use orchestrator::{
    GeneratedResult, OrchestratorStats, RagOrchestrator, RagOrchestratorBuilder, SourceRef,
    StageFailures,
};
pub use params::{GenerationParams, Language, Length, Platform, RequestParams, Style, Tone};
pub use rate_limit::{MIN_ADAPTIVE_LIMIT, RateLimitStrategy, RateLimiter, RateLimiterStats};
pub use telemetry::init_telemetry;
