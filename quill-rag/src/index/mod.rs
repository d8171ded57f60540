//! Vector indexes for semantic retrieval.
//!
//! The [`VectorIndex`] trait is the narrow seam the orchestrator depends on;
//! backends are swappable without touching it:
//!
//! - [`FlatIndex`]: exhaustive cosine scan, exact results
//! - [`ClusteredIndex`]: inverted-file layout over k-means centroids, approximate
//!
//! Embeddings are L2-normalized on insertion, so similarity is a dot product.
//! Ties in score break by insertion order (earlier first).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{Document, SearchResult};
use crate::error::Result;

mod clustered;
mod flat;
pub mod math;
mod table;

pub use clustered::{ClusteredIndex, ClusteredIndexConfig};
pub use flat::FlatIndex;

/// How [`VectorIndex::insert`] treats an ID that is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// Fail with [`RagError::DuplicateId`](crate::RagError::DuplicateId).
    #[default]
    Insert,
    /// Replace the prior document atomically.
    Upsert,
}

/// A point-in-time summary of an index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of indexed documents.
    pub documents: usize,
    /// Fixed embedding dimensionality.
    pub dimensions: usize,
    /// Backend name (`flat`, `clustered`).
    pub backend: String,
    /// Number of trained inverted lists, for clustered backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lists: Option<usize>,
}

/// A collection of documents answering nearest-neighbor queries.
///
/// Reads may run concurrently; mutations are exclusive, so a search never
/// observes a half-applied `insert` or `remove`.
///
/// # Example
///
/// ```rust,ignore
/// use quill_rag::{Document, FlatIndex, VectorIndex};
///
/// let index = FlatIndex::new(384)?;
/// index.add(Document::new("faq-1", "text", embedding)).await?;
/// let results = index.search(&query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The fixed dimensionality every document and query must have.
    fn dimensions(&self) -> usize;

    /// Insert a document.
    ///
    /// Fails with `DimensionMismatch` if the embedding length is wrong, with
    /// `InvalidArgument` for a zero or non-finite embedding, and with
    /// `DuplicateId` if the ID exists and `mode` is [`InsertMode::Insert`].
    async fn insert(&self, document: Document, mode: InsertMode) -> Result<()>;

    /// Return up to `top_k` results ordered by descending similarity.
    ///
    /// `top_k` must be at least 1. An empty index yields an empty `Vec`.
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;

    /// Remove a document. Returns whether it was present; absence is not an error.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Current document count.
    async fn size(&self) -> usize;

    /// Index statistics.
    async fn stats(&self) -> IndexStats;

    /// Insert a document, failing on duplicate IDs.
    async fn add(&self, document: Document) -> Result<()> {
        self.insert(document, InsertMode::Insert).await
    }

    /// Insert a document, replacing any prior document with the same ID.
    async fn upsert(&self, document: Document) -> Result<()> {
        self.insert(document, InsertMode::Upsert).await
    }
}
