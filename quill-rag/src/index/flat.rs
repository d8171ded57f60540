//! Exhaustive in-memory vector index.
//!
//! [`FlatIndex`] compares the query against every stored document. It is exact
//! and the right choice for the small knowledge bases a content service
//! usually carries.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Document, SearchResult};
use crate::error::Result;
use crate::index::math::{TopK, dot, prepare_query};
use crate::index::table::DocumentTable;
use crate::index::{IndexStats, InsertMode, VectorIndex};

/// An exhaustive-scan index using cosine similarity.
///
/// All operations are async-safe via `tokio::sync::RwLock`.
///
/// # Example
///
/// ```rust,ignore
/// use quill_rag::{FlatIndex, VectorIndex};
///
/// let index = FlatIndex::new(384)?;
/// index.add(document).await?;
/// ```
#[derive(Debug)]
pub struct FlatIndex {
    dimensions: usize,
    table: RwLock<DocumentTable>,
}

impl FlatIndex {
    /// Create an empty index for embeddings of `dimensions` length.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `dimensions` is zero.
    pub fn new(dimensions: usize) -> Result<Self> {
        Ok(Self { dimensions, table: RwLock::new(DocumentTable::new(dimensions)?) })
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn insert(&self, document: Document, mode: InsertMode) -> Result<()> {
        let mut table = self.table.write().await;
        let id = document.id.clone();
        let replaced = table.insert(document, mode)?;
        debug!(
            backend = "flat",
            document.id = %id,
            replaced = replaced.is_some(),
            "indexed document"
        );
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let query = prepare_query(self.dimensions, query, top_k)?;
        let table = self.table.read().await;

        let mut top = TopK::new(top_k.min(table.len()));
        for entry in table.iter() {
            top.push(dot(&entry.document.embedding, &query), entry.seq, &entry.document);
        }

        Ok(top
            .into_sorted()
            .into_iter()
            .map(|c| SearchResult { document: c.item.clone(), score: c.score })
            .collect())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.table.write().await.remove(id).is_some();
        debug!(backend = "flat", document.id = id, removed, "remove");
        Ok(removed)
    }

    async fn size(&self) -> usize {
        self.table.read().await.len()
    }

    async fn stats(&self) -> IndexStats {
        IndexStats {
            documents: self.size().await,
            dimensions: self.dimensions,
            backend: "flat".to_string(),
            lists: None,
        }
    }
}
