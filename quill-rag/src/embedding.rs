//! The embedding collaborator: text in, fixed-length vector out.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that turns text into fixed-length vectors.
///
/// The orchestrator calls it when a source text is ingested and again for
/// every query that misses the cache. Identical input must produce identical
/// output, or retrieval stops being repeatable.
/// Failures surface as
/// [`RagError::EmbeddingUnavailable`](crate::RagError::EmbeddingUnavailable).
///
/// # Example
///
/// ```rust,ignore
/// use quill_rag::EmbeddingProvider;
///
/// let vectors = provider.embed_batch(&["spring sale", "brand voice"]).await?;
/// assert!(vectors.iter().all(|v| v.len() == provider.dimensions()));
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, returning vectors in input order.
    ///
    /// Falls back to one [`embed`](EmbeddingProvider::embed) call per text;
    /// remote backends with a batch endpoint should override this.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for &text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Provider name used in logs and error messages.
    fn name(&self) -> &str {
        "embedding"
    }
}
