//! Generation provider trait: the metered, rate-limited external dependency.

use std::fmt::Write;

use async_trait::async_trait;

use crate::document::SearchResult;
use crate::error::Result;
use crate::params::GenerationParams;

/// A provider that writes content for a prompt, grounded in retrieved context.
///
/// Implementations wrap an LLM backend. Failures surface as
/// [`RagError::GenerationFailed`](crate::RagError::GenerationFailed) with the
/// provider's status detail attached.
///
/// # Example
///
/// ```rust,ignore
/// use quill_rag::GenerationProvider;
///
/// let text = provider.generate("new lipstick launch", &context, &params).await?;
/// ```
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate text for `prompt` using `context` as supporting material.
    async fn generate(
        &self,
        prompt: &str,
        context: &[SearchResult],
        params: &GenerationParams,
    ) -> Result<String>;

    /// Provider name used in logs and error messages.
    fn name(&self) -> &str {
        "generation"
    }
}

/// Render retrieved documents as a numbered context block for a prompt.
///
/// Returns an empty string when there is no context.
pub fn render_context(context: &[SearchResult]) -> String {
    let mut out = String::new();
    for (i, result) in context.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let _ = write!(out, "[{}] ({}) {}", i + 1, result.document.id, result.document.text.trim());
    }
    out
}
