//! OpenAI-compatible embedding and chat-completion providers.
//!
//! This module is only available when the `openai` feature is enabled. Both
//! providers talk to `{base_url}/embeddings` and `{base_url}/chat/completions`,
//! so any server exposing the OpenAI wire format works.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{GenerationProvider, render_context};
use crate::params::GenerationParams;

const PROVIDER: &str = "OpenAI";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Connection settings shared by both providers.
#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl Endpoint {
    fn new(api_key: String) -> Option<Self> {
        if api_key.trim().is_empty() {
            return None;
        }
        Some(Self { client: reqwest::Client::new(), api_key, base_url: DEFAULT_BASE_URL.into() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    /// POST `body` and decode a 2xx JSON response.
    ///
    /// Failures carry the HTTP status when there is one.
    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> std::result::Result<R, (Option<u16>, String)> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| (e.status().map(|s| s.as_u16()), format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err((Some(status.as_u16()), format!("API returned {status}: {detail}")));
        }

        response
            .json()
            .await
            .map_err(|e| (Some(status.as_u16()), format!("failed to parse response: {e}")))
    }
}

fn missing_key() -> String {
    "API key must not be empty".to_string()
}

fn env_key() -> std::result::Result<String, String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| "OPENAI_API_KEY environment variable not set".to_string())
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── Embeddings ────────────────────

/// An [`EmbeddingProvider`] backed by the `/embeddings` endpoint.
///
/// # Example
///
/// ```rust,ignore
/// use quill_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("sk-...")?.with_dimensions(512);
/// ```
pub struct OpenAIEmbeddingProvider {
    endpoint: Endpoint,
    model: String,
    dimensions: usize,
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let endpoint = Endpoint::new(api_key.into()).ok_or_else(|| embedding_error(missing_key()))?;
        Ok(Self {
            endpoint,
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            request_dimensions: None,
        })
    }

    /// Create a provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(env_key().map_err(embedding_error)?)
    }

    /// Point at an OpenAI-compatible server, e.g. `http://localhost:8080/v1`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request truncated embeddings of `dims` length. Also changes
    /// [`dimensions()`](EmbeddingProvider::dimensions).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }
}

fn embedding_error(message: String) -> RagError {
    RagError::EmbeddingUnavailable { provider: PROVIDER.into(), message }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| embedding_error("API returned no embeddings".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };
        let mut response: EmbeddingResponse =
            self.endpoint.post("embeddings", &request).await.map_err(|(status, message)| {
                error!(provider = PROVIDER, ?status, %message, "embedding request failed");
                embedding_error(message)
            })?;

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

// ── Chat completions ────────────────────

/// A [`GenerationProvider`] backed by the `/chat/completions` endpoint.
///
/// The system message carries the generation parameters and the retrieved
/// context; the user message is the request query.
pub struct OpenAIGenerationProvider {
    endpoint: Endpoint,
    model: String,
    temperature: f32,
}

impl OpenAIGenerationProvider {
    /// Create a provider with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let endpoint =
            Endpoint::new(api_key.into()).ok_or_else(|| generation_error(None, missing_key()))?;
        Ok(Self { endpoint, model: DEFAULT_CHAT_MODEL.into(), temperature: 0.8 })
    }

    /// Create a provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(env_key().map_err(|m| generation_error(None, m))?)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

fn generation_error(status: Option<u16>, message: String) -> RagError {
    RagError::GenerationFailed { provider: PROVIDER.into(), status, message }
}

fn system_prompt(context: &[SearchResult], params: &GenerationParams) -> String {
    let mut prompt = format!(
        "Write a {length} {platform} post in a {style} style with a {tone} tone. \
         Answer in language '{language}'.",
        length = params.length,
        platform = params.platform,
        style = params.style,
        tone = params.tone,
        language = params.language,
    );
    if !context.is_empty() {
        prompt.push_str("\n\nUse this reference material where relevant:\n\n");
        prompt.push_str(&render_context(context));
    }
    prompt
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl GenerationProvider for OpenAIGenerationProvider {
    async fn generate(
        &self,
        prompt: &str,
        context: &[SearchResult],
        params: &GenerationParams,
    ) -> Result<String> {
        let system = system_prompt(context, params);
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: &system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: self.temperature,
            // leave headroom over the length estimate
            max_tokens: params.length.estimated_tokens() * 2,
        };
        debug!(
            provider = PROVIDER,
            model = %self.model,
            context = context.len(),
            "chat completion"
        );

        let response: ChatResponse =
            self.endpoint.post("chat/completions", &request).await.map_err(|(status, message)| {
                error!(provider = PROVIDER, ?status, %message, "chat completion failed");
                generation_error(status, message)
            })?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| generation_error(None, "API returned no content".into()))
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
