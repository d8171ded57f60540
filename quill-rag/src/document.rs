//! Data types for documents and search results.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar metadata value attached to a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    /// A boolean flag.
    Bool(bool),
    /// An integer, e.g. a unix timestamp.
    Integer(i64),
    /// A floating point number.
    Float(f64),
    /// Free text, e.g. a source name or a tag.
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A unit of retrievable context.
///
/// Documents are immutable once indexed. The index stores a copy whose
/// embedding has been L2-normalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// The vector embedding of `text`.
    pub embedding: Vec<f32>,
    /// Scalar metadata (source, timestamp, tags).
    #[serde(default)]
    pub metadata: HashMap<String, MetadataValue>,
}

impl Document {
    /// Create a document without metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self { id: id.into(), text: text.into(), embedding, metadata: HashMap::new() }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A retrieved [`Document`] paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved document.
    pub document: Document,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
}

/// Text to be embedded and indexed by
/// [`RagOrchestrator::ingest`](crate::RagOrchestrator::ingest).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceText {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, MetadataValue>,
}

impl SourceText {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: HashMap::new() }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn into_document(self, embedding: Vec<f32>) -> Document {
        Document { id: self.id, text: self.text, embedding, metadata: self.metadata }
    }
}
