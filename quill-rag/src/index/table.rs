//! Document storage shared by the index backends.

use std::collections::HashMap;

use crate::document::Document;
use crate::error::{RagError, Result};
use crate::index::InsertMode;
use crate::index::math::prepare_document_embedding;

/// A stored document with its normalized embedding and insertion sequence.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub seq: u64,
    pub document: Document,
}

/// Owns the indexed documents, keyed by ID.
#[derive(Debug)]
pub(crate) struct DocumentTable {
    dimensions: usize,
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl DocumentTable {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::invalid("index dimensionality must be at least 1"));
        }
        Ok(Self { dimensions, entries: HashMap::new(), next_seq: 0 })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Validate and store a document. Returns the replaced entry in upsert mode.
    ///
    /// All validation happens before the table is touched, so a rejected
    /// document leaves the table unchanged.
    pub fn insert(&mut self, mut document: Document, mode: InsertMode) -> Result<Option<Entry>> {
        let embedding = prepare_document_embedding(self.dimensions, &document.embedding)?;
        if mode == InsertMode::Insert && self.entries.contains_key(&document.id) {
            return Err(RagError::DuplicateId(document.id));
        }
        document.embedding = embedding;

        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(self.entries.insert(document.id.clone(), Entry { seq, document }))
    }

    pub fn remove(&mut self, id: &str) -> Option<Entry> {
        self.entries.remove(id)
    }
}
