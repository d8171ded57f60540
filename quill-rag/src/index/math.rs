//! Vector helpers shared by the index backends.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{RagError, Result};

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 magnitude of a vector.
pub fn magnitude(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Return a unit-length copy of `v`, or `None` for a zero or non-finite vector.
pub fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    if v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = magnitude(v);
    if norm < f32::EPSILON {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// Validate a document embedding and normalize it for storage.
pub(crate) fn prepare_document_embedding(expected: usize, embedding: &[f32]) -> Result<Vec<f32>> {
    if embedding.len() != expected {
        return Err(RagError::DimensionMismatch { expected, actual: embedding.len() });
    }
    normalize(embedding).ok_or_else(|| {
        RagError::invalid("document embedding must be finite and have non-zero magnitude")
    })
}

/// Validate a query embedding and normalize it.
///
/// A zero query is allowed and stays zero, scoring 0.0 against every document.
pub(crate) fn prepare_query(expected: usize, query: &[f32], top_k: usize) -> Result<Vec<f32>> {
    if top_k < 1 {
        return Err(RagError::invalid("top_k must be at least 1"));
    }
    if query.len() != expected {
        return Err(RagError::DimensionMismatch { expected, actual: query.len() });
    }
    if query.iter().any(|x| !x.is_finite()) {
        return Err(RagError::invalid("query embedding must be finite"));
    }
    Ok(normalize(query).unwrap_or_else(|| vec![0.0; expected]))
}

/// A scored candidate. Ordered so that the *worst* candidate compares greatest:
/// lower score first, then later insertion.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate<T> {
    pub score: f32,
    pub seq: u64,
    pub item: T,
}

impl<T> PartialEq for Candidate<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Candidate<T> {}

impl<T> PartialOrd for Candidate<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Candidate<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.score.total_cmp(&self.score).then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Bounded collector keeping the `k` best candidates in O(n log k).
pub(crate) struct TopK<T> {
    k: usize,
    heap: BinaryHeap<Candidate<T>>,
}

impl<T> TopK<T> {
    pub fn new(k: usize) -> Self {
        Self { k, heap: BinaryHeap::with_capacity(k.saturating_add(1).min(1024)) }
    }

    pub fn push(&mut self, score: f32, seq: u64, item: T) {
        if self.k == 0 {
            return;
        }
        let candidate = Candidate { score, seq, item };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if self.heap.peek().is_some_and(|worst| candidate < *worst) {
            self.heap.pop();
            self.heap.push(candidate);
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Best first: descending score, ties by earlier insertion.
    pub fn into_sorted(self) -> Vec<Candidate<T>> {
        self.heap.into_sorted_vec()
    }
}
