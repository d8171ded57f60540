//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quill_rag::{
    EmbeddingProvider, GenerationParams, GenerationProvider, RagError, Result, SearchResult,
};
use tokio::time::Instant;

pub const DIM: usize = 32;

/// Deterministic bag-of-words embedder: each word bumps one of `DIM` hashed buckets.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl KeywordEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn keyword_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for word in text.split_whitespace() {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)));
        v[(hash % DIM as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::EmbeddingUnavailable {
                provider: "keyword".into(),
                message: "embedding backend offline".into(),
            });
        }
        Ok(keyword_embedding(text))
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Generation provider that counts calls and records when each one started.
#[derive(Default)]
pub struct CountingGenerator {
    pub calls: AtomicUsize,
    /// Number of upcoming calls that fail with a 503.
    pub failures_left: AtomicUsize,
    pub delay: Duration,
    pub started: Mutex<Vec<Instant>>,
}

impl CountingGenerator {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay, ..Default::default() }
    }

    pub fn failing(times: usize) -> Self {
        Self { failures_left: AtomicUsize::new(times), ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn start_times(&self) -> Vec<Instant> {
        let mut times = self.started.lock().unwrap().clone();
        times.sort();
        times
    }
}

#[async_trait]
impl GenerationProvider for CountingGenerator {
    async fn generate(
        &self,
        prompt: &str,
        context: &[SearchResult],
        params: &GenerationParams,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(RagError::GenerationFailed {
                provider: "counting".into(),
                status: Some(503),
                message: "upstream overloaded".into(),
            });
        }
        let sources = context.len();
        Ok(format!("{} {} post about {prompt} ({sources} sources)", params.tone, params.style))
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Assert that no interval `[t, t + window)` starting at a grant holds more than `limit` permits.
pub fn assert_window_bound(grants: &[(Instant, u32)], limit: u32, window: Duration) {
    for &(start, _) in grants {
        let in_window: u32 = grants
            .iter()
            .filter(|(t, _)| *t >= start && *t < start + window)
            .map(|(_, cost)| cost)
            .sum();
        assert!(
            in_window <= limit,
            "{in_window} permits granted within {window:?} of {start:?}, limit is {limit}"
        );
    }
}
