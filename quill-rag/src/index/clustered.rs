//! Approximate vector index over an inverted-file layout.
//!
//! Documents are partitioned into `n_lists` clusters by spherical k-means. A
//! search scores the query against the centroids and scans only the closest
//! `n_probe` lists, widening the probe until it has at least
//! `min(top_k, size)` candidates. The returned count therefore always matches
//! an exhaustive search; only *which* documents are returned may differ.
//!
//! Recall: exact below `train_threshold` (the index scans exhaustively until
//! it trains), and exact when `n_probe == n_lists`. On clustered data,
//! `n_probe >= n_lists / 4` typically keeps recall@k above 0.9.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::document::{Document, SearchResult};
use crate::error::{RagError, Result};
use crate::index::math::{TopK, dot, normalize, prepare_query};
use crate::index::table::DocumentTable;
use crate::index::{IndexStats, InsertMode, VectorIndex};

/// Tuning parameters for [`ClusteredIndex`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusteredIndexConfig {
    /// Number of clusters (inverted lists).
    pub n_lists: usize,
    /// Lists scanned per query before widening.
    pub n_probe: usize,
    /// Document count at which the centroids are first trained.
    pub train_threshold: usize,
    /// k-means iterations per training run.
    pub iterations: usize,
}

impl Default for ClusteredIndexConfig {
    fn default() -> Self {
        Self { n_lists: 16, n_probe: 4, train_threshold: 256, iterations: 10 }
    }
}

impl ClusteredIndexConfig {
    fn validate(&self) -> Result<()> {
        if self.n_lists == 0 {
            return Err(RagError::invalid("n_lists must be at least 1"));
        }
        if self.n_probe == 0 || self.n_probe > self.n_lists {
            return Err(RagError::invalid(format!(
                "n_probe ({}) must be between 1 and n_lists ({})",
                self.n_probe, self.n_lists
            )));
        }
        if self.train_threshold < self.n_lists {
            return Err(RagError::invalid(format!(
                "train_threshold ({}) must be at least n_lists ({})",
                self.train_threshold, self.n_lists
            )));
        }
        if self.iterations == 0 {
            return Err(RagError::invalid("iterations must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Lists {
    centroids: Vec<Vec<f32>>,
    members: Vec<HashSet<String>>,
    assignment: HashMap<String, usize>,
}

impl Lists {
    fn nearest(&self, embedding: &[f32]) -> usize {
        nearest_centroid(&self.centroids, embedding)
    }

    fn assign(&mut self, id: &str, embedding: &[f32]) {
        let list = self.nearest(embedding);
        self.members[list].insert(id.to_string());
        self.assignment.insert(id.to_string(), list);
    }

    fn unassign(&mut self, id: &str) {
        if let Some(list) = self.assignment.remove(id) {
            self.members[list].remove(id);
        }
    }
}

#[derive(Debug)]
struct State {
    table: DocumentTable,
    lists: Option<Lists>,
}

/// An approximate nearest-neighbor index (IVF over spherical k-means).
///
/// # Example
///
/// ```rust,ignore
/// use quill_rag::{ClusteredIndex, ClusteredIndexConfig, VectorIndex};
///
/// let index = ClusteredIndex::new(384, ClusteredIndexConfig::default())?;
/// index.add(document).await?;
/// let results = index.search(&query, 5).await?;
/// ```
#[derive(Debug)]
pub struct ClusteredIndex {
    dimensions: usize,
    config: ClusteredIndexConfig,
    state: RwLock<State>,
}

impl ClusteredIndex {
    /// Create an empty index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for zero dimensions or an inconsistent config.
    pub fn new(dimensions: usize, config: ClusteredIndexConfig) -> Result<Self> {
        config.validate()?;
        let table = DocumentTable::new(dimensions)?;
        Ok(Self { dimensions, config, state: RwLock::new(State { table, lists: None }) })
    }

    /// Whether the centroids have been trained.
    pub async fn is_trained(&self) -> bool {
        self.state.read().await.lists.is_some()
    }

    /// Retrain the centroids on the current contents.
    ///
    /// Does nothing while the index holds fewer than `n_lists` documents.
    pub async fn retrain(&self) {
        let mut state = self.state.write().await;
        if state.table.len() >= self.config.n_lists {
            let lists = train(&state.table, &self.config);
            state.lists = Some(lists);
        }
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], embedding: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let score = dot(centroid, embedding);
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

/// Spherical k-means, seeded with the earliest-inserted documents.
fn train(table: &DocumentTable, config: &ClusteredIndexConfig) -> Lists {
    let mut entries: Vec<_> = table.iter().collect();
    entries.sort_by_key(|e| e.seq);

    let k = config.n_lists.min(entries.len());
    let mut centroids: Vec<Vec<f32>> =
        entries.iter().take(k).map(|e| e.document.embedding.clone()).collect();

    for _ in 0..config.iterations {
        let mut sums = vec![vec![0.0f32; table.dimensions()]; k];
        for entry in &entries {
            let list = nearest_centroid(&centroids, &entry.document.embedding);
            for (acc, x) in sums[list].iter_mut().zip(&entry.document.embedding) {
                *acc += x;
            }
        }
        for (centroid, sum) in centroids.iter_mut().zip(sums) {
            // An empty cluster keeps its previous centroid.
            if let Some(unit) = normalize(&sum) {
                *centroid = unit;
            }
        }
    }

    let mut lists = Lists {
        centroids,
        members: vec![HashSet::new(); k],
        assignment: HashMap::with_capacity(entries.len()),
    };
    for entry in &entries {
        lists.assign(&entry.document.id, &entry.document.embedding);
    }
    lists
}

#[async_trait]
impl VectorIndex for ClusteredIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn insert(&self, document: Document, mode: InsertMode) -> Result<()> {
        let mut state = self.state.write().await;
        let State { table, lists } = &mut *state;

        let id = document.id.clone();
        let replaced = table.insert(document, mode)?;

        if let Some(lists) = lists.as_mut() {
            if replaced.is_some() {
                lists.unassign(&id);
            }
            if let Some(entry) = table.get(&id) {
                lists.assign(&id, &entry.document.embedding);
            }
        } else if table.len() >= self.config.train_threshold {
            *lists = Some(train(table, &self.config));
            info!(
                backend = "clustered",
                documents = table.len(),
                n_lists = self.config.n_lists,
                "trained centroids"
            );
        }

        debug!(
            backend = "clustered",
            document.id = %id,
            replaced = replaced.is_some(),
            "indexed document"
        );
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let query = prepare_query(self.dimensions, query, top_k)?;
        let state = self.state.read().await;
        let wanted = top_k.min(state.table.len());
        let mut top = TopK::new(wanted);

        match &state.lists {
            None => {
                for entry in state.table.iter() {
                    top.push(dot(&entry.document.embedding, &query), entry.seq, &entry.document);
                }
            }
            Some(lists) => {
                let mut order: Vec<(usize, f32)> =
                    lists.centroids.iter().enumerate().map(|(i, c)| (i, dot(c, &query))).collect();
                order.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

                let mut scanned = 0;
                for (probed, (list, _)) in order.into_iter().enumerate() {
                    if probed >= self.config.n_probe && scanned >= wanted {
                        break;
                    }
                    for id in &lists.members[list] {
                        if let Some(entry) = state.table.get(id) {
                            let score = dot(&entry.document.embedding, &query);
                            top.push(score, entry.seq, &entry.document);
                            scanned += 1;
                        }
                    }
                }
                debug!(backend = "clustered", scanned, candidates = top.len(), "probed lists");
            }
        }

        Ok(top
            .into_sorted()
            .into_iter()
            .map(|c| SearchResult { document: c.item.clone(), score: c.score })
            .collect())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.table.remove(id).is_some();
        if let Some(lists) = state.lists.as_mut() {
            lists.unassign(id);
        }
        debug!(backend = "clustered", document.id = id, removed, "remove");
        Ok(removed)
    }

    async fn size(&self) -> usize {
        self.state.read().await.table.len()
    }

    async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        IndexStats {
            documents: state.table.len(),
            dimensions: self.dimensions,
            backend: "clustered".to_string(),
            lists: state.lists.as_ref().map(|l| l.centroids.len()),
        }
    }
}
