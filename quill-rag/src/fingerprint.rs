//! Deterministic request fingerprints.
//!
//! Two requests that differ only in incidental formatting (surrounding or
//! repeated whitespace in the query, letter case or spacing in parameters)
//! map to the same fingerprint and therefore the same cache entry.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::params::GenerationParams;

/// Trim the query and collapse internal whitespace runs to one space.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 (lowercase hex) over the canonical JSON form of the request.
///
/// The canonical form is an object with sorted keys holding the normalized
/// query and every parameter's canonical name.
pub fn fingerprint(query: &str, params: &GenerationParams) -> String {
    let mut canonical: BTreeMap<&str, &str> = params.canonical_pairs().into_iter().collect();
    let query = normalize_query(query);
    canonical.insert("query", &query);

    // A map of strings always serializes.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}
