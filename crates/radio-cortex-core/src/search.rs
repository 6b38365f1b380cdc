//! Similarity scoring and result ranking shared by every vector index.
//!
//! Backends compute raw cosine scores however they like (a SQL scan, a
//! hash map walk) and hand the candidates to [`rank_hits`], so ordering
//! and tie-breaking are identical across stores:
//!
//! 1. Score descending.
//! 2. `updated_at` descending (fresher items first).
//! 3. Item id ascending.

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::StoreError;

/// One scored candidate from a vector query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityHit {
    pub item_id: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub updated_at: i64,
}

/// Cosine similarity. Zero-length or zero-magnitude input scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Reject vectors whose length differs from the index dimension.
pub fn check_dims(expected: usize, vector: &[f32]) -> Result<(), StoreError> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(StoreError::Schema {
            expected,
            actual: vector.len(),
        })
    }
}

fn compare_hits(a: &SimilarityHit, b: &SimilarityHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// Sort candidates into result order and keep the top `k`.
pub fn rank_hits(mut hits: Vec<SimilarityHit>, k: usize) -> Vec<SimilarityHit> {
    hits.sort_by(compare_hits);
    hits.truncate(k);
    hits
}

/// Encode a vector as a little-endian f32 blob.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian f32 blob. Trailing bytes are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
