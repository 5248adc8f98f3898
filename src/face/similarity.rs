//! Embedding similarity used for target matching and result gating.

use crate::error::{Result, SwapError};
use crate::face::face_record::FaceRecord;
use ndarray::ArrayView1;

/// Cosine similarity of two embeddings, clamped to `[0, 1]`.
///
/// A negative cosine means "no similarity" and is reported as 0. Zero vectors
/// compare as 0. Mismatched lengths are a configuration error.
pub fn cosine_similarity(a: ArrayView1<f32>, b: ArrayView1<f32>) -> Result<f32> {
    if a.len() != b.len() {
        return Err(SwapError::config(format!(
            "embedding length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let dot = a.dot(&b);
    let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    let similarity = if denom > 0.0 { dot / denom } else { 0.0 };

    Ok(similarity.clamp(0.0, 1.0))
}

pub fn face_similarity(a: &FaceRecord, b: &FaceRecord) -> Result<f32> {
    cosine_similarity(a.embedding.view(), b.embedding.view())
}
