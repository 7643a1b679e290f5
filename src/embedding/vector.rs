// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tagged embedding vectors and the similarity math shared by store and retriever.

use crate::errors::{RagError, Result};

/// An embedding vector tagged with the model that produced it.
///
/// Construction rejects empty and non-finite vectors, so every `Embedding`
/// can be persisted and compared.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    model_id: String,
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(model_id: impl Into<String>, values: Vec<f32>) -> Result<Self> {
        let model_id = model_id.into();
        if model_id.trim().is_empty() {
            return Err(RagError::EmbedderResponse(
                "embedding has an empty model id".to_string(),
            ));
        }
        if values.is_empty() {
            return Err(RagError::EmbedderResponse(format!(
                "model '{}' returned an empty vector",
                model_id
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(RagError::EmbedderResponse(format!(
                "model '{}' returned non-finite vector components",
                model_id
            )));
        }
        Ok(Self { model_id, values })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        norm(&self.values)
    }
}

pub(crate) fn norm(values: &[f32]) -> f32 {
    norm_f64(values) as f32
}

fn norm_f64(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt()
}

/// Computes cosine similarity between two vectors.
///
/// Accumulates in f64 so large finite components cannot overflow. Returns
/// `None` when the lengths differ, either vector has zero norm, or the result
/// is not finite. A zero score is always `+0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot_product: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();
    let magnitude_a = norm_f64(a);
    let magnitude_b = norm_f64(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return None;
    }

    let score = dot_product / (magnitude_a * magnitude_b);
    if !score.is_finite() {
        return None;
    }
    // Adding +0.0 turns -0.0 into +0.0 so exact ties compare equal.
    Some(score.clamp(-1.0, 1.0) as f32 + 0.0)
}

/// Scales a vector to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = norm_f64(vector);
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value = (f64::from(*value) / norm) as f32;
    }
}

/// Converts an embedding vector to a compact little-endian blob.
pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Converts a blob back to an embedding vector; `None` if the length is not a multiple of 4.
pub(crate) fn blob_to_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}
