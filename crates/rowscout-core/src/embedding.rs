//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, the sequential batching helper used at index build time, and
//! pure helpers for distance, similarity and vector serialization.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `rowscout`
//! app crate.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

/// Trait for embedding providers.
///
/// One provider must be used for the whole lifetime of an index: vectors
/// from different models are not comparable.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per text in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))?;
        check_dims(self.dims(), &vector)?;
        Ok(vector)
    }
}

fn check_dims(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::Embedding(format!(
            "expected {} dimensions, got {}",
            expected,
            vector.len()
        )));
    }
    Ok(())
}

/// Embed `texts` in sequential batches of `batch_size`.
///
/// Batching only amortizes request overhead; batches are sent one after
/// another. Fails if any batch returns the wrong number of vectors or a
/// vector of the wrong dimension.
pub async fn embed_documents(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let mut out = Vec::with_capacity(texts.len());

    for (i, batch) in texts.chunks(batch_size).enumerate() {
        debug!(batch = i, size = batch.len(), "embedding batch");
        let vectors = provider.embed_batch(batch).await?;
        if vectors.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "batch {} returned {} vectors for {} texts",
                i,
                vectors.len(),
                batch.len()
            )));
        }
        for v in &vectors {
            check_dims(provider.dims(), v)?;
        }
        out.extend(vectors);
    }

    Ok(out)
}

/// Encode a float vector as little-endian f32 bytes.
///
/// Each `f32` is stored as 4 bytes, producing `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use rowscout_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes produced by [`vec_to_blob`] back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Flatten a matrix of equal-length rows into one row-major blob.
pub fn matrix_to_blob(rows: &[Vec<f32>]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(rows.iter().map(|r| r.len() * 4).sum());
    for row in rows {
        bytes.extend(vec_to_blob(row));
    }
    bytes
}

/// Split a row-major blob back into `dims`-wide rows.
///
/// Fails when the blob length is not a whole number of rows.
pub fn blob_to_matrix(blob: &[u8], dims: usize) -> Result<Vec<Vec<f32>>> {
    let row_bytes = dims * 4;
    if dims == 0 || blob.len() % row_bytes != 0 {
        return Err(Error::InvalidInput(format!(
            "vector blob of {} bytes is not a multiple of {} dimensions",
            blob.len(),
            dims
        )));
    }
    Ok(blob.chunks_exact(row_bytes).map(blob_to_vec).collect())
}

/// Squared Euclidean distance, the metric of a flat L2 index.
///
/// Returns `f32::INFINITY` for vectors of different lengths.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashEmbedder;

    #[test]
    fn test_matrix_blob_roundtrip_is_bit_exact() {
        let rows = vec![vec![1.0f32, -2.5, 3.125], vec![0.0, -0.001, f32::MIN_POSITIVE]];
        let blob = matrix_to_blob(&rows);
        let restored = blob_to_matrix(&blob, 3).unwrap();
        assert_eq!(rows, restored);
    }

    #[test]
    fn test_blob_to_matrix_rejects_ragged_blob() {
        let blob = vec_to_blob(&[1.0, 2.0, 3.0]);
        assert!(blob_to_matrix(&blob, 2).is_err());
        assert!(blob_to_matrix(&blob, 0).is_err());
    }

    #[test]
    fn test_squared_l2() {
        assert_eq!(squared_l2(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_l2(&[1.0], &[1.0, 2.0]), f32::INFINITY);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_embed_documents_batches_sequentially() {
        let embedder = HashEmbedder::new(16);
        let texts: Vec<String> = (0..7).map(|i| format!("item {}", i)).collect();
        let vectors = embed_documents(&embedder, &texts, 3).await.unwrap();
        assert_eq!(vectors.len(), 7);
        assert_eq!(embedder.batch_calls(), 3);
        assert!(vectors.iter().all(|v| v.len() == 16));
    }
}
