use crate::config::get_config;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for a single piece of text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.embed_many(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedderError::GenerationFailed("provider returned no vectors".into()))
    }

    /// Produce an embedding vector for each supplied chunk of text.
    async fn embed_many(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedderError>;
}

/// Deterministic embedding client standing in for a live model endpoint.
///
/// Folds the text through a rolling FNV-1a hash and scatters each
/// intermediate state into the vector, then normalizes to unit length.
/// Identical texts therefore map to identical vectors (cosine 1.0), which is
/// what the ingestion round trip and ranking tests rely on. Not a semantic
/// embedding; production deployments wire a real provider behind the trait.
pub struct HashEmbedder;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl HashEmbedder {
    /// Construct a new deterministic embedding client instance.
    pub const fn new() -> Self {
        Self
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        let mut state = FNV_OFFSET_BASIS;
        for byte in text.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(FNV_PRIME);
            let slot = (state % dimension as u64) as usize;
            let weight = (state >> 32) as u32;
            embedding[slot] += weight as f32 / u32::MAX as f32;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed_many(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let config = get_config();
        let dimension = config.embedding_dimension;

        tracing::debug!(
            provider = ?config.embedding_provider,
            model = %config.embedding_model,
            dimension,
            count = texts.len(),
            "Generating embeddings"
        );

        if dimension == 0 {
            return Err(EmbedderError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        if texts.is_empty() {
            return Err(EmbedderError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let embeddings = texts
            .into_iter()
            .map(|text| Self::encode(&text, dimension))
            .collect();

        Ok(embeddings)
    }
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client() -> Box<dyn EmbeddingClient> {
    Box::new(HashEmbedder::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::ensure_test_config;

    #[tokio::test]
    async fn embeddings_are_normalized_and_deterministic() {
        ensure_test_config();
        let client = HashEmbedder::new();
        let first = client.embed_one("hello world").await.expect("vector");
        let second = client.embed_one("hello world").await.expect("vector");
        assert_eq!(first, second);

        let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn distinct_texts_produce_distinct_vectors() {
        ensure_test_config();
        let client = HashEmbedder::new();
        let vectors = client
            .embed_many(vec!["alpha".into(), "a completely different text".into()])
            .await
            .expect("vectors");
        assert_eq!(vectors.len(), 2);
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn single_byte_difference_changes_the_vector() {
        ensure_test_config();
        let client = HashEmbedder::new();
        let vectors = client
            .embed_many(vec!["abc".into(), "abd".into()])
            .await
            .expect("vectors");
        // The rolling fold diverges at the first differing byte, so even
        // near-identical texts land in different slots.
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        ensure_test_config();
        let client = HashEmbedder::new();
        assert!(client.embed_many(Vec::new()).await.is_err());
    }
}
