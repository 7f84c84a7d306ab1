use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_MODEL_ID: &str = "hashing-384";
pub const DEFAULT_DIMENSION: usize = 384;

/// Buckets touched by each token; more projections smooth out collisions.
const PROJECTIONS: usize = 4;

/// Text -> fixed-length vector. Implementations may be slow; callers bound
/// them with a timeout and cache their output.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Swappable handle on the embedder currently in use; clones see every swap.
#[derive(Clone)]
pub struct SharedEmbedder(Arc<RwLock<Arc<dyn Embedder>>>);

impl SharedEmbedder {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self(Arc::new(RwLock::new(embedder)))
    }

    #[must_use]
    pub fn current(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, embedder: Arc<dyn Embedder>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = embedder;
    }
}

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Texts sharing words land close together, which is enough for offline use
/// and tests without shipping model weights.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model_id: String,
    dimension: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension: dimension.max(1),
        }
    }

    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        let salt = (self.dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        for token in text.unicode_words() {
            let token = token.to_lowercase();
            let mut state = fnv1a_64(token.as_bytes()) ^ salt;
            for _ in 0..PROJECTIONS {
                let bits = splitmix64(&mut state);
                let bucket = (bits % self.dimension as u64) as usize;
                let sign = if bits >> 63 == 0 { 1.0 } else { -1.0 };
                vec[bucket] += sign;
            }
        }
        normalize(&mut vec);
        vec
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_ID, DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn deterministic_and_unit_length() {
        let embedder = HashingEmbedder::new("t", 64);
        let a = embedder.embed("Fibonacci sequence generator").await.unwrap();
        let b = embedder.embed("fibonacci   SEQUENCE generator").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_score_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed_sync("fibonacci heap");
        let heap = embedder.embed_sync("fibonacci heap data structure");
        let other = embedder.embed_sync("sourdough bread recipe");
        assert!(cosine_similarity(&query, &heap) > cosine_similarity(&query, &other));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new("t", 8);
        assert_eq!(embedder.embed_sync("  ... "), vec![0.0; 8]);
    }

    #[tokio::test]
    async fn default_batch_embeds_each_text() {
        let embedder = HashingEmbedder::new("t", 16);
        let texts = vec!["a b".to_string(), "c".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], embedder.embed_sync("c"));
    }
}
