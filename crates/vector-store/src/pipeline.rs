use crate::embedder::Embedder;
use crate::error::{Result, VectorStoreError};
use pocket_cache::{CacheManager, Embedding};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_CHARS: usize = 512;

/// Collapses whitespace and caps length, preferring to cut after a sentence.
#[must_use]
pub fn prepare_text(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_chars).collect();
    match cut.rfind(|c: char| matches!(c, '.' | '!' | '?')) {
        Some(end) if end >= cut.len() / 2 => cut[..=end].to_string(),
        _ => cut.trim_end().to_string(),
    }
}

/// Embedding requests routed through the shared embedding cache.
///
/// Each call is bounded by `timeout`. The computation itself keeps running
/// after a timeout and still fills the cache for later callers.
#[derive(Clone)]
pub struct EmbeddingPipeline {
    caches: Arc<CacheManager>,
    timeout: Duration,
    max_chars: usize,
}

impl EmbeddingPipeline {
    #[must_use]
    pub fn new(caches: Arc<CacheManager>, timeout: Duration) -> Self {
        Self {
            caches,
            timeout,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    #[must_use]
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    pub async fn embed_query(&self, embedder: &Arc<dyn Embedder>, text: &str) -> Result<Embedding> {
        self.embed(embedder, None, text).await
    }

    /// Embeds an item's text, recording the item as owner of the cache entry.
    pub async fn embed_item(
        &self,
        embedder: &Arc<dyn Embedder>,
        item_id: &str,
        text: &str,
    ) -> Result<Embedding> {
        self.embed(embedder, Some(item_id), text).await
    }

    async fn embed(
        &self,
        embedder: &Arc<dyn Embedder>,
        owner: Option<&str>,
        text: &str,
    ) -> Result<Embedding> {
        let dimension = embedder.dimension();
        let prepared = prepare_text(text, self.max_chars);
        if prepared.is_empty() {
            return Ok(Embedding::from(vec![0.0; dimension]));
        }

        let model_id = embedder.model_id().to_string();
        let compute = {
            let embedder = Arc::clone(embedder);
            let prepared = prepared.clone();
            move || {
                let embedder = Arc::clone(&embedder);
                let text = prepared.clone();
                async move {
                    let vector = embedder.embed(&text).await?;
                    if vector.len() != dimension {
                        log::warn!(
                            "Model {} produced {} values, expected {dimension}",
                            embedder.model_id(),
                            vector.len()
                        );
                        return Err(VectorStoreError::DimensionMismatch {
                            expected: dimension,
                            actual: vector.len(),
                        });
                    }
                    Ok(vector)
                }
            }
        };
        let cache = self.caches.embeddings();
        let lookup = async {
            match owner {
                Some(item_id) => {
                    cache
                        .get_or_compute_for_item(item_id, &prepared, &model_id, compute)
                        .await
                }
                None => cache.get_or_compute(&prepared, &model_id, compute).await,
            }
        };

        tokio::time::timeout(self.timeout, lookup)
            .await
            .map_err(|_| VectorStoreError::ComputeTimeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowEmbedder {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn model_id(&self) -> &str {
            "slow"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![1.0, 0.0])
        }
    }

    #[test]
    fn prepare_collapses_whitespace() {
        assert_eq!(prepare_text("  a\n\tb   c ", 100), "a b c");
    }

    #[test]
    fn prepare_cuts_at_sentence_boundary() {
        let text = "First sentence here. Second sentence is rather long indeed";
        assert_eq!(prepare_text(text, 30), "First sentence here.");
        assert_eq!(prepare_text("no punctuation at all here", 10), "no punctua");
    }

    #[tokio::test]
    async fn repeated_queries_hit_the_cache() {
        let caches = Arc::new(CacheManager::default());
        let pipeline = EmbeddingPipeline::new(Arc::clone(&caches), Duration::from_secs(1));
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new("h", 8));

        let a = pipeline.embed_query(&embedder, "hello  world").await.unwrap();
        let b = pipeline.embed_query(&embedder, "hello world").await.unwrap();
        assert_eq!(&*a, &*b);
        assert_eq!(caches.stats().embeddings.hits, 1);
    }

    #[tokio::test]
    async fn empty_text_skips_inference() {
        let caches = Arc::new(CacheManager::default());
        let pipeline = EmbeddingPipeline::new(caches, Duration::from_secs(1));
        let slow = Arc::new(SlowEmbedder {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let embedder: Arc<dyn Embedder> = slow.clone();

        let vector = pipeline.embed_query(&embedder, "   ").await.unwrap();
        assert_eq!(&*vector, &[0.0, 0.0]);
        assert_eq!(slow.calls.load(Ordering::SeqCst), 0);
    }

    /// Returns a short vector on the first call only.
    struct FlakyShapeEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FlakyShapeEmbedder {
        fn model_id(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![1.0])
            } else {
                Ok(vec![0.0, 1.0, 0.0])
            }
        }
    }

    #[tokio::test]
    async fn wrong_length_vectors_are_never_cached() {
        let caches = Arc::new(CacheManager::default());
        let pipeline = EmbeddingPipeline::new(Arc::clone(&caches), Duration::from_secs(1));
        let flaky = Arc::new(FlakyShapeEmbedder {
            calls: AtomicUsize::new(0),
        });
        let embedder: Arc<dyn Embedder> = flaky.clone();

        let err = pipeline.embed_query(&embedder, "shape").await.unwrap_err();
        assert_eq!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        );
        assert_eq!(caches.stats().embeddings.entries, 0);

        let vector = pipeline.embed_query(&embedder, "shape").await.unwrap();
        assert_eq!(&*vector, &[0.0, 1.0, 0.0]);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_reports_and_still_fills_cache() {
        let caches = Arc::new(CacheManager::default());
        let pipeline = EmbeddingPipeline::new(Arc::clone(&caches), Duration::from_millis(10));
        let slow = Arc::new(SlowEmbedder {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let embedder: Arc<dyn Embedder> = slow.clone();

        let err = pipeline.embed_query(&embedder, "slow text").await.unwrap_err();
        assert_eq!(err, VectorStoreError::ComputeTimeout(Duration::from_millis(10)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pipeline.embed_query(&embedder, "slow text").await.is_ok());
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn item_embeddings_are_owned() {
        let caches = Arc::new(CacheManager::default());
        let pipeline = EmbeddingPipeline::new(Arc::clone(&caches), Duration::from_secs(1));
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new("h", 8));

        pipeline.embed_item(&embedder, "item-1", "body").await.unwrap();
        assert_eq!(caches.invalidate_for_item("item-1").embeddings, 1);
    }
}
