use crate::flight::{CacheStats, FlightCache};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub type Embedding = Arc<[f32]>;

/// Content hash of the text salted with the model id, so a model switch misses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingKey(String);

impl EmbeddingKey {
    #[must_use]
    pub fn new(model_id: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub struct EmbeddingCache {
    store: FlightCache<EmbeddingKey, Embedding>,
    /// item id -> keys computed on its behalf, for targeted invalidation.
    owners: Mutex<HashMap<String, HashSet<EmbeddingKey>>>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            store: FlightCache::new("embeddings", capacity, ttl)
                .with_sizer(|vector| vector.len() * std::mem::size_of::<f32>()),
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_compute<F, Fut, E>(
        &self,
        text: &str,
        model_id: &str,
        compute: F,
    ) -> Result<Embedding, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<f32>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let key = EmbeddingKey::new(model_id, text);
        self.store
            .get_or_compute(key, move || {
                let pending = compute();
                async move { pending.await.map(Embedding::from) }
            })
            .await
    }

    /// Same as [`Self::get_or_compute`], remembering that `item_id` owns the entry.
    pub async fn get_or_compute_for_item<F, Fut, E>(
        &self,
        item_id: &str,
        text: &str,
        model_id: &str,
        compute: F,
    ) -> Result<Embedding, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<f32>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(item_id.to_string())
            .or_default()
            .insert(EmbeddingKey::new(model_id, text));
        self.get_or_compute(text, model_id, compute).await
    }

    /// Drops every entry computed for `item_id`; returns how many were cached.
    pub fn invalidate_item(&self, item_id: &str) -> usize {
        let keys = self
            .owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(item_id)
            .unwrap_or_default();
        keys.iter().filter(|key| self.store.invalidate(key)).count()
    }

    pub fn clear(&self) -> usize {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.store.clear()
    }

    pub fn close(&self) {
        self.clear();
        self.store.close();
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}
