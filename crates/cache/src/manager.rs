use crate::config::CacheConfig;
use crate::embedding::EmbeddingCache;
use crate::error::CacheError;
use crate::flight::CacheStats;
use crate::patterns::PatternCache;
use crate::results::ResultCache;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    Embeddings,
    Results,
    Patterns,
    All,
}

impl FromStr for CacheScope {
    type Err = CacheError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "embeddings" => Ok(Self::Embeddings),
            "results" => Ok(Self::Results),
            "patterns" => Ok(Self::Patterns),
            "all" => Ok(Self::All),
            other => Err(CacheError::InvalidScope(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheManagerStats {
    pub embeddings: CacheStats,
    pub results: CacheStats,
    pub patterns: CacheStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub embeddings: usize,
    pub results: usize,
}

/// Owner of every derived-artifact cache in the process.
///
/// Built once at startup and handed to components as `Arc<CacheManager>`.
/// Matchers and the vector index only populate entries through the caches
/// exposed here; eviction and invalidation policy stays in this crate.
pub struct CacheManager {
    embeddings: EmbeddingCache,
    results: ResultCache,
    patterns: PatternCache,
}

impl CacheManager {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        log::debug!(
            "Cache manager: embeddings={} results={} (ttl {:?}) patterns={}",
            config.embedding_capacity,
            config.result_capacity,
            config.result_ttl(),
            config.pattern_capacity
        );
        Self {
            embeddings: EmbeddingCache::new(config.embedding_capacity, config.embedding_ttl()),
            results: ResultCache::new(config.result_capacity, config.result_ttl()),
            patterns: PatternCache::new(config.pattern_capacity),
        }
    }

    #[must_use]
    pub const fn embeddings(&self) -> &EmbeddingCache {
        &self.embeddings
    }

    #[must_use]
    pub const fn results(&self) -> &ResultCache {
        &self.results
    }

    #[must_use]
    pub const fn patterns(&self) -> &PatternCache {
        &self.patterns
    }

    /// Called synchronously with an item mutation, before the mutation is
    /// acknowledged, so no later read can observe a stale entry.
    pub fn invalidate_for_item(&self, item_id: &str) -> InvalidationReport {
        let report = InvalidationReport {
            embeddings: self.embeddings.invalidate_item(item_id),
            results: self.results.invalidate_all(),
        };
        log::debug!(
            "Invalidated caches for item {item_id}: {} embeddings, {} result sets",
            report.embeddings,
            report.results
        );
        report
    }

    pub fn clear(&self, scope: CacheScope) {
        match scope {
            CacheScope::Embeddings => {
                self.embeddings.clear();
            }
            CacheScope::Results => {
                self.results.invalidate_all();
            }
            CacheScope::Patterns => {
                self.patterns.clear();
            }
            CacheScope::All => {
                self.embeddings.clear();
                self.results.invalidate_all();
                self.patterns.clear();
            }
        }
        log::info!("Cleared cache scope {scope:?}");
    }

    /// Drops TTL-expired entries eagerly instead of waiting for the next lookup.
    pub fn purge_expired(&self) -> usize {
        self.embeddings.purge_expired() + self.results.purge_expired()
    }

    pub fn stats(&self) -> CacheManagerStats {
        CacheManagerStats {
            embeddings: self.embeddings.stats(),
            results: self.results.stats(),
            patterns: self.patterns.stats(),
        }
    }

    /// Flushes everything; the caches are never persisted.
    pub fn shutdown(&self) {
        self.embeddings.close();
        self.results.close();
        self.patterns.close();
        log::info!("Cache manager shut down");
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::QuerySignature;
    use pocket_protocol::{SearchMode, TagFilter};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn warm(manager: &CacheManager) {
        manager
            .embeddings()
            .get_or_compute_for_item("a", "alpha", "m", || async { Ok::<_, String>(vec![1.0]) })
            .await
            .unwrap();
        let signature = QuerySignature::new(SearchMode::Hybrid, "alpha", &TagFilter::any(), None);
        manager
            .results()
            .get_or_compute(&signature, || async { Ok::<_, String>(Arc::new(Vec::new())) })
            .await
            .unwrap();
    }

    #[test]
    fn parses_scopes() {
        assert_eq!("All".parse::<CacheScope>(), Ok(CacheScope::All));
        assert_eq!(
            "disk".parse::<CacheScope>(),
            Err(CacheError::InvalidScope("disk".to_string()))
        );
    }

    #[tokio::test]
    async fn item_invalidation_drops_embedding_and_all_results() {
        let manager = CacheManager::default();
        warm(&manager).await;

        let report = manager.invalidate_for_item("a");
        assert_eq!(report, InvalidationReport { embeddings: 1, results: 1 });
        let stats = manager.stats();
        assert_eq!((stats.embeddings.entries, stats.results.entries), (0, 0));
    }

    #[tokio::test]
    async fn scoped_clear_leaves_other_caches() {
        let manager = CacheManager::default();
        warm(&manager).await;

        manager.clear(CacheScope::Results);
        assert_eq!(manager.embeddings().len(), 1);
        assert!(manager.results().is_empty());

        manager.clear(CacheScope::All);
        assert!(manager.embeddings().is_empty());
    }

    #[tokio::test]
    async fn shutdown_flushes_and_disables() {
        let manager = CacheManager::default();
        warm(&manager).await;
        manager.shutdown();

        let stats = manager.stats();
        assert!(stats.embeddings.closed && stats.results.closed && stats.patterns.closed);
        warm(&manager).await;
        assert!(manager.embeddings().is_empty());
    }
}
