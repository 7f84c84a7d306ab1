use crate::flight::{CacheStats, FlightCache};
use pocket_protocol::{Query, ScoredResult, SearchMode, TagFilter};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub type ResultSet = Arc<Vec<ScoredResult>>;

const FIELD_SEPARATOR: char = '\u{1f}';

/// Deterministic description of a search request.
///
/// The query text is kept verbatim: exact mode is case-sensitive, so folding
/// case here would alias distinct requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QuerySignature {
    pub mode: SearchMode,
    pub text: String,
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

impl QuerySignature {
    #[must_use]
    pub fn new(mode: SearchMode, text: &str, tags: &TagFilter, limit: Option<usize>) -> Self {
        // TagFilter iterates in sorted order.
        Self {
            mode,
            text: text.to_string(),
            tags: tags.iter().map(str::to_string).collect(),
            limit,
        }
    }

    #[must_use]
    pub fn from_query(query: &Query) -> Self {
        Self::new(query.mode, &query.text, &query.tags, query.limit)
    }

    #[must_use]
    pub fn encode(&self) -> String {
        let limit = self.limit.map_or_else(|| "-".to_string(), |limit| limit.to_string());
        format!(
            "{mode}{sep}{text}{sep}{tags}{sep}{limit}",
            mode = self.mode,
            sep = FIELD_SEPARATOR,
            text = self.text,
            tags = self.tags.join(","),
        )
    }

    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!("{:x}", Sha256::digest(self.encode().as_bytes()))
    }
}

pub struct ResultCache {
    store: FlightCache<String, ResultSet>,
}

impl ResultCache {
    #[must_use]
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            store: FlightCache::new("results", capacity, ttl).with_sizer(|results| results.len()),
        }
    }

    pub async fn get_or_compute<F, Fut, E>(
        &self,
        signature: &QuerySignature,
        compute: F,
    ) -> Result<ResultSet, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ResultSet, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.store
            .get_or_compute(signature.fingerprint(), compute)
            .await
    }

    /// Coarse invalidation: any item mutation drops every cached ranking.
    pub fn invalidate_all(&self) -> usize {
        self.store.clear()
    }

    pub fn close(&self) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use pocket_protocol::{Item, MatchSource};
    use pretty_assertions::assert_eq;

    #[test]
    fn signature_is_order_independent_for_tags() {
        let a = QuerySignature::new(SearchMode::FullText, "rust", &TagFilter::new(["b", "a"]), Some(5));
        let b = QuerySignature::new(SearchMode::FullText, "rust", &TagFilter::new(["A", "b"]), Some(5));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.encode(), "fts\u{1f}rust\u{1f}a,b\u{1f}5");
    }

    #[test]
    fn signature_distinguishes_every_field() {
        let base = QuerySignature::new(SearchMode::Exact, "Rust", &TagFilter::any(), None);
        let variants = [
            QuerySignature::new(SearchMode::Substring, "Rust", &TagFilter::any(), None),
            QuerySignature::new(SearchMode::Exact, "rust", &TagFilter::any(), None),
            QuerySignature::new(SearchMode::Exact, "Rust", &TagFilter::new(["x"]), None),
            QuerySignature::new(SearchMode::Exact, "Rust", &TagFilter::any(), Some(3)),
        ];
        for variant in variants {
            assert_ne!(base.fingerprint(), variant.fingerprint());
        }
    }

    #[tokio::test]
    async fn invalidate_all_forces_recompute() {
        let cache = ResultCache::new(8, Some(Duration::from_secs(600)));
        let signature = QuerySignature::new(SearchMode::Substring, "x", &TagFilter::any(), None);
        let compute = |id: &'static str| {
            move || async move {
                Ok::<_, String>(Arc::new(vec![ScoredResult::single(
                    Item::new(id, "x"),
                    MatchSource::Substring,
                    1.0,
                )]))
            }
        };

        let first = cache.get_or_compute(&signature, compute("old")).await.unwrap();
        let cached = cache.get_or_compute(&signature, compute("new")).await.unwrap();
        assert_eq!(cached[0].item.id, first[0].item.id);

        assert_eq!(cache.invalidate_all(), 1);
        let fresh = cache.get_or_compute(&signature, compute("new")).await.unwrap();
        assert_eq!(fresh[0].item.id, "new");
    }
}
