use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::fusion::{FusionEngine, FusionSignals};
use crate::fuzzy::FuzzyMatcher;
use crate::lexical::LexicalMatcher;
use crate::slug::resolve_slug;
use crate::source::ItemSource;
use crate::tags::{HeuristicTagSuggester, ModelTagSuggester, TagSuggester, TagSuggesterKind, TagSuggestion};
use pocket_cache::{CacheManager, CacheManagerStats, CacheScope, InvalidationReport, QuerySignature};
use pocket_protocol::{
    sort_results, ChangeKind, Item, ItemEmbedding, MatchSource, Query, ScoredResult, SearchMode,
    TagFilter,
};
use pocket_vector_store::{
    Embedder, EmbeddingPipeline, IndexStats, RebuildReport, SharedEmbedder, VectorIndex,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinSet;

/// Outcome of [`SearchEngine::generate_embeddings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub model_id: String,
    /// The index switched models and was emptied first.
    pub model_changed: bool,
    pub embedded: usize,
    /// Items that already carried an embedding from this model.
    pub reused: usize,
    pub failed: usize,
}

struct EmbedderRegistry {
    active: SharedEmbedder,
    available: HashMap<String, Arc<dyn Embedder>>,
}

struct EngineInner {
    config: SearchConfig,
    source: Arc<dyn ItemSource>,
    caches: Arc<CacheManager>,
    index: VectorIndex,
    pipeline: EmbeddingPipeline,
    embedders: RwLock<EmbedderRegistry>,
    lexical: LexicalMatcher,
    fuzzy: FuzzyMatcher,
    fusion: FusionEngine,
    tagger: Box<dyn TagSuggester>,
    /// Serializes index maintenance so rebuilds and incremental updates never interleave.
    maintenance: tokio::sync::Mutex<()>,
}

/// Entry point used by the tool-dispatch layer.
///
/// Cheap to clone; all clones share one set of caches and one vector index.
#[derive(Clone)]
pub struct SearchEngine {
    inner: Arc<EngineInner>,
}

impl SearchEngine {
    pub fn new(
        config: SearchConfig,
        source: Arc<dyn ItemSource>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let caches = Arc::new(CacheManager::new(&config.cache));
        Self::with_caches(config, source, embedder, caches)
    }

    /// Builds an engine around an existing cache manager.
    pub fn with_caches(
        config: SearchConfig,
        source: Arc<dyn ItemSource>,
        embedder: Arc<dyn Embedder>,
        caches: Arc<CacheManager>,
    ) -> Result<Self> {
        let config = config.validate()?;
        if embedder.model_id() != config.model_id {
            log::warn!(
                "Configured model {} differs from supplied embedder {}; using the embedder",
                config.model_id,
                embedder.model_id()
            );
        }

        let pipeline = EmbeddingPipeline::new(Arc::clone(&caches), config.embed_timeout())
            .with_max_chars(config.max_embed_chars);
        let active = SharedEmbedder::new(Arc::clone(&embedder));
        let tagger: Box<dyn TagSuggester> = match config.tag_suggester {
            TagSuggesterKind::Heuristic => {
                Box::new(HeuristicTagSuggester::new(&config.tag_vocabulary))
            }
            TagSuggesterKind::Model => Box::new(ModelTagSuggester::new(
                active.clone(),
                pipeline.clone(),
                &config.tag_vocabulary,
            )),
        };
        let fusion = FusionEngine::new(config.weights, config.normalization, config.min_total_score)?;
        let index = VectorIndex::new(embedder.model_id(), embedder.dimension());
        let registry = EmbedderRegistry {
            available: HashMap::from([(embedder.model_id().to_string(), embedder)]),
            active,
        };

        log::info!(
            "Search engine ready: model {}, {} tagger, limit {}",
            registry.active.current().model_id(),
            tagger.name(),
            config.default_limit
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                lexical: LexicalMatcher::new(Arc::clone(&caches), config.bm25),
                fuzzy: FuzzyMatcher::default(),
                fusion,
                tagger,
                source,
                caches,
                index,
                pipeline,
                embedders: RwLock::new(registry),
                maintenance: tokio::sync::Mutex::new(()),
                config,
            }),
        })
    }

    /// Makes another model available to [`Self::generate_embeddings`].
    pub fn register_embedder(&self, embedder: Arc<dyn Embedder>) {
        let mut registry = self
            .inner
            .embedders
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        registry
            .available
            .insert(embedder.model_id().to_string(), embedder);
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn caches(&self) -> &Arc<CacheManager> {
        &self.inner.caches
    }

    pub async fn search(
        &self,
        mode: SearchMode,
        text: &str,
        tags: &TagFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredResult>> {
        self.run(Query::new(mode, text).with_tags(tags.clone()).with_limit(limit))
            .await
    }

    /// Like [`Self::search`] with the mode given by name, as received from callers.
    pub async fn search_str(
        &self,
        mode: &str,
        text: &str,
        tags: &TagFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredResult>> {
        let mode: SearchMode = mode.parse()?;
        self.search(mode, text, tags, limit).await
    }

    /// Answers `query` from the result cache, computing it on a miss.
    pub async fn run(&self, query: Query) -> Result<Vec<ScoredResult>> {
        if query.text.trim().is_empty() {
            return Err(SearchError::InvalidQuery("query text is empty".to_string()));
        }
        let signature = QuerySignature::from_query(&query);
        let query = Arc::new(query);
        let inner = Arc::clone(&self.inner);
        let results = self
            .inner
            .caches
            .results()
            .get_or_compute(&signature, move || {
                let inner = Arc::clone(&inner);
                let query = Arc::clone(&query);
                async move { inner.execute(&query).await.map(Arc::new) }
            })
            .await?;
        Ok(results.as_ref().clone())
    }

    /// Finds an item by id or slug, tolerating typos down to `threshold`.
    pub async fn resolve_by_slug(&self, query: &str, threshold: Option<f32>) -> Result<Item> {
        let items = self.inner.source.list_items(&TagFilter::any()).await?;
        let threshold = threshold.unwrap_or(self.inner.config.slug_threshold);
        resolve_slug(query, &items, threshold, self.inner.config.suggestion_count)
            .map(|found| found.item)
    }

    /// Invalidation hook for the record store.
    ///
    /// Cached results and the item's embeddings are dropped before the first
    /// await, then the vector index is brought in line with the stored item.
    pub async fn on_item_changed(&self, id: &str, kind: ChangeKind) -> Result<InvalidationReport> {
        let report = self.inner.caches.invalidate_for_item(id);
        let _maintenance = self.inner.maintenance.lock().await;

        let current = match kind {
            ChangeKind::Removed => None,
            ChangeKind::Added | ChangeKind::Updated => self.inner.source.get_item(id).await?,
        };
        match current {
            None => {
                self.inner.index.remove(id);
            }
            Some(item) => self.inner.reindex_item(&item).await?,
        }

        // The index may have changed since the first invalidation.
        self.inner.caches.results().invalidate_all();
        log::debug!("Item {id} {kind:?}: caches invalidated");
        Ok(report)
    }

    /// Rebuilds the vector index from the embeddings stored on the items.
    pub async fn rebuild_vector_index(&self) -> Result<RebuildReport> {
        let _maintenance = self.inner.maintenance.lock().await;
        let embedder = self.inner.active_embedder();
        let (model_id, dimension) = (embedder.model_id(), embedder.dimension());
        let items = self.inner.source.list_items(&TagFilter::any()).await?;
        let entries = items.iter().filter_map(|item| {
            item.embedding_for(model_id, dimension)
                .map(|vector| (item.id.clone(), vector.to_vec()))
        });
        let report = self.inner.index.rebuild(model_id, dimension, entries);
        self.inner.caches.results().invalidate_all();
        Ok(report)
    }

    /// Embeds every item lacking an embedding from `model_id` and indexes it.
    ///
    /// Switching to a different model resets the index and drops cached
    /// embeddings first, so vectors from two models never mix.
    pub async fn generate_embeddings(&self, model_id: &str) -> Result<GenerationReport> {
        let _maintenance = self.inner.maintenance.lock().await;
        let embedder = self.inner.switch_model(model_id)?;
        let dimension = embedder.dimension();

        let snapshot = self.inner.index.snapshot();
        let model_changed = snapshot.model_id() != model_id || snapshot.dimension() != dimension;
        if model_changed {
            log::info!(
                "Embedding model changed {} -> {model_id}; resetting index",
                snapshot.model_id()
            );
            self.inner.index.reset(model_id, dimension);
            self.inner.caches.clear(CacheScope::Embeddings);
        }
        drop(snapshot);

        let mut report = GenerationReport {
            model_id: model_id.to_string(),
            model_changed,
            ..GenerationReport::default()
        };
        let items = self.inner.source.list_items(&TagFilter::any()).await?;
        let mut pending = Vec::new();
        for item in items {
            if let Some(vector) = item.embedding_for(model_id, dimension) {
                self.inner.index.upsert(&item.id, vector)?;
                report.reused += 1;
                continue;
            }
            pending.push((item.id, item.text));
        }

        for batch in pending.chunks(self.inner.config.embedding_batch_size) {
            let mut tasks = JoinSet::new();
            for (id, text) in batch.iter().cloned() {
                let pipeline = self.inner.pipeline.clone();
                let embedder = Arc::clone(&embedder);
                tasks.spawn(async move {
                    let vector = pipeline.embed_item(&embedder, &id, &text).await;
                    (id, vector)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (id, vector) = match joined {
                    Ok((id, Ok(vector))) => (id, vector),
                    Ok((id, Err(err))) => {
                        log::warn!("Failed to embed {id}: {err}");
                        report.failed += 1;
                        continue;
                    }
                    Err(err) => {
                        log::warn!("Embedding task failed: {err}");
                        report.failed += 1;
                        continue;
                    }
                };
                let stored = ItemEmbedding::new(vector.to_vec(), model_id);
                if let Err(err) = self.inner.source.store_embedding(&id, stored).await {
                    log::warn!("Could not store embedding for {id}: {err}");
                    report.failed += 1;
                    continue;
                }
                match self.inner.index.upsert(&id, &vector) {
                    Ok(()) => report.embedded += 1,
                    Err(_) => report.failed += 1,
                }
            }
        }

        self.inner.caches.results().invalidate_all();
        log::info!(
            "Generated embeddings with {model_id}: {} new, {} reused, {} failed",
            report.embedded,
            report.reused,
            report.failed
        );
        Ok(report)
    }

    pub async fn suggest_tags(
        &self,
        text: &str,
        existing: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<TagSuggestion>> {
        let limit = limit.unwrap_or(self.inner.config.suggestion_count);
        self.inner.tagger.suggest_tags(text, existing, limit).await
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheManagerStats {
        self.inner.caches.stats()
    }

    #[must_use]
    pub fn index_stats(&self) -> IndexStats {
        self.inner.index.stats()
    }

    pub fn clear_cache(&self, scope: CacheScope) {
        self.inner.caches.clear(scope);
    }

    /// Flushes every cache. Later searches still work, uncached.
    pub fn shutdown(&self) {
        self.inner.caches.shutdown();
        log::info!("Search engine caches flushed");
    }
}

impl EngineInner {
    fn active_embedder(&self) -> Arc<dyn Embedder> {
        let registry = self.embedders.read().unwrap_or_else(PoisonError::into_inner);
        registry.active.current()
    }

    fn switch_model(&self, model_id: &str) -> Result<Arc<dyn Embedder>> {
        let mut registry = self.embedders.write().unwrap_or_else(PoisonError::into_inner);
        let embedder = registry
            .available
            .get(model_id)
            .cloned()
            .ok_or_else(|| SearchError::UnknownModel(model_id.to_string()))?;
        registry.active.replace(Arc::clone(&embedder));
        Ok(embedder)
    }

    async fn reindex_item(&self, item: &Item) -> Result<()> {
        let embedder = self.active_embedder();
        let (model_id, dimension) = (embedder.model_id(), embedder.dimension());
        if let Some(vector) = item.embedding_for(model_id, dimension) {
            self.index.upsert(&item.id, vector)?;
            return Ok(());
        }
        // Whatever vector the index holds was computed from older text.
        self.index.remove(&item.id);
        if !self.config.embed_on_change {
            return Ok(());
        }

        match self.pipeline.embed_item(&embedder, &item.id, &item.text).await {
            Ok(vector) => {
                let stored = ItemEmbedding::new(vector.to_vec(), model_id);
                self.source.store_embedding(&item.id, stored).await?;
                self.index.upsert(&item.id, &vector)?;
            }
            Err(err) => log::warn!("Deferred embedding for {}: {err}", item.id),
        }
        Ok(())
    }

    async fn execute(&self, query: &Query) -> Result<Vec<ScoredResult>> {
        let limit = query.limit.unwrap_or(self.config.default_limit);
        let items: Vec<Item> = self
            .source
            .list_items(&query.tags)
            .await?
            .into_iter()
            .filter(|item| query.tags.matches(item))
            .collect();

        let mut results = match query.mode {
            SearchMode::Substring
            | SearchMode::FullText
            | SearchMode::Glob
            | SearchMode::Regex
            | SearchMode::Exact => {
                self.lexical
                    .match_items(&items, &query.text, query.mode, &TagFilter::any())?
            }
            SearchMode::Vector => self.vector_search(&items, &query.text).await?,
            SearchMode::Hybrid => self.hybrid_search(&items, &query.text).await,
        };
        sort_results(&mut results);
        results.truncate(limit);
        log::debug!(
            "{} search '{}' over {} items: {} results",
            query.mode,
            query.text,
            items.len(),
            results.len()
        );
        Ok(results)
    }

    /// `(id, similarity)` for candidates above the similarity threshold.
    ///
    /// An empty index yields no signal rather than an error.
    async fn vector_signal(&self, items: &[Item], text: &str) -> Result<Vec<(String, f32)>> {
        if self.index.is_empty() {
            log::warn!("Vector index is empty; vector signal skipped");
            return Ok(Vec::new());
        }
        let embedder = self.active_embedder();
        let query_vector = self.pipeline.embed_query(&embedder, text).await?;
        let allowed: HashSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
        let hits = self.index.query_filtered(&query_vector, self.config.vector_top_k, |id| {
            allowed.contains(id)
        })?;
        Ok(hits
            .into_iter()
            .filter(|(_, similarity)| *similarity >= self.config.vector_similarity_threshold)
            .collect())
    }

    async fn vector_search(&self, items: &[Item], text: &str) -> Result<Vec<ScoredResult>> {
        let hits = self.vector_signal(items, text).await?;
        let by_id: HashMap<&str, &Item> = items.iter().map(|item| (item.id.as_str(), item)).collect();
        Ok(hits
            .into_iter()
            .filter_map(|(id, similarity)| {
                by_id
                    .get(id.as_str())
                    .map(|item| ScoredResult::single((*item).clone(), MatchSource::Vector, similarity))
            })
            .collect())
    }

    fn full_text_signal(&self, items: &[Item], text: &str) -> Vec<(String, f32)> {
        let candidates: Vec<&Item> = items.iter().collect();
        match self.lexical.rank_full_text(&candidates, text) {
            Ok(scored) => scored
                .into_iter()
                .map(|(idx, score)| (candidates[idx].id.clone(), score))
                .collect(),
            Err(err) => {
                log::warn!("Hybrid search continues without full-text signal: {err}");
                Vec::new()
            }
        }
    }

    fn fuzzy_signal(&self, items: &[Item], text: &str) -> Vec<(String, f32)> {
        items
            .iter()
            .map(|item| (item.id.clone(), self.fuzzy.item_score(text, item)))
            .filter(|(_, score)| *score >= self.config.fuzzy_threshold)
            .collect()
    }

    /// Fuses the vector, full-text and fuzzy signals. A failing signal contributes nothing.
    ///
    /// The query embedding runs on its own cache flight task, so the lexical and
    /// fuzzy passes proceed while it is pending.
    async fn hybrid_search(&self, items: &[Item], text: &str) -> Vec<ScoredResult> {
        let vector = async {
            self.vector_signal(items, text).await.unwrap_or_else(|err| {
                log::warn!("Hybrid search continues without vector signal: {err}");
                Vec::new()
            })
        };
        let lexical_and_fuzzy =
            async { (self.full_text_signal(items, text), self.fuzzy_signal(items, text)) };
        let (vector, (full_text, fuzzy)) = tokio::join!(vector, lexical_and_fuzzy);

        let by_id: HashMap<&str, &Item> = items.iter().map(|item| (item.id.as_str(), item)).collect();
        self.fusion
            .fuse(FusionSignals {
                vector,
                full_text,
                fuzzy,
            })
            .into_iter()
            .filter_map(|fused| {
                by_id.get(fused.id.as_str()).map(|item| ScoredResult {
                    item: (*item).clone(),
                    score: fused.score,
                    contributions: fused.contributions,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryItemStore;
    use pocket_vector_store::HashingEmbedder;
    use pretty_assertions::assert_eq;

    fn engine(items: Vec<Item>) -> (SearchEngine, Arc<MemoryItemStore>) {
        let store = Arc::new(MemoryItemStore::from_items(items));
        let engine = SearchEngine::new(
            SearchConfig::default(),
            store.clone(),
            Arc::new(HashingEmbedder::default()),
        )
        .unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (engine, _) = engine(Vec::new());
        let err = engine
            .search(SearchMode::Substring, "  ", &TagFilter::any(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn unknown_mode_name_is_invalid_mode() {
        let (engine, _) = engine(Vec::new());
        let err = engine
            .search_str("semantic-ish", "x", &TagFilter::any(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidMode(_)));
    }

    #[tokio::test]
    async fn default_limit_applies() {
        let items = (0..8).map(|i| Item::new(format!("n{i}"), "note")).collect();
        let (engine, _) = engine(items);
        let found = engine
            .search(SearchMode::Substring, "note", &TagFilter::any(), None)
            .await
            .unwrap();
        assert_eq!(found.len(), 5);
        let more = engine
            .search(SearchMode::Substring, "note", &TagFilter::any(), Some(7))
            .await
            .unwrap();
        assert_eq!(more.len(), 7);
    }

    #[tokio::test]
    async fn vector_mode_on_empty_index_is_empty() {
        let (engine, _) = engine(vec![Item::new("a", "fibonacci heap")]);
        let found = engine
            .search(SearchMode::Vector, "heap", &TagFilter::any(), None)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn vector_mode_after_generation() {
        let (engine, store) = engine(vec![
            Item::new("heap", "fibonacci heap data structure"),
            Item::new("bread", "sourdough bread starter"),
        ]);
        let report = engine.generate_embeddings(pocket_vector_store::DEFAULT_MODEL_ID).await.unwrap();
        assert_eq!((report.embedded, report.reused, report.model_changed), (2, 0, false));
        assert!(store.get_item("heap").await.unwrap().unwrap().embedding.is_some());

        let found = engine
            .search(SearchMode::Vector, "heap data structure", &TagFilter::any(), None)
            .await
            .unwrap();
        assert_eq!(found[0].item.id, "heap");
        assert_eq!(found[0].sources().collect::<Vec<_>>(), vec![MatchSource::Vector]);
    }

    #[tokio::test]
    async fn unknown_model_is_reported() {
        let (engine, _) = engine(Vec::new());
        assert_eq!(
            engine.generate_embeddings("nope").await.unwrap_err(),
            SearchError::UnknownModel("nope".to_string())
        );
    }

    #[tokio::test]
    async fn tag_suggestions_use_configured_strategy() {
        let (engine, _) = engine(Vec::new());
        let found = engine
            .suggest_tags("collective intelligence", &[], Some(2))
            .await
            .unwrap();
        let tags: Vec<_> = found.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, vec!["collective", "intelligence"]);
    }

    #[tokio::test]
    async fn removed_items_leave_the_index() {
        let (engine, store) = engine(vec![Item::new("a", "alpha"), Item::new("b", "beta")]);
        engine.generate_embeddings(pocket_vector_store::DEFAULT_MODEL_ID).await.unwrap();
        assert_eq!(engine.index_stats().vectors, 2);

        store.remove("a");
        engine.on_item_changed("a", ChangeKind::Removed).await.unwrap();
        assert_eq!(engine.index_stats().vectors, 1);
    }
}
