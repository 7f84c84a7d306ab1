use pocket_search::{
    ChangeKind, FusionEngine, FusionSignals, FuzzyMatcher, HashingEmbedder, Item, ItemSource,
    LexicalMatcher, MatchSource, MemoryItemStore, SearchConfig, SearchEngine, SearchError,
    SearchMode, TagFilter, DEFAULT_MODEL_ID,
};
use pocket_search::{Bm25Params, CacheManager};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn fibonacci_items() -> Vec<Item> {
    vec![
        Item::new("A", "fibonacci sequence generator")
            .with_tags(["python"])
            .with_slug("fibonacci-generator"),
        Item::new("B", "fibonacci heap data structure")
            .with_tags(["algorithms"])
            .with_slug("fibonacci-heap"),
    ]
}

fn engine_over(items: Vec<Item>) -> (SearchEngine, Arc<MemoryItemStore>) {
    let store = Arc::new(MemoryItemStore::from_items(items));
    let engine = SearchEngine::new(
        SearchConfig::default(),
        store.clone(),
        Arc::new(HashingEmbedder::default()),
    )
    .expect("engine");
    (engine, store)
}

fn ids(results: &[pocket_search::ScoredResult]) -> Vec<&str> {
    results.iter().map(|r| r.item.id.as_str()).collect()
}

#[tokio::test]
async fn full_text_returns_both_fibonacci_items() {
    let (engine, _) = engine_over(fibonacci_items());
    let found = engine
        .search(SearchMode::FullText, "fibonacci", &TagFilter::any(), None)
        .await
        .expect("search");
    // Equal term frequency; the shorter text ranks first.
    assert_eq!(ids(&found), vec!["A", "B"]);
    assert_eq!(found[0].score, 1.0);
    assert!(found[1].score < 1.0);
}

#[tokio::test]
async fn tag_filter_keeps_only_python_item() {
    let (engine, _) = engine_over(fibonacci_items());
    let found = engine
        .search(SearchMode::FullText, "fibonacci", &TagFilter::new(["Python"]), None)
        .await
        .expect("search");
    assert_eq!(ids(&found), vec!["A"]);
}

#[tokio::test]
async fn slug_typo_suggests_nearest_slugs() {
    let (engine, _) = engine_over(fibonacci_items());
    let err = engine
        .resolve_by_slug("fibonaci", None)
        .await
        .expect_err("no slug is close enough");
    assert_eq!(
        err,
        SearchError::NotFound {
            query: "fibonaci".to_string(),
            suggestions: vec!["fibonacci-heap".to_string(), "fibonacci-generator".to_string()],
        }
    );

    let relaxed = engine
        .resolve_by_slug("fibonaci", Some(0.5))
        .await
        .expect("relaxed threshold");
    assert_eq!(relaxed.id, "B");
}

#[tokio::test]
async fn malformed_regex_is_an_invalid_query() {
    let (engine, _) = engine_over(fibonacci_items());
    let err = engine
        .search(SearchMode::Regex, "fib(", &TagFilter::any(), None)
        .await
        .expect_err("bad regex");
    assert!(matches!(err, SearchError::InvalidQuery(_)));
}

#[tokio::test]
async fn hybrid_on_empty_index_equals_lexical_plus_fuzzy_fusion() {
    let mut items = fibonacci_items();
    items.push(Item::new("C", "Binary heap: a priority queue"));
    items.push(Item::new("D", "Sourdough starter feeding schedule"));
    let (engine, _) = engine_over(items.clone());
    assert_eq!(engine.index_stats().vectors, 0);

    let query = "fibonacci heap";
    let found = engine
        .search(SearchMode::Hybrid, query, &TagFilter::any(), Some(10))
        .await
        .expect("hybrid");

    let config = SearchConfig::default();
    let lexical = LexicalMatcher::new(Arc::new(CacheManager::default()), Bm25Params::default());
    let candidates: Vec<&Item> = items.iter().collect();
    let full_text = lexical
        .rank_full_text(&candidates, query)
        .expect("fts")
        .into_iter()
        .map(|(idx, score)| (candidates[idx].id.clone(), score))
        .collect();
    let fuzzy_matcher = FuzzyMatcher::default();
    let fuzzy = items
        .iter()
        .map(|item| (item.id.clone(), fuzzy_matcher.item_score(query, item)))
        .filter(|(_, score)| *score >= config.fuzzy_threshold)
        .collect();
    let mut expected: Vec<(String, f32)> = FusionEngine::new(
        config.weights,
        config.normalization,
        config.min_total_score,
    )
    .expect("fusion")
    .fuse(FusionSignals {
        vector: Vec::new(),
        full_text,
        fuzzy,
    })
    .into_iter()
    .map(|fused| (fused.id, fused.score))
    .collect();

    let mut actual: Vec<(String, f32)> = found
        .iter()
        .map(|r| (r.item.id.clone(), r.score))
        .collect();
    expected.sort_by(|a, b| a.0.cmp(&b.0));
    actual.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(actual, expected);
    assert!(found
        .iter()
        .all(|r| !r.contributions.contains_key(&MatchSource::Vector)));
    assert_eq!(found[0].item.id, "B");
}

#[tokio::test]
async fn hybrid_keeps_every_fuzzy_only_hit() {
    let (engine, _) = engine_over(fibonacci_items());
    let found = engine
        .search(SearchMode::Hybrid, "fibonaci heap", &TagFilter::any(), None)
        .await
        .expect("hybrid");
    assert_eq!(ids(&found), vec!["B", "A"]);
    assert!(found
        .iter()
        .all(|r| r.sources().collect::<Vec<_>>() == vec![MatchSource::Fuzzy]));
    assert!(found[1].score > 0.0);
}

#[tokio::test]
async fn hybrid_uses_vector_signal_once_indexed() {
    let (engine, _) = engine_over(fibonacci_items());
    engine
        .generate_embeddings(DEFAULT_MODEL_ID)
        .await
        .expect("generate");

    let found = engine
        .search(SearchMode::Hybrid, "heap data structure", &TagFilter::any(), None)
        .await
        .expect("hybrid");
    assert_eq!(found[0].item.id, "B");
    let sources: Vec<MatchSource> = found[0].sources().collect();
    assert_eq!(
        sources,
        vec![MatchSource::FullText, MatchSource::Vector, MatchSource::Fuzzy]
    );
}

#[tokio::test]
async fn results_are_fresh_after_item_change() {
    let (engine, store) = engine_over(fibonacci_items());
    let before = engine
        .search(SearchMode::Substring, "heap", &TagFilter::any(), None)
        .await
        .expect("search");
    assert_eq!(ids(&before), vec!["B"]);

    // Without notification the cached list is served.
    store.upsert(Item::new("C", "binary heap"));
    let cached = engine
        .search(SearchMode::Substring, "heap", &TagFilter::any(), None)
        .await
        .expect("search");
    assert_eq!(ids(&cached), vec!["B"]);
    assert_eq!(engine.cache_stats().results.hits, 1);

    let report = engine
        .on_item_changed("C", ChangeKind::Added)
        .await
        .expect("notify");
    assert_eq!(report.results, 1);
    let after = engine
        .search(SearchMode::Substring, "heap", &TagFilter::any(), None)
        .await
        .expect("search");
    let mut after_ids = ids(&after);
    after_ids.sort_unstable();
    assert_eq!(after_ids, vec!["B", "C"]);
}

#[tokio::test]
async fn removal_is_visible_immediately() {
    let (engine, store) = engine_over(fibonacci_items());
    engine
        .search(SearchMode::FullText, "fibonacci", &TagFilter::any(), None)
        .await
        .expect("warm");

    store.remove("A");
    engine
        .on_item_changed("A", ChangeKind::Removed)
        .await
        .expect("notify");
    let found = engine
        .search(SearchMode::FullText, "fibonacci", &TagFilter::any(), None)
        .await
        .expect("search");
    assert_eq!(ids(&found), vec!["B"]);
    assert!(store.get_item("A").await.expect("get").is_none());
}

#[tokio::test]
async fn equal_scores_prefer_newer_items() {
    use chrono::{TimeZone, Utc};

    let old = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
    let new = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let (engine, _) = engine_over(vec![
        Item::new("a-old", "heap notes").created_at(old),
        Item::new("b-new", "heap notes").created_at(new),
        Item::new("c-new", "heap notes").created_at(new),
    ]);
    let found = engine
        .search(SearchMode::Substring, "HEAP", &TagFilter::any(), None)
        .await
        .expect("search");
    assert_eq!(ids(&found), vec!["b-new", "c-new", "a-old"]);
}
