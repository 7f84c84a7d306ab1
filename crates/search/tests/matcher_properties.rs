use pocket_search::{
    Bm25Params, CacheManager, Item, LexicalMatcher, SearchMode, TagFilter,
};
use proptest::prelude::*;
use std::sync::Arc;

fn matcher() -> LexicalMatcher {
    LexicalMatcher::new(Arc::new(CacheManager::default()), Bm25Params::default())
}

fn items_from(texts: &[String]) -> Vec<Item> {
    texts
        .iter()
        .enumerate()
        .map(|(idx, text)| Item::new(format!("item-{idx}"), text.clone()))
        .collect()
}

const WORDS: &[&str] = &["red", "green", "blue", "heap", "tree", "Heap"];

fn sentence() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(WORDS), 0..7).prop_map(|words| words.join(" "))
}

proptest! {
    #[test]
    fn exact_matches_iff_text_equal(
        texts in prop::collection::vec("[abAB ]{0,4}", 0..12),
        query in "[abAB ]{1,4}",
    ) {
        let items = items_from(&texts);
        let found = matcher()
            .match_items(&items, &query, SearchMode::Exact, &TagFilter::any())
            .unwrap();
        let mut got: Vec<String> = found.into_iter().map(|r| r.item.id).collect();
        got.sort();
        let mut expected: Vec<String> = items
            .iter()
            .filter(|item| item.text == query)
            .map(|item| item.id.clone())
            .collect();
        expected.sort();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn quoted_phrase_results_contain_the_phrase(
        texts in prop::collection::vec(sentence(), 1..10),
        first in prop::sample::select(WORDS),
        second in prop::sample::select(WORDS),
    ) {
        let items = items_from(&texts);
        let phrase = format!("{first} {second}");
        let found = matcher()
            .match_items(&items, &format!("\"{phrase}\""), SearchMode::FullText, &TagFilter::any())
            .unwrap();
        let needle = phrase.to_lowercase();
        for result in &found {
            prop_assert!(result.item.text.to_lowercase().contains(&needle));
            prop_assert!(result.score > 0.0 && result.score <= 1.0);
        }
        let expected = items
            .iter()
            .filter(|item| item.text.to_lowercase().contains(&needle))
            .count();
        prop_assert_eq!(found.len(), expected);
    }

    #[test]
    fn unquoted_terms_all_present(
        texts in prop::collection::vec(sentence(), 1..10),
        first in prop::sample::select(WORDS),
        second in prop::sample::select(WORDS),
    ) {
        let items = items_from(&texts);
        let found = matcher()
            .match_items(&items, &format!("{second} {first}"), SearchMode::FullText, &TagFilter::any())
            .unwrap();
        for result in &found {
            let words: Vec<String> = result
                .item
                .text
                .split_whitespace()
                .map(str::to_lowercase)
                .collect();
            prop_assert!(words.contains(&first.to_lowercase()));
            prop_assert!(words.contains(&second.to_lowercase()));
        }
    }
}
