use crate::error::{Result, SearchError};
use crate::fuzzy::ratio;
use pocket_protocol::Item;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlugMatch {
    pub item: Item,
    pub similarity: f32,
    /// Matched the id or slug verbatim (ignoring case) rather than fuzzily.
    pub exact: bool,
}

/// Looks up an item by human-readable key.
///
/// Tries the exact id, then the slug ignoring case, then the most similar
/// slug at or above `threshold`. Failing all three, the error carries up to
/// `suggestions` nearest slugs, most similar first.
pub fn resolve_slug(
    query: &str,
    items: &[Item],
    threshold: f32,
    suggestions: usize,
) -> Result<SlugMatch> {
    let query = query.trim();
    if query.is_empty() {
        return Err(SearchError::InvalidQuery("slug lookup needs a non-empty key".to_string()));
    }

    if let Some(item) = items.iter().find(|item| item.id == query) {
        return Ok(SlugMatch {
            item: item.clone(),
            similarity: 1.0,
            exact: true,
        });
    }
    if let Some(item) = items.iter().find(|item| item.slug().eq_ignore_ascii_case(query)) {
        return Ok(SlugMatch {
            item: item.clone(),
            similarity: 1.0,
            exact: true,
        });
    }

    let mut scored: Vec<(f32, String, &Item)> = items
        .iter()
        .map(|item| {
            let slug = item.slug().into_owned();
            (ratio(query, &slug), slug, item)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    if let Some((similarity, slug, item)) = scored.first() {
        if *similarity >= threshold {
            log::debug!("Resolved '{query}' to slug '{slug}' ({similarity:.3})");
            return Ok(SlugMatch {
                item: (*item).clone(),
                similarity: *similarity,
                exact: false,
            });
        }
    }

    let mut seen = HashSet::new();
    let nearest: Vec<String> = scored
        .into_iter()
        .filter(|(similarity, _, _)| *similarity > 0.0)
        .map(|(_, slug, _)| slug)
        .filter(|slug| seen.insert(slug.clone()))
        .take(suggestions)
        .collect();
    log::debug!("No slug matches '{query}'; {} suggestions", nearest.len());
    Err(SearchError::NotFound {
        query: query.to_string(),
        suggestions: nearest,
    })
}
