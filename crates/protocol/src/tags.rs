use crate::item::Item;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Canonical tag spelling: lowercase, trimmed, spaces and underscores become `-`.
#[must_use]
pub fn normalize_tag(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .collect()
}

#[must_use]
pub fn normalize_tags<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|tag| normalize_tag(tag.as_ref()))
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Set of tags an item must carry (all of them) to be a search candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagFilter(BTreeSet<String>);

impl TagFilter {
    #[must_use]
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(normalize_tags(tags))
    }

    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        self.0.iter().all(|tag| item.tags.contains(tag))
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagFilter {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}
