use crate::tags::normalize_tags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;

const DERIVED_SLUG_WORDS: usize = 6;

/// Embedding attached to an item together with the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEmbedding {
    pub vector: Vec<f32>,
    pub model_id: String,
    pub updated: DateTime<Utc>,
}

impl ItemEmbedding {
    #[must_use]
    pub fn new(vector: Vec<f32>, model_id: impl Into<String>) -> Self {
        Self {
            vector,
            model_id: model_id.into(),
            updated: Utc::now(),
        }
    }
}

/// A stored unit of the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub created: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<ItemEmbedding>,
}

impl Item {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created: Utc::now(),
            text: text.into(),
            tags: BTreeSet::new(),
            slug: None,
            embedding: None,
        }
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    #[must_use]
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    #[must_use]
    pub const fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: ItemEmbedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Human-readable key: the explicit slug, or one derived from the leading words.
    #[must_use]
    pub fn slug(&self) -> Cow<'_, str> {
        match &self.slug {
            Some(slug) => Cow::Borrowed(slug.as_str()),
            None => Cow::Owned(slugify(&self.text)),
        }
    }

    /// Stored vector, only when it was produced by `model_id` with the expected shape.
    #[must_use]
    pub fn embedding_for(&self, model_id: &str, dimension: usize) -> Option<&[f32]> {
        self.embedding
            .as_ref()
            .filter(|e| e.model_id == model_id && e.vector.len() == dimension)
            .map(|e| e.vector.as_slice())
    }
}

/// Lowercase, hyphen-joined form of the first few alphanumeric words.
#[must_use]
pub fn slugify(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .take(DERIVED_SLUG_WORDS)
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Kind of mutation reported by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn derived_slug_uses_leading_words() {
        let item = Item::new("1", "Fibonacci heap: data structure (amortized O(1) insert)");
        assert_eq!(item.slug(), "fibonacci-heap-data-structure-amortized-o");
    }

    #[test]
    fn explicit_slug_wins() {
        let item = Item::new("1", "whatever").with_slug("fibonacci-heap");
        assert_eq!(item.slug(), "fibonacci-heap");
    }

    #[test]
    fn embedding_is_ignored_for_other_models() {
        let item = Item::new("1", "text").with_embedding(ItemEmbedding::new(vec![1.0, 0.0], "m1"));
        assert!(item.embedding_for("m1", 2).is_some());
        assert!(item.embedding_for("m2", 2).is_none());
        assert!(item.embedding_for("m1", 3).is_none());
    }

    #[test]
    fn item_roundtrips_through_json_without_optional_fields() {
        let json = r#"{"id":"a","created":"2024-01-02T03:04:05Z","text":"hello","tags":["x"]}"#;
        let item: Item = serde_json::from_str(json).unwrap();
        assert_eq!(item.slug(), "hello");
        assert!(item.embedding.is_none());
    }
}
