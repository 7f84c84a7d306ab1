//! Tag suggestion strategies.
//!
//! [`HeuristicTagSuggester`] works from the text alone; [`ModelTagSuggester`]
//! ranks a tag vocabulary by embedding similarity and falls back to the
//! heuristic whenever the model is unavailable or has nothing to say.

use crate::error::{Result, SearchError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use pocket_protocol::normalize_tag;
use pocket_vector_store::{cosine_similarity, EmbeddingPipeline, SharedEmbedder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_TAG_VOCABULARY: &[&str] = &[
    "consciousness",
    "emergence",
    "systems-thinking",
    "ritual",
    "practice",
    "embodiment",
    "evolution",
    "cognition",
    "hyperorganism",
    "collaboration",
    "coordination",
    "symbolic",
    "language",
    "meaning",
    "intentionality",
    "agency",
    "intelligence",
    "collective",
    "network",
];

const FALLBACK_TAGS: &[&str] = &["pattern", "needs-tagging"];
const MIN_KEYWORD_LEN: usize = 4;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "about", "above", "after", "again", "also", "been", "before", "being", "below", "between",
        "both", "could", "does", "doing", "down", "during", "each", "from", "further", "have",
        "having", "here", "into", "itself", "just", "more", "most", "much", "must", "only",
        "other", "over", "same", "should", "some", "such", "than", "that", "their", "them",
        "then", "there", "these", "they", "this", "those", "through", "under", "until", "upon",
        "very", "were", "what", "when", "where", "which", "while", "will", "with", "within",
        "without", "would", "your",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSuggestion {
    pub tag: String,
    pub score: f32,
    pub reason: String,
}

#[async_trait]
pub trait TagSuggester: Send + Sync {
    fn name(&self) -> &'static str;

    /// At most `limit` tags for `text`, best first, never repeating `existing`.
    async fn suggest_tags(
        &self,
        text: &str,
        existing: &[String],
        limit: usize,
    ) -> Result<Vec<TagSuggestion>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagSuggesterKind {
    #[default]
    Heuristic,
    Model,
}

impl FromStr for TagSuggesterKind {
    type Err = SearchError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "keyword" => Ok(Self::Heuristic),
            "model" | "embedding" => Ok(Self::Model),
            other => Err(SearchError::Config(format!(
                "unknown tag suggester '{other}' (expected heuristic or model)"
            ))),
        }
    }
}

fn finish(
    mut suggestions: Vec<TagSuggestion>,
    existing: &[String],
    limit: usize,
) -> Vec<TagSuggestion> {
    let mut seen: HashSet<String> = existing.iter().map(|tag| normalize_tag(tag)).collect();
    suggestions.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.tag.cmp(&b.tag)));
    suggestions.retain(|s| !s.tag.is_empty() && seen.insert(s.tag.clone()));
    suggestions.truncate(limit);
    suggestions
}

/// Vocabulary and keyword-frequency suggestions with no model involved.
#[derive(Debug, Clone)]
pub struct HeuristicTagSuggester {
    vocabulary: Vec<String>,
}

impl Default for HeuristicTagSuggester {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_VOCABULARY.iter().copied())
    }
}

impl HeuristicTagSuggester {
    pub fn new<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            vocabulary: vocabulary
                .into_iter()
                .map(|tag| normalize_tag(tag.as_ref()))
                .filter(|tag| !tag.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn suggest(&self, text: &str, existing: &[String], limit: usize) -> Vec<TagSuggestion> {
        let words: Vec<String> = text.unicode_words().map(str::to_lowercase).collect();
        let present: HashSet<&str> = words.iter().map(String::as_str).collect();

        let mut suggestions: Vec<TagSuggestion> = self
            .vocabulary
            .iter()
            .filter(|tag| tag.split('-').all(|part| present.contains(part)))
            .map(|tag| TagSuggestion {
                tag: tag.clone(),
                score: 1.0,
                reason: "Vocabulary match".to_string(),
            })
            .collect();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for word in &words {
            if word.chars().count() >= MIN_KEYWORD_LEN
                && !STOPWORDS.contains(word.as_str())
                && !word.chars().all(|c| c.is_numeric())
            {
                *counts.entry(word.as_str()).or_insert(0) += 1;
            }
        }
        let top = counts.values().copied().max().unwrap_or(1) as f32;
        suggestions.extend(counts.into_iter().map(|(word, count)| TagSuggestion {
            tag: normalize_tag(word),
            score: 0.8 * count as f32 / top,
            reason: format!("Keyword appears {count}x"),
        }));

        let mut picked = finish(suggestions, existing, limit);
        if picked.is_empty() {
            let fallback = FALLBACK_TAGS.iter().map(|tag| TagSuggestion {
                tag: (*tag).to_string(),
                score: 0.1,
                reason: "Fallback".to_string(),
            });
            picked = finish(fallback.collect(), existing, limit);
        }
        picked
    }
}

#[async_trait]
impl TagSuggester for HeuristicTagSuggester {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn suggest_tags(
        &self,
        text: &str,
        existing: &[String],
        limit: usize,
    ) -> Result<Vec<TagSuggestion>> {
        Ok(self.suggest(text, existing, limit))
    }
}

/// Ranks the vocabulary by cosine similarity between tag and text embeddings.
///
/// The embedder is read through a [`SharedEmbedder`], so a model switch applies
/// to the next suggestion.
pub struct ModelTagSuggester {
    embedder: SharedEmbedder,
    pipeline: EmbeddingPipeline,
    vocabulary: Vec<String>,
    threshold: f32,
    fallback: HeuristicTagSuggester,
}

impl ModelTagSuggester {
    pub fn new<I, S>(embedder: SharedEmbedder, pipeline: EmbeddingPipeline, vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fallback = HeuristicTagSuggester::new(vocabulary);
        Self {
            embedder,
            pipeline,
            vocabulary: fallback.vocabulary.clone(),
            threshold: 0.3,
            fallback,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    async fn rank(&self, text: &str) -> Result<Vec<TagSuggestion>> {
        let embedder = self.embedder.current();
        let target = self.pipeline.embed_query(&embedder, text).await?;
        let mut suggestions = Vec::new();
        for tag in &self.vocabulary {
            let tag_vector = self
                .pipeline
                .embed_query(&embedder, &tag.replace('-', " "))
                .await?;
            let score = cosine_similarity(&target, &tag_vector);
            if score >= self.threshold {
                suggestions.push(TagSuggestion {
                    tag: tag.clone(),
                    score,
                    reason: format!("Semantic match: {:.0}%", score * 100.0),
                });
            }
        }
        Ok(suggestions)
    }
}

#[async_trait]
impl TagSuggester for ModelTagSuggester {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn suggest_tags(
        &self,
        text: &str,
        existing: &[String],
        limit: usize,
    ) -> Result<Vec<TagSuggestion>> {
        match self.rank(text).await {
            Ok(ranked) => {
                let picked = finish(ranked, existing, limit);
                if !picked.is_empty() {
                    return Ok(picked);
                }
                log::debug!("No vocabulary tag above {:.2}; using heuristic", self.threshold);
            }
            Err(err) => log::warn!("Model tag suggestion failed, using heuristic: {err}"),
        }
        Ok(self.fallback.suggest(text, existing, limit))
    }
}
