use crate::error::{Result, SearchError};
use globset::{GlobBuilder, GlobMatcher};
use pocket_cache::{CacheManager, PatternKind, SharedPattern, TextPattern};
use pocket_protocol::{Item, MatchSource, ScoredResult, SearchMode, TagFilter};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Lowercased words, the unit of full-text matching.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FullTextQuery {
    /// `"..."`: words must appear contiguously and in order.
    Phrase { terms: Vec<String>, text: String },
    /// Bare words: all must appear, in any order.
    Terms(Vec<String>),
}

impl FullTextQuery {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let quoted = trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"');
        if quoted {
            let inner = trimmed[1..trimmed.len() - 1].trim();
            let terms = tokenize(inner);
            if terms.is_empty() {
                return Err(SearchError::InvalidQuery("empty phrase".to_string()));
            }
            return Ok(Self::Phrase {
                terms,
                text: collapse_lower(inner),
            });
        }

        let mut seen = HashSet::new();
        let terms: Vec<String> = tokenize(trimmed)
            .into_iter()
            .filter(|term| seen.insert(term.clone()))
            .collect();
        if terms.is_empty() {
            return Err(SearchError::InvalidQuery(format!(
                "full-text query '{raw}' has no searchable words"
            )));
        }
        Ok(Self::Terms(terms))
    }

    #[must_use]
    pub fn terms(&self) -> &[String] {
        match self {
            Self::Phrase { terms, .. } | Self::Terms(terms) => terms,
        }
    }

    fn matches(&self, text: &str, tokens: &[String]) -> bool {
        match self {
            Self::Phrase { terms, text: phrase } => {
                tokens.windows(terms.len()).any(|window| window == terms.as_slice())
                    && collapse_lower(text).contains(phrase.as_str())
            }
            Self::Terms(terms) => terms.iter().all(|term| tokens.contains(term)),
        }
    }
}

fn collapse_lower(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Corpus statistics over the candidate set of one query.
struct Bm25Corpus {
    params: Bm25Params,
    doc_freq: HashMap<String, usize>,
    total_docs: f32,
    avg_len: f32,
}

impl Bm25Corpus {
    fn build(params: Bm25Params, docs: &[Vec<String>]) -> Self {
        let mut doc_freq = HashMap::new();
        let mut total_len = 0usize;
        for tokens in docs {
            total_len += tokens.len();
            let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
            for token in unique {
                *doc_freq.entry(token.to_string()).or_insert(0) += 1;
            }
        }
        let doc_count = docs.len().max(1);
        Self {
            params,
            doc_freq,
            total_docs: doc_count as f32,
            avg_len: total_len as f32 / doc_count as f32,
        }
    }

    fn score(&self, tokens: &[String], terms: &[String]) -> f32 {
        let dl = tokens.len() as f32;
        let mut score = 0.0;
        for term in terms {
            let freq = tokens.iter().filter(|token| *token == term).count() as f32;
            if freq <= 0.0 {
                continue;
            }
            let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
            let idf = ((self.total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = freq
                + self.params.k1
                    * (1.0 - self.params.b + self.params.b * dl / self.avg_len.max(1e-3));
            if denom > 0.0 {
                score += idf * (freq * (self.params.k1 + 1.0)) / denom;
            }
        }
        score
    }
}

struct RegexPattern(Regex);

impl TextPattern for RegexPattern {
    fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

struct GlobPattern(GlobMatcher);

impl TextPattern for GlobPattern {
    fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

/// Substring, exact, glob, regex and ranked full-text matching over a caller-supplied item set.
pub struct LexicalMatcher {
    caches: Arc<CacheManager>,
    bm25: Bm25Params,
}

impl LexicalMatcher {
    #[must_use]
    pub fn new(caches: Arc<CacheManager>, bm25: Bm25Params) -> Self {
        Self { caches, bm25 }
    }

    /// Items passing `tags` that match `query` under `mode`.
    ///
    /// Pattern and equality modes score 1.0; full-text scores are BM25
    /// normalized against the best match. Results are unsorted.
    pub fn match_items(
        &self,
        items: &[Item],
        query: &str,
        mode: SearchMode,
        tags: &TagFilter,
    ) -> Result<Vec<ScoredResult>> {
        let candidates: Vec<&Item> = items.iter().filter(|item| tags.matches(item)).collect();
        let binary = |source: MatchSource, hit: &dyn Fn(&Item) -> bool| -> Vec<ScoredResult> {
            candidates
                .iter()
                .filter(|item| hit(item))
                .map(|item| ScoredResult::single((*item).clone(), source, 1.0))
                .collect()
        };

        let results = match mode {
            SearchMode::Substring => {
                let needle = query.to_lowercase();
                binary(MatchSource::Substring, &|item| {
                    item.text.to_lowercase().contains(&needle)
                })
            }
            SearchMode::Exact => binary(MatchSource::Exact, &|item| item.text == query),
            SearchMode::Glob => {
                let pattern = self.pattern(PatternKind::Glob, query)?;
                binary(MatchSource::Glob, &|item| pattern.is_match(&item.text))
            }
            SearchMode::Regex => {
                let pattern = self.pattern(PatternKind::Regex, query)?;
                binary(MatchSource::Regex, &|item| pattern.is_match(&item.text))
            }
            SearchMode::FullText => self
                .rank_full_text(&candidates, query)?
                .into_iter()
                .map(|(idx, score)| {
                    ScoredResult::single(candidates[idx].clone(), MatchSource::FullText, score)
                })
                .collect(),
            SearchMode::Vector | SearchMode::Hybrid => {
                return Err(SearchError::InvalidMode(format!(
                    "'{mode}' is not a lexical search mode"
                )));
            }
        };
        log::debug!("Lexical {mode} '{query}': {} matches", results.len());
        Ok(results)
    }

    /// `(index into candidates, score)` for every full-text match, best scoring 1.0.
    pub fn rank_full_text(&self, candidates: &[&Item], query: &str) -> Result<Vec<(usize, f32)>> {
        let parsed = FullTextQuery::parse(query)?;
        let docs: Vec<Vec<String>> = candidates.iter().map(|item| tokenize(&item.text)).collect();
        let corpus = Bm25Corpus::build(self.bm25, &docs);

        let mut scored: Vec<(usize, f32)> = docs
            .iter()
            .enumerate()
            .filter(|(idx, tokens)| parsed.matches(&candidates[*idx].text, tokens))
            .map(|(idx, tokens)| (idx, corpus.score(tokens, parsed.terms())))
            .collect();

        let best = scored.iter().map(|(_, score)| *score).fold(0.0f32, f32::max);
        for (_, score) in &mut scored {
            *score = if best > 0.0 { *score / best } else { 1.0 };
        }
        Ok(scored)
    }

    fn pattern(&self, kind: PatternKind, source: &str) -> Result<SharedPattern> {
        self.caches
            .patterns()
            .get_or_compile(kind, source, |source| compile(kind, source))
    }
}

fn compile(kind: PatternKind, source: &str) -> Result<SharedPattern> {
    match kind {
        // Anchored and case-sensitive, `*` also crosses `/`.
        PatternKind::Glob => GlobBuilder::new(source)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map(|glob| Arc::new(GlobPattern(glob.compile_matcher())) as SharedPattern)
            .map_err(|err| SearchError::InvalidQuery(format!("invalid glob '{source}': {err}"))),
        PatternKind::Regex => RegexBuilder::new(source)
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map(|regex| Arc::new(RegexPattern(regex)) as SharedPattern)
            .map_err(|err| SearchError::InvalidQuery(format!("invalid regex '{source}': {err}"))),
    }
}
