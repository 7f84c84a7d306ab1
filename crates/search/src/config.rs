use crate::error::{Result, SearchError};
use crate::fusion::{FusionWeights, Normalization};
use crate::lexical::Bm25Params;
use crate::tags::{TagSuggesterKind, DEFAULT_TAG_VOCABULARY};
use pocket_cache::CacheConfig;
use pocket_vector_store::{DEFAULT_DIMENSION, DEFAULT_MAX_CHARS, DEFAULT_MODEL_ID};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "POCKET_SEARCH_";

/// Tunables for the search engine and its caches.
///
/// Layered as defaults, then an optional TOML file, then `POCKET_SEARCH_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub weights: FusionWeights,
    pub normalization: Normalization,
    /// Hybrid results below this fused score are dropped.
    pub min_total_score: f32,
    /// Vector hits below this cosine similarity are dropped.
    pub vector_similarity_threshold: f32,
    /// Fuzzy hits below this similarity do not enter hybrid fusion.
    pub fuzzy_threshold: f32,
    pub vector_top_k: usize,
    pub default_limit: usize,
    pub embed_timeout_ms: u64,
    pub embedding_batch_size: usize,
    pub max_embed_chars: usize,
    /// Embed added/updated items immediately instead of waiting for bulk generation.
    pub embed_on_change: bool,
    pub slug_threshold: f32,
    pub suggestion_count: usize,
    pub model_id: String,
    pub embedding_dimension: usize,
    pub tag_suggester: TagSuggesterKind,
    pub tag_vocabulary: Vec<String>,
    pub bm25: Bm25Params,
    pub cache: CacheConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            normalization: Normalization::default(),
            min_total_score: 0.1,
            vector_similarity_threshold: 0.3,
            fuzzy_threshold: 0.5,
            vector_top_k: 100,
            default_limit: 5,
            embed_timeout_ms: 5_000,
            embedding_batch_size: 32,
            max_embed_chars: DEFAULT_MAX_CHARS,
            embed_on_change: false,
            slug_threshold: 0.8,
            suggestion_count: 5,
            model_id: DEFAULT_MODEL_ID.to_string(),
            embedding_dimension: DEFAULT_DIMENSION,
            tag_suggester: TagSuggesterKind::default(),
            tag_vocabulary: DEFAULT_TAG_VOCABULARY.iter().map(|t| (*t).to_string()).collect(),
            bm25: Bm25Params::default(),
            cache: CacheConfig::default(),
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| SearchError::Config(format!("{ENV_PREFIX}{key}='{raw}': {err}")))
}

impl SearchConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| SearchError::Config(format!("TOML parse error: {err}")))?;
        config.validate()
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SearchError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Applies overrides looked up by key suffix (`lookup("DEFAULT_LIMIT")`), then validates.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        macro_rules! set {
            ($key:literal => $($field:ident).+) => {
                if let Some(raw) = lookup($key) {
                    self.$($field).+ = parse($key, &raw)?;
                }
            };
        }

        set!("WEIGHT_VECTOR" => weights.vector);
        set!("WEIGHT_FTS" => weights.full_text);
        set!("WEIGHT_FUZZY" => weights.fuzzy);
        set!("NORMALIZATION" => normalization);
        set!("MIN_TOTAL_SCORE" => min_total_score);
        set!("VECTOR_THRESHOLD" => vector_similarity_threshold);
        set!("FUZZY_THRESHOLD" => fuzzy_threshold);
        set!("VECTOR_TOP_K" => vector_top_k);
        set!("DEFAULT_LIMIT" => default_limit);
        set!("EMBED_TIMEOUT_MS" => embed_timeout_ms);
        set!("EMBED_BATCH_SIZE" => embedding_batch_size);
        set!("EMBED_ON_CHANGE" => embed_on_change);
        set!("SLUG_THRESHOLD" => slug_threshold);
        set!("SUGGESTION_COUNT" => suggestion_count);
        set!("MODEL_ID" => model_id);
        set!("EMBEDDING_DIMENSION" => embedding_dimension);
        set!("TAG_SUGGESTER" => tag_suggester);
        set!("EMBEDDING_CACHE_CAPACITY" => cache.embedding_capacity);
        set!("RESULT_CACHE_CAPACITY" => cache.result_capacity);
        if let Some(raw) = lookup("RESULT_TTL_SECS") {
            let secs: u64 = parse("RESULT_TTL_SECS", &raw)?;
            self.cache.result_ttl_secs = (secs > 0).then_some(secs);
        }
        self.validate()
    }

    /// Checks ranges and rescales the fusion weights to sum to 1.
    pub fn validate(mut self) -> Result<Self> {
        self.weights = self.weights.normalized()?;
        for (name, value) in [
            ("min_total_score", self.min_total_score),
            ("vector_similarity_threshold", self.vector_similarity_threshold),
            ("fuzzy_threshold", self.fuzzy_threshold),
            ("slug_threshold", self.slug_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SearchError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.embedding_dimension == 0 {
            return Err(SearchError::Config("embedding_dimension must be positive".to_string()));
        }
        if self.model_id.trim().is_empty() {
            return Err(SearchError::Config("model_id must not be empty".to_string()));
        }
        self.default_limit = self.default_limit.max(1);
        self.vector_top_k = self.vector_top_k.max(1);
        self.embedding_batch_size = self.embedding_batch_size.max(1);
        Ok(self)
    }

    #[must_use]
    pub const fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SearchConfig::default().validate().unwrap();
        assert_eq!(config.default_limit, 5);
        assert_eq!(config.embed_timeout(), Duration::from_secs(5));
        assert_eq!(config.cache.result_ttl(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
normalization = "rank"
default_limit = 10
tag_suggester = "model"

[weights]
vector = 0.0
full_text = 3.0
fuzzy = 1.0

[cache]
result_ttl_secs = 30
"#
        )
        .unwrap();

        let config = SearchConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.normalization, Normalization::Rank);
        assert_eq!(config.default_limit, 10);
        assert_eq!(config.tag_suggester, TagSuggesterKind::Model);
        assert_eq!(config.weights.full_text, 0.75);
        assert_eq!(config.cache.result_ttl_secs, Some(30));
        assert_eq!(config.cache.result_capacity, 1000);
    }

    #[test]
    fn overrides_apply_and_validate() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DEFAULT_LIMIT", "20"),
            ("NORMALIZATION", "max"),
            ("RESULT_TTL_SECS", "0"),
            ("EMBED_ON_CHANGE", "true"),
        ]);
        let config = SearchConfig::default()
            .apply_overrides(|key| env.get(key).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.default_limit, 20);
        assert_eq!(config.normalization, Normalization::Max);
        assert_eq!(config.cache.result_ttl_secs, None);
        assert!(config.embed_on_change);
    }

    #[test]
    fn bad_values_are_config_errors() {
        let bad_number = SearchConfig::default()
            .apply_overrides(|key| (key == "VECTOR_TOP_K").then(|| "many".to_string()));
        assert!(matches!(bad_number, Err(SearchError::Config(_))));

        assert!(SearchConfig::from_toml_str("slug_threshold = 1.5").is_err());
        assert!(SearchConfig::from_toml_str("[weights]\nvector = -1.0").is_err());
        assert!(SearchConfig::from_toml_file(Path::new("/nonexistent/pocket.toml")).is_err());
    }
}
