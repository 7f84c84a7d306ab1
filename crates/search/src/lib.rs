//! # Pocket Search
//!
//! Multi-modal retrieval over a personal knowledge base.
//!
//! ```text
//! SearchEngine::search(mode, text, tags, limit)
//!     │
//!     ├──> ResultCache (hit: done)
//!     │
//!     └──> ItemSource::list_items(tags)
//!            ├─ substr / exact / glob / regex / fts ──> LexicalMatcher
//!            ├─ vector ──> EmbeddingPipeline ──> VectorIndex
//!            └─ hybrid ──> vector + BM25 + fuzzy ──> FusionEngine
//! ```
//!
//! Item mutations reach the engine through [`SearchEngine::on_item_changed`],
//! which invalidates cached state before touching the vector index.

mod config;
mod engine;
mod error;
mod fusion;
mod fuzzy;
mod lexical;
mod slug;
mod source;
mod tags;

pub use config::{SearchConfig, ENV_PREFIX};
pub use engine::{GenerationReport, SearchEngine};
pub use error::{Result, SearchError};
pub use fusion::{
    normalize_scores, FusedScore, FusionEngine, FusionSignals, FusionWeights, Normalization,
    MIN_MAX_FLOOR,
};
pub use fuzzy::{levenshtein, partial_ratio, ratio, token_set_ratio, FuzzyMatcher};
pub use lexical::{tokenize, Bm25Params, FullTextQuery, LexicalMatcher};
pub use slug::{resolve_slug, SlugMatch};
pub use source::{ItemSource, MemoryItemStore};
pub use tags::{
    HeuristicTagSuggester, ModelTagSuggester, TagSuggester, TagSuggesterKind, TagSuggestion,
    DEFAULT_TAG_VOCABULARY,
};

pub use pocket_cache::{CacheManager, CacheManagerStats, CacheScope, InvalidationReport};
pub use pocket_protocol::{ChangeKind, Item, MatchSource, Query, ScoredResult, SearchMode, TagFilter};
pub use pocket_vector_store::{
    Embedder, HashingEmbedder, IndexStats, RebuildReport, SharedEmbedder, DEFAULT_DIMENSION,
    DEFAULT_MODEL_ID,
};
