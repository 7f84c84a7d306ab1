//! # Pocket Cache
//!
//! In-memory acceleration layer for the search core. Nothing stored here is
//! authoritative: every entry can be recomputed from the record store.
//!
//! ```text
//! CacheManager
//!     ├──> EmbeddingCache   sha256(model, text) -> vector
//!     ├──> ResultCache      query signature     -> ranked results (TTL)
//!     └──> PatternCache     glob/regex source   -> compiled matcher
//! ```
//!
//! All three sit on [`FlightCache`], a bounded LRU with optional TTL and a
//! single-flight guarantee per key.

mod config;
mod embedding;
mod error;
mod flight;
mod manager;
mod patterns;
mod results;

pub use config::CacheConfig;
pub use embedding::{Embedding, EmbeddingCache, EmbeddingKey};
pub use error::{CacheError, Result};
pub use flight::{CacheStats, FlightCache};
pub use manager::{CacheManager, CacheManagerStats, CacheScope, InvalidationReport};
pub use patterns::{PatternCache, PatternKey, PatternKind, SharedPattern, TextPattern};
pub use results::{QuerySignature, ResultCache, ResultSet};
