//! Shared data model for the pocket search core.
//!
//! Everything that crosses a crate boundary lives here: stored [`Item`]s,
//! the closed set of [`SearchMode`]s, [`Query`] descriptions and the
//! [`ScoredResult`]s every matcher produces.

mod item;
mod mode;
mod result;
mod tags;

pub use item::{slugify, ChangeKind, Item, ItemEmbedding};
pub use mode::{Query, SearchMode};
pub use result::{compare_results, sort_results, MatchSource, ScoredResult};
pub use tags::{normalize_tag, normalize_tags, TagFilter};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unsupported search mode '{0}' (expected substr, fts, glob, regex, exact, vector or hybrid)")]
    InvalidMode(String),
}
