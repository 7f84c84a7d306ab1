use crate::tags::TagFilter;
use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of retrieval strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Substring,
    FullText,
    Glob,
    Regex,
    Exact,
    Vector,
    Hybrid,
}

impl SearchMode {
    pub const ALL: [Self; 7] = [
        Self::Substring,
        Self::FullText,
        Self::Glob,
        Self::Regex,
        Self::Exact,
        Self::Vector,
        Self::Hybrid,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Substring => "substr",
            Self::FullText => "fts",
            Self::Glob => "glob",
            Self::Regex => "regex",
            Self::Exact => "exact",
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
        }
    }

    /// Modes answered by the lexical matcher alone.
    #[must_use]
    pub const fn is_lexical(self) -> bool {
        !matches!(self, Self::Vector | Self::Hybrid)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = ProtocolError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "substr" | "substring" => Ok(Self::Substring),
            "fts" | "full_text" | "full-text" | "fulltext" => Ok(Self::FullText),
            "glob" => Ok(Self::Glob),
            "regex" => Ok(Self::Regex),
            "exact" => Ok(Self::Exact),
            "vector" | "semantic" => Ok(Self::Vector),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(ProtocolError::InvalidMode(raw.to_string())),
        }
    }
}

/// A search request as received from the dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub mode: SearchMode,
    pub text: String,
    #[serde(default)]
    pub tags: TagFilter,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(mode: SearchMode, text: impl Into<String>) -> Self {
        Self {
            mode,
            text: text.into(),
            tags: TagFilter::any(),
            limit: None,
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: TagFilter) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}
