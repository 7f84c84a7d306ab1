use pocket_protocol::ProtocolError;
use pocket_vector_store::VectorStoreError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("{0}")]
    InvalidMode(String),

    #[error("No item matches '{query}'{}", format_suggestions(.suggestions))]
    NotFound {
        query: String,
        suggestions: Vec<String>,
    },

    #[error("Embedding computation exceeded {0:?}")]
    ComputeTimeout(Duration),

    #[error("Vector store error: {0}")]
    VectorStore(VectorStoreError),

    #[error("Unknown embedding model '{0}'")]
    UnknownModel(String),

    #[error("Item source error: {0}")]
    Source(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {})", suggestions.join(", "))
    }
}

impl From<VectorStoreError> for SearchError {
    fn from(err: VectorStoreError) -> Self {
        match err {
            VectorStoreError::ComputeTimeout(budget) => Self::ComputeTimeout(budget),
            other => Self::VectorStore(other),
        }
    }
}

impl From<ProtocolError> for SearchError {
    fn from(err: ProtocolError) -> Self {
        Self::InvalidMode(err.to_string())
    }
}
