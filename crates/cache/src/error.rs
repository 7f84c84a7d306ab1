use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Unknown cache scope '{0}' (expected embeddings, results, patterns or all)")]
    InvalidScope(String),

    #[error("Cache '{0}' lost its in-flight computation before a value was published")]
    FlightAbandoned(&'static str),
}
