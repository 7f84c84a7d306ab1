use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capacities are entry counts, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub embedding_capacity: usize,
    pub embedding_ttl_secs: Option<u64>,
    pub result_capacity: usize,
    pub result_ttl_secs: Option<u64>,
    pub pattern_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_capacity: 512,
            embedding_ttl_secs: None,
            result_capacity: 1000,
            result_ttl_secs: Some(600),
            pattern_capacity: 128,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn embedding_ttl(&self) -> Option<Duration> {
        self.embedding_ttl_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn result_ttl(&self) -> Option<Duration> {
        self.result_ttl_secs.map(Duration::from_secs)
    }
}
