use crate::flight::{CacheStats, FlightCache};
use std::sync::Arc;

/// A compiled text predicate (glob, regex) that can be shared across searches.
pub trait TextPattern: Send + Sync {
    fn is_match(&self, text: &str) -> bool;
}

pub type SharedPattern = Arc<dyn TextPattern>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Glob,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub kind: PatternKind,
    pub source: String,
}

/// Memoizes compiled patterns so repeated pattern searches skip compilation.
pub struct PatternCache {
    store: FlightCache<PatternKey, SharedPattern>,
}

impl PatternCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            store: FlightCache::new("patterns", capacity, None),
        }
    }

    pub fn get_or_compile<E>(
        &self,
        kind: PatternKind,
        source: &str,
        compile: impl FnOnce(&str) -> Result<SharedPattern, E>,
    ) -> Result<SharedPattern, E> {
        let key = PatternKey {
            kind,
            source: source.to_string(),
        };
        self.store.get_or_insert_with(key, || compile(source))
    }

    pub fn clear(&self) -> usize {
        self.store.clear()
    }

    pub fn close(&self) {
        self.store.close();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Prefix(String);

    impl TextPattern for Prefix {
        fn is_match(&self, text: &str) -> bool {
            text.starts_with(&self.0)
        }
    }

    #[test]
    fn compiles_each_pattern_once_per_kind() {
        let cache = PatternCache::new(4);
        let mut compiled = 0;
        for _ in 0..3 {
            let pattern = cache
                .get_or_compile(PatternKind::Glob, "fib", |source| {
                    compiled += 1;
                    Ok::<SharedPattern, ()>(Arc::new(Prefix(source.to_string())))
                })
                .unwrap();
            assert!(pattern.is_match("fibonacci"));
        }
        assert_eq!(compiled, 1);

        cache
            .get_or_compile(PatternKind::Regex, "fib", |source| {
                compiled += 1;
                Ok::<SharedPattern, ()>(Arc::new(Prefix(source.to_string())))
            })
            .unwrap();
        assert_eq!(compiled, 2);
        assert_eq!(cache.stats().hits, 2);
    }
}
