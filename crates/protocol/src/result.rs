use crate::item::Item;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Signal that contributed to a result's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Substring,
    FullText,
    Glob,
    Regex,
    Exact,
    Vector,
    Fuzzy,
}

impl MatchSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Substring => "substring",
            Self::FullText => "full_text",
            Self::Glob => "glob",
            Self::Regex => "regex",
            Self::Exact => "exact",
            Self::Vector => "vector",
            Self::Fuzzy => "fuzzy",
        }
    }
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub item: Item,
    /// Relevance in `[0, 1]`.
    pub score: f32,
    /// Per-signal normalized scores that produced `score`.
    pub contributions: BTreeMap<MatchSource, f32>,
}

impl ScoredResult {
    #[must_use]
    pub fn single(item: Item, source: MatchSource, score: f32) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            item,
            score,
            contributions: BTreeMap::from([(source, score)]),
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = MatchSource> + '_ {
        self.contributions.keys().copied()
    }
}

/// Descending score, then newest first, then identifier.
#[must_use]
pub fn compare_results(a: &ScoredResult, b: &ScoredResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.item.created.cmp(&a.item.created))
        .then_with(|| a.item.id.cmp(&b.item.id))
}

pub fn sort_results(results: &mut [ScoredResult]) {
    results.sort_by(compare_results);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn at(id: &str, day: u32) -> Item {
        Item::new(id, id).created_at(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap())
    }

    #[test]
    fn orders_by_score_then_recency_then_id() {
        let mut results = vec![
            ScoredResult::single(at("b", 1), MatchSource::Exact, 1.0),
            ScoredResult::single(at("a", 1), MatchSource::Exact, 1.0),
            ScoredResult::single(at("c", 5), MatchSource::Exact, 1.0),
            ScoredResult::single(at("d", 9), MatchSource::Exact, 0.5),
        ];
        sort_results(&mut results);
        let ids: Vec<_> = results.iter().map(|r| r.item.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn single_clamps_score() {
        let result = ScoredResult::single(at("a", 1), MatchSource::Vector, 1.3);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.sources().collect::<Vec<_>>(), vec![MatchSource::Vector]);
    }
}
