use crate::error::{Result, SearchError};
use pocket_protocol::MatchSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Relative weight of each hybrid signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub vector: f32,
    pub full_text: f32,
    pub fuzzy: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.4,
            full_text: 0.4,
            fuzzy: 0.2,
        }
    }
}

impl FusionWeights {
    /// Rescales the weights to sum to 1.
    pub fn normalized(self) -> Result<Self> {
        let all = [self.vector, self.full_text, self.fuzzy];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SearchError::Config(format!(
                "fusion weights must be finite and non-negative, got {self:?}"
            )));
        }
        let total: f32 = all.iter().sum();
        if total <= 0.0 {
            return Err(SearchError::Config(
                "at least one fusion weight must be positive".to_string(),
            ));
        }
        Ok(Self {
            vector: self.vector / total,
            full_text: self.full_text / total,
            fuzzy: self.fuzzy / total,
        })
    }
}

/// How a signal's raw scores are mapped into `[0, 1]` before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `(s - min) / (max - min)` rescaled onto `[MIN_MAX_FLOOR, 1]`, so the
    /// weakest member of a list still counts.
    #[default]
    MinMax,
    /// `s / max`.
    Max,
    /// `1 - rank / n`, ignoring score magnitudes.
    Rank,
}

impl Normalization {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MinMax => "min_max",
            Self::Max => "max",
            Self::Rank => "rank",
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Normalization {
    type Err = SearchError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "min_max" | "minmax" => Ok(Self::MinMax),
            "max" => Ok(Self::Max),
            "rank" => Ok(Self::Rank),
            other => Err(SearchError::Config(format!(
                "unknown normalization '{other}' (expected min_max, max or rank)"
            ))),
        }
    }
}

/// Score given to the weakest entry of a list under [`Normalization::MinMax`].
pub const MIN_MAX_FLOOR: f32 = 0.5;

/// Normalizes one signal's scores in place.
///
/// A list whose scores are all equal (including a single entry) maps to 1.0:
/// being the only or an equally good match is full credit for that signal.
pub fn normalize_scores(scores: &mut [(String, f32)], method: Normalization) {
    if scores.is_empty() {
        return;
    }
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (_, s)| {
            (lo.min(*s), hi.max(*s))
        });
    if (max - min).abs() <= f32::EPSILON {
        for (_, score) in scores.iter_mut() {
            *score = 1.0;
        }
        return;
    }

    match method {
        Normalization::MinMax => {
            for (_, score) in scores.iter_mut() {
                let unit = (*score - min) / (max - min);
                *score = MIN_MAX_FLOOR + (1.0 - MIN_MAX_FLOOR) * unit;
            }
        }
        Normalization::Max => {
            for (_, score) in scores.iter_mut() {
                *score = if max > 0.0 { (*score / max).max(0.0) } else { 0.0 };
            }
        }
        Normalization::Rank => {
            scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let n = scores.len() as f32;
            for (rank, (_, score)) in scores.iter_mut().enumerate() {
                *score = 1.0 - rank as f32 / n;
            }
        }
    }
}

/// Raw per-signal scores keyed by item id. Absent ids contribute 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionSignals {
    pub vector: Vec<(String, f32)>,
    pub full_text: Vec<(String, f32)>,
    pub fuzzy: Vec<(String, f32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    pub id: String,
    pub score: f32,
    pub contributions: BTreeMap<MatchSource, f32>,
}

/// Weighted-sum merge of the vector, full-text and fuzzy signals.
#[derive(Debug, Clone)]
pub struct FusionEngine {
    weights: FusionWeights,
    normalization: Normalization,
    min_total_score: f32,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            normalization: Normalization::default(),
            min_total_score: 0.1,
        }
    }
}

impl FusionEngine {
    pub fn new(
        weights: FusionWeights,
        normalization: Normalization,
        min_total_score: f32,
    ) -> Result<Self> {
        Ok(Self {
            weights: weights.normalized()?,
            normalization,
            min_total_score: min_total_score.clamp(0.0, 1.0),
        })
    }

    #[must_use]
    pub const fn weights(&self) -> FusionWeights {
        self.weights
    }

    /// Merged scores at or above `min_total_score`, best first, ties by id.
    ///
    /// Every id present in some signal list is a candidate; only the total floor drops it.
    ///
    /// Contributions record each signal's normalized score, not its weighted share.
    #[must_use]
    pub fn fuse(&self, signals: FusionSignals) -> Vec<FusedScore> {
        let FusionSignals {
            mut vector,
            mut full_text,
            mut fuzzy,
        } = signals;

        let mut merged: HashMap<String, FusedScore> = HashMap::new();
        for (source, weight, list) in [
            (MatchSource::Vector, self.weights.vector, &mut vector),
            (MatchSource::FullText, self.weights.full_text, &mut full_text),
            (MatchSource::Fuzzy, self.weights.fuzzy, &mut fuzzy),
        ] {
            normalize_scores(list, self.normalization);
            for (id, score) in list.drain(..) {
                let entry = merged.entry(id.clone()).or_insert_with(|| FusedScore {
                    id,
                    score: 0.0,
                    contributions: BTreeMap::new(),
                });
                entry.score += weight * score;
                if score > 0.0 {
                    entry.contributions.insert(source, score);
                }
            }
        }

        let mut fused: Vec<FusedScore> = merged
            .into_values()
            .filter(|f| f.score + f32::EPSILON >= self.min_total_score)
            .map(|mut f| {
                f.score = f.score.clamp(0.0, 1.0);
                f
            })
            .collect();
        fused.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        log::debug!(
            "Fused {} results (weights v={:.2} f={:.2} z={:.2}, {})",
            fused.len(),
            self.weights.vector,
            self.weights.full_text,
            self.weights.fuzzy,
            self.normalization
        );
        fused
    }
}
