//! Edit-distance similarity scores in `[0, 1]`, all case-insensitive.

use pocket_protocol::Item;
use std::collections::BTreeSet;
use unicode_segmentation::UnicodeSegmentation;

/// Levenshtein distance over chars, keeping two rows instead of the full matrix.
#[must_use]
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1) // deletion
                .min(curr[j] + 1) // insertion
                .min(prev[j] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn lower_chars(s: &str) -> Vec<char> {
    s.chars().flat_map(char::to_lowercase).collect()
}

fn char_ratio(a: &[char], b: &[char]) -> f32 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / longest as f32
}

/// Whole-string similarity: `1 - distance / longer_length`.
#[must_use]
pub fn ratio(a: &str, b: &str) -> f32 {
    char_ratio(&lower_chars(a), &lower_chars(b))
}

/// Fewest edits turning `short` into some substring of `long`.
///
/// Same two-row table as [`levenshtein`], but the first row is all zeros so the
/// match may start anywhere, and the answer is the minimum of the last row.
/// Runs in `O(short * long)`.
fn substring_distance(short: &[char], long: &[char]) -> usize {
    let mut prev = vec![0usize; long.len() + 1];
    let mut curr = vec![0usize; long.len() + 1];
    for (i, cs) in short.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cl) in long.iter().enumerate() {
            let cost = usize::from(cs != cl);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev.into_iter().min().unwrap_or(short.len())
}

/// How well the shorter string fits inside the longer: `1 - edits / shorter_length`,
/// where the edits are made against the best-matching substring of the longer.
#[must_use]
pub fn partial_ratio(a: &str, b: &str) -> f32 {
    let (a, b) = (lower_chars(a), lower_chars(b));
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return if long.is_empty() { 1.0 } else { 0.0 };
    }
    1.0 - substring_distance(&short, &long) as f32 / short.len() as f32
}

/// Word-set similarity, insensitive to word order and repetition.
#[must_use]
pub fn token_set_ratio(a: &str, b: &str) -> f32 {
    let words = |s: &str| -> BTreeSet<String> { s.unicode_words().map(str::to_lowercase).collect() };
    let (wa, wb) = (words(a), words(b));
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }

    let common: Vec<&str> = wa.intersection(&wb).map(String::as_str).collect();
    let only_a: Vec<&str> = wa.difference(&wb).map(String::as_str).collect();
    let only_b: Vec<&str> = wb.difference(&wa).map(String::as_str).collect();
    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 1.0;
    }

    let base = common.join(" ");
    let join = |rest: &[&str]| {
        if base.is_empty() {
            rest.join(" ")
        } else {
            format!("{base} {}", rest.join(" "))
        }
    };
    let with_a = join(&only_a);
    let with_b = join(&only_b);
    ratio(&base, &with_a)
        .max(ratio(&base, &with_b))
        .max(ratio(&with_a, &with_b))
}

/// Approximate string matcher used for slug lookup and as a fusion signal.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    /// Only this many leading chars of an item's text are compared.
    text_window: usize,
    /// Queries are cut to this many chars before item scoring.
    query_window: usize,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            text_window: 1000,
            query_window: 128,
        }
    }
}

impl FuzzyMatcher {
    #[must_use]
    pub fn new(text_window: usize) -> Self {
        Self {
            text_window: text_window.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query_window(mut self, query_window: usize) -> Self {
        self.query_window = query_window.max(1);
        self
    }

    #[must_use]
    pub fn score(&self, query: &str, candidate: &str) -> f32 {
        ratio(query, candidate)
    }

    /// Best of partial and word-set similarity against the item's text and slug.
    #[must_use]
    pub fn item_score(&self, query: &str, item: &Item) -> f32 {
        let query: String = query.chars().take(self.query_window).collect();
        let query = query.as_str();
        let text: String = item.text.chars().take(self.text_window).collect();
        let slug = item.slug();
        [text.as_str(), &*slug]
            .into_iter()
            .map(|target| partial_ratio(query, target).max(token_set_ratio(query, target)))
            .fold(0.0, f32::max)
    }

    /// Candidates scoring at least `threshold` by [`ratio`], best first, ties by name.
    pub fn rank<'a, I>(&self, query: &str, candidates: I, threshold: f32, limit: usize) -> Vec<(&'a str, f32)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut scored: Vec<(&str, f32)> = candidates
            .into_iter()
            .map(|candidate| (candidate, self.score(query, candidate)))
            .filter(|(_, score)| *score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored.truncate(limit);
        scored
    }
}
