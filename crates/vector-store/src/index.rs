use crate::error::{Result, VectorStoreError};
use ndarray::Array1;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Immutable view of the index served to queries.
#[derive(Clone, Debug)]
pub struct IndexSnapshot {
    model_id: String,
    dimension: usize,
    /// Unit-length vectors, so cosine similarity is a dot product.
    vectors: HashMap<String, Array1<f32>>,
}

impl IndexSnapshot {
    fn empty(model_id: &str, dimension: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dimension,
            vectors: HashMap::new(),
        }
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual == self.dimension {
            Ok(())
        } else {
            Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual,
            })
        }
    }

    fn rank(&self, query: &Array1<f32>, k: usize, keep: impl Fn(&str) -> bool) -> Vec<(String, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .filter(|(id, _)| keep(id))
            .map(|(id, vector)| (id.clone(), query.dot(vector).clamp(-1.0, 1.0)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub model_id: String,
    pub dimension: usize,
    pub vectors: usize,
}

/// Exact cosine-similarity index (brute force; a personal corpus stays small).
///
/// Readers clone the current `Arc<IndexSnapshot>` and never block each other.
/// Writers go through `gate`, so a rebuild and incremental updates cannot
/// interleave; a rebuild assembles the new snapshot off to the side and
/// swaps it in, so queries see either the old or the new index.
pub struct VectorIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    gate: Mutex<()>,
}

impl VectorIndex {
    #[must_use]
    pub fn new(model_id: &str, dimension: usize) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::empty(model_id, dimension))),
            gate: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self, apply: impl FnOnce(&mut IndexSnapshot) -> Result<bool>) -> Result<bool> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        apply(Arc::make_mut(&mut guard))
    }

    /// Inserts or replaces the vector for `id`.
    pub fn upsert(&self, id: &str, vector: &[f32]) -> Result<()> {
        let result = self.write(|snapshot| {
            snapshot.check_dimension(vector.len())?;
            snapshot.vectors.insert(id.to_string(), to_unit(vector));
            Ok(true)
        });
        if let Err(err) = &result {
            log::warn!("Rejected vector for {id}: {err}");
        }
        result.map(|_| ())
    }

    /// Like [`Self::upsert`], but also requires the vector to come from the index's model.
    pub fn upsert_embedding(&self, id: &str, model_id: &str, vector: &[f32]) -> Result<()> {
        let expected = self.snapshot().model_id().to_string();
        if expected != model_id {
            return Err(VectorStoreError::ModelMismatch {
                expected,
                actual: model_id.to_string(),
            });
        }
        self.upsert(id, vector)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.write(|snapshot| Ok(snapshot.vectors.remove(id).is_some()))
            .unwrap_or(false)
    }

    /// At most `k` ids by non-increasing similarity, ties by id.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.query_filtered(vector, k, |_| true)
    }

    /// Same as [`Self::query`] restricted to ids accepted by `keep`.
    pub fn query_filtered(
        &self,
        vector: &[f32],
        k: usize,
        keep: impl Fn(&str) -> bool,
    ) -> Result<Vec<(String, f32)>> {
        let snapshot = self.snapshot();
        snapshot.check_dimension(vector.len())?;
        Ok(snapshot.rank(&to_unit(vector), k, keep))
    }

    /// Replaces the whole index. Entries of the wrong dimension are skipped.
    pub fn rebuild<I>(&self, model_id: &str, dimension: usize, entries: I) -> RebuildReport
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = IndexSnapshot::empty(model_id, dimension);
        let mut report = RebuildReport::default();
        for (id, vector) in entries {
            if vector.len() == dimension {
                next.vectors.insert(id, to_unit(&vector));
                report.indexed += 1;
            } else {
                log::warn!(
                    "Skipping {id} during rebuild: dimension {} != {dimension}",
                    vector.len()
                );
                report.skipped += 1;
            }
        }
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        log::info!(
            "Vector index rebuilt for {model_id}: {} indexed, {} skipped",
            report.indexed,
            report.skipped
        );
        report
    }

    /// Empties the index and switches it to a new model.
    pub fn reset(&self, model_id: &str, dimension: usize) {
        self.rebuild(model_id, dimension, std::iter::empty());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let snapshot = self.snapshot();
        IndexStats {
            model_id: snapshot.model_id.clone(),
            dimension: snapshot.dimension,
            vectors: snapshot.len(),
        }
    }
}

fn to_unit(vector: &[f32]) -> Array1<f32> {
    let array = Array1::from_vec(vector.to_vec());
    let norm = array.dot(&array).sqrt();
    if norm > 0.0 {
        array / norm
    } else {
        array
    }
}
