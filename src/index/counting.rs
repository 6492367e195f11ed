//! Dry-run index that counts what it is given and keeps no vectors.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::json;

use super::memory::{lock, LocalCatalog};
use super::{IndexDescription, IndexError, IndexSpec, VectorIndex};
use crate::record::UpsertUnit;

/// Accepts every upsert and records only counts. Distinct ids are tracked so
/// the reported total matches overwrite-by-id semantics; memory grows with
/// the number of ids, never with vector data.
#[derive(Debug, Default)]
pub struct CountingIndex {
    catalog: LocalCatalog,
    ids: Mutex<HashSet<String>>,
    dimension: AtomicUsize,
    upserted: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl CountingIndex {
    /// Empty index service with no indexes defined.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct vector ids received.
    pub fn len(&self) -> usize {
        lock(&self.ids).len()
    }

    /// Whether nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total vectors received across all upserts, repeats included.
    pub fn upserted(&self) -> usize {
        self.upserted.load(Ordering::Relaxed)
    }

    /// How many non-empty upserts have been received.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::Relaxed)
    }
}

impl VectorIndex for CountingIndex {
    fn list_indexes(&self) -> Result<Vec<IndexDescription>, IndexError> {
        Ok(self.catalog.list())
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        self.catalog.create(spec)
    }

    fn describe_index(&self, name: &str) -> Result<IndexDescription, IndexError> {
        self.catalog.describe(name)
    }

    fn upsert(&self, units: &[UpsertUnit]) -> Result<usize, IndexError> {
        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        self.upserted.fetch_add(units.len(), Ordering::Relaxed);
        if let Some(unit) = units.first() {
            self.dimension.store(unit.values.len(), Ordering::Relaxed);
        }
        let mut ids = lock(&self.ids);
        for unit in units {
            ids.insert(unit.id.to_string());
        }
        Ok(units.len())
    }

    fn describe_index_stats(&self) -> Result<serde_json::Value, IndexError> {
        let dimension = match self.dimension.load(Ordering::Relaxed) {
            0 => None,
            dim => Some(dim),
        };
        Ok(json!({
            "dimension": dimension,
            "totalVectorCount": self.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Metric;
    use crate::record::{Metadata, RecordId};
    use pretty_assertions::assert_eq;

    fn unit(id: &str) -> UpsertUnit {
        UpsertUnit {
            id: RecordId::from(id),
            values: vec![0.5; 4],
            metadata: Metadata {
                title: id.into(),
                year: String::new(),
                genres: String::new(),
                poster_path: String::new(),
                overview: String::new(),
                vote_average: 0.0,
                popularity: 0.0,
            },
        }
    }

    #[test]
    fn counts_without_keeping_vectors() {
        let index = CountingIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.upsert(&[unit("1"), unit("2")]).unwrap(), 2);
        assert_eq!(index.upsert(&[unit("2"), unit("3")]).unwrap(), 2);

        assert_eq!(index.len(), 3);
        assert_eq!(index.upserted(), 4);
        assert_eq!(index.upsert_calls(), 2);
        let stats = index.describe_index_stats().unwrap();
        assert_eq!(stats["totalVectorCount"], 3);
        assert_eq!(stats["dimension"], 4);
    }

    #[test]
    fn catalog_behaves_like_the_service() {
        let index = CountingIndex::new();
        let spec = IndexSpec {
            name: "media".into(),
            dimension: 4,
            metric: Metric::Cosine,
            cloud: "aws".into(),
            region: "us-east-1".into(),
        };
        assert!(index.describe_index("media").is_err());
        index.create_index(&spec).unwrap();
        assert!(index.create_index(&spec).is_err());
        assert_eq!(index.describe_index("media").unwrap().dimension, Some(4));
        assert_eq!(index.describe_index_stats().unwrap()["dimension"], serde_json::Value::Null);
    }
}
