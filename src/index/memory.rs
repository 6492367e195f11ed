//! In-process index that keeps every vector, for tests and local inspection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::json;

use super::{IndexDescription, IndexError, IndexSpec, VectorIndex};
use crate::record::UpsertUnit;

/// Index held entirely in memory with the same overwrite-by-id semantics as
/// the remote service.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    catalog: LocalCatalog,
    vectors: Mutex<BTreeMap<String, UpsertUnit>>,
    create_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl InMemoryIndex {
    /// Empty index service with no indexes defined.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        lock(&self.vectors).len()
    }

    /// Whether no vectors are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored unit for `id`, if any.
    pub fn get(&self, id: &str) -> Option<UpsertUnit> {
        lock(&self.vectors).get(id).cloned()
    }

    /// Copy of every stored unit keyed by id.
    pub fn snapshot(&self) -> BTreeMap<String, UpsertUnit> {
        lock(&self.vectors).clone()
    }

    /// How many times `create_index` has been called.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::Relaxed)
    }

    /// How many non-empty upserts have been received.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::Relaxed)
    }
}

impl VectorIndex for InMemoryIndex {
    fn list_indexes(&self) -> Result<Vec<IndexDescription>, IndexError> {
        Ok(self.catalog.list())
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        self.catalog.create(spec)
    }

    fn describe_index(&self, name: &str) -> Result<IndexDescription, IndexError> {
        self.catalog.describe(name)
    }

    fn upsert(&self, units: &[UpsertUnit]) -> Result<usize, IndexError> {
        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        let mut vectors = lock(&self.vectors);
        for unit in units {
            vectors.insert(unit.id.to_string(), unit.clone());
        }
        Ok(units.len())
    }

    fn describe_index_stats(&self) -> Result<serde_json::Value, IndexError> {
        let vectors = lock(&self.vectors);
        let dimension = vectors.values().next().map(|unit| unit.values.len());
        Ok(json!({
            "dimension": dimension,
            "totalVectorCount": vectors.len(),
        }))
    }
}

/// Index definitions kept by the in-process backends.
#[derive(Debug, Default)]
pub(super) struct LocalCatalog {
    indexes: Mutex<Vec<IndexDescription>>,
}

impl LocalCatalog {
    pub(super) fn list(&self) -> Vec<IndexDescription> {
        lock(&self.indexes).clone()
    }

    pub(super) fn create(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        let mut indexes = lock(&self.indexes);
        if indexes.iter().any(|desc| desc.name == spec.name) {
            return Err(IndexError::Rejected(format!("index {} already exists", spec.name)));
        }
        indexes.push(IndexDescription {
            name: spec.name.clone(),
            dimension: Some(spec.dimension),
            metric: Some(spec.metric),
            host: Some(format!("{}.in-memory", spec.name)),
        });
        Ok(())
    }

    pub(super) fn describe(&self, name: &str) -> Result<IndexDescription, IndexError> {
        lock(&self.indexes)
            .iter()
            .find(|desc| desc.name == name)
            .cloned()
            .ok_or_else(|| IndexError::Service {
                status: 404,
                body: format!("index {name} not found"),
            })
    }
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
