// src/engine/cache.rs
//! Per-run deduplication cache.
//!
//! Maps each request key to the one status cell shared by every fetch of
//! that request in the run. Entries are never removed; the cache is
//! dropped with the run.

use super::status::StatusCell;
use crate::error::FetchError;
use crate::types::RequestKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

type ErasedCell = Arc<dyn Any + Send + Sync>;

/// Concurrent map from request key to its type-erased status cell.
#[derive(Default)]
pub struct DedupCache {
    entries: DashMap<RequestKey, ErasedCell>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the cell registered for `key`.
    ///
    /// Fails with [`FetchError::TypeMismatch`] if the key was registered
    /// with a different response type.
    pub fn get<T>(&self, key: &RequestKey) -> Result<Option<StatusCell<T>>, FetchError>
    where
        T: Send + Sync + 'static,
    {
        match self.entries.get(key) {
            Some(entry) => downcast_cell(key, entry.value()).map(Some),
            None => Ok(None),
        }
    }

    /// Registers `cell` for `key` unless one is already present, and
    /// returns whichever cell ended up registered. Concurrent callers
    /// racing on the same key all receive the same winning cell.
    pub fn put<T>(&self, key: RequestKey, cell: StatusCell<T>) -> Result<StatusCell<T>, FetchError>
    where
        T: Send + Sync + 'static,
    {
        match self.entries.entry(key) {
            Entry::Occupied(existing) => downcast_cell(existing.key(), existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(cell.clone()));
                Ok(cell)
            }
        }
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn downcast_cell<T>(key: &RequestKey, erased: &ErasedCell) -> Result<StatusCell<T>, FetchError>
where
    T: Send + Sync + 'static,
{
    erased
        .downcast_ref::<StatusCell<T>>()
        .cloned()
        .ok_or_else(|| FetchError::TypeMismatch {
            data_source: key.data_source.clone(),
            request: key.request.to_string(),
        })
}
