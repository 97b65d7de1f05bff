// src/engine/status.rs
//! Write-once status cells shared between the dedup cache, the data source
//! that services a request, and every computation waiting on it.

use crate::error::FetchError;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of one request within a run.
#[derive(Debug, Clone)]
pub enum FetchStatus<T> {
    NotFetched,
    Success(T),
    Failure(FetchError),
}

impl<T> FetchStatus<T> {
    pub fn is_fetched(&self) -> bool {
        !matches!(self, FetchStatus::NotFetched)
    }
}

/// A shared cell that starts `NotFetched` and transitions exactly once.
///
/// Cloning a cell clones the handle, not the status: all clones observe
/// the same write. Writes after the first are rejected.
pub struct StatusCell<T> {
    inner: Arc<RwLock<FetchStatus<T>>>,
}

impl<T> StatusCell<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(FetchStatus::NotFetched)),
        }
    }

    /// Resolves the cell. Returns `false` (leaving the cell untouched) if
    /// it was already resolved.
    pub fn complete(&self, result: Result<T, FetchError>) -> bool {
        let mut status = self.inner.write();
        if status.is_fetched() {
            return false;
        }
        *status = match result {
            Ok(value) => FetchStatus::Success(value),
            Err(err) => FetchStatus::Failure(err),
        };
        true
    }

    pub fn is_fetched(&self) -> bool {
        self.inner.read().is_fetched()
    }

    /// Whether both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> StatusCell<T> {
    /// Snapshot of the current status.
    pub fn status(&self) -> FetchStatus<T> {
        self.inner.read().clone()
    }
}

impl<T> Clone for StatusCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for StatusCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for StatusCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatusCell").field(&*self.inner.read()).finish()
    }
}
