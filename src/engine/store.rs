// src/engine/store.rs
//! Per-round request store and the dispatch fan-out.
//!
//! Requests discovered while stepping a computation are grouped here by
//! data source name. Dispatch drains the store, hands every source its
//! whole batch, and joins all deferred work before returning.

use crate::algebras::{BlockedFetch, DataSource, PerformFetch};
use crate::config::{DispatchMode, EngineConfig};
use crate::error::FetchError;
use crate::types::RequestKey;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;

/// One dispatched batch, as recorded in a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchedBatch {
    pub data_source: String,
    pub requests: Vec<RequestKey>,
    pub deferred: bool,
}

impl DispatchedBatch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// A blocked fetch with its request type erased, so batches for unrelated
/// sources can share one table.
pub(crate) struct ErasedFetch {
    key: RequestKey,
    fetch: Box<dyn Any + Send + Sync>,
}

/// Data source with its request type erased. The concrete type is
/// recovered in `dispatch`, the one place a source is invoked.
pub(crate) trait ErasedSource: Send + Sync {
    fn name(&self) -> &str;

    fn dispatch(&self, batch: Vec<ErasedFetch>) -> Result<PerformFetch, FetchError>;
}

struct SourceHandle<S>(Arc<S>);

impl<S: DataSource> ErasedSource for SourceHandle<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn dispatch(&self, batch: Vec<ErasedFetch>) -> Result<PerformFetch, FetchError> {
        let mut typed = Vec::with_capacity(batch.len());
        for ErasedFetch { key, fetch } in batch {
            match fetch.downcast::<BlockedFetch<S::Request>>() {
                Ok(blocked) => typed.push(*blocked),
                Err(_) => {
                    return Err(FetchError::TypeMismatch {
                        data_source: key.data_source,
                        request: key.request.to_string(),
                    })
                }
            }
        }
        Ok(self.0.fetch(typed))
    }
}

struct SourceBatch {
    source: Arc<dyn ErasedSource>,
    pending: Vec<ErasedFetch>,
}

/// Concurrent map from data source name to the requests pending for it in
/// the current round.
#[derive(Default)]
pub struct RequestStore {
    batches: DashMap<String, SourceBatch>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a blocked fetch to its source's batch, creating the batch
    /// on first use. Requests keep their registration order.
    pub fn add_request<S: DataSource>(&self, source: &Arc<S>, blocked: BlockedFetch<S::Request>) {
        let key = blocked.key().clone();
        self.batches
            .entry(source.name().to_string())
            .or_insert_with(|| SourceBatch {
                source: Arc::new(SourceHandle(Arc::clone(source))),
                pending: Vec::new(),
            })
            .pending
            .push(ErasedFetch {
                key,
                fetch: Box::new(blocked),
            });
    }

    /// Total number of pending requests across all sources.
    pub fn len(&self) -> usize {
        self.batches.iter().map(|batch| batch.pending.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Pending request keys for one source, in registration order.
    pub fn pending_for(&self, data_source: &str) -> Vec<RequestKey> {
        self.batches
            .get(data_source)
            .map(|batch| batch.pending.iter().map(|f| f.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Empties the store, returning batches ordered by source name.
    fn drain(&self) -> Vec<SourceBatch> {
        let mut names: Vec<String> = self.batches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.batches.remove(&name).map(|(_, batch)| batch))
            .collect()
    }

    /// Dispatches every pending batch and waits for all deferred work.
    ///
    /// A panic in a source, inline or deferred, becomes
    /// [`FetchError::DispatchAborted`]. Spawned mode falls back to joining
    /// inline when called outside a tokio runtime.
    ///
    /// The store is empty when this returns, whether or not dispatch
    /// succeeded. Deferred work from every source is joined even if one
    /// of them fails; the first failure is returned.
    pub async fn resolve_all(
        &self,
        config: &EngineConfig,
    ) -> Result<Vec<DispatchedBatch>, FetchError> {
        let mut dispatched = Vec::new();
        let mut deferred = Vec::new();
        let mut first_error = None;

        for SourceBatch { source, pending } in self.drain() {
            let name = source.name().to_string();
            let requests: Vec<RequestKey> = pending.iter().map(|f| f.key.clone()).collect();
            log::debug!("Dispatching {} requests to '{}'", requests.len(), name);

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| source.dispatch(pending)))
                .unwrap_or_else(|panic| {
                    Err(FetchError::DispatchAborted {
                        data_source: name.clone(),
                        reason: panic_message(panic.as_ref()),
                    })
                });

            match outcome {
                Ok(PerformFetch::Complete) => dispatched.push(DispatchedBatch {
                    data_source: name,
                    requests,
                    deferred: false,
                }),
                Ok(PerformFetch::Deferred(work)) => {
                    dispatched.push(DispatchedBatch {
                        data_source: name.clone(),
                        requests,
                        deferred: true,
                    });
                    deferred.push((name, work));
                }
                Err(err) => {
                    log::error!("Dispatch to '{}' failed: {}", name, err);
                    first_error.get_or_insert(err);
                }
            }
        }

        if !deferred.is_empty() {
            let outcome = match config.dispatch {
                DispatchMode::Spawned if tokio::runtime::Handle::try_current().is_ok() => {
                    join_spawned(deferred, config.max_concurrent_dispatches).await
                }
                DispatchMode::Spawned => {
                    log::debug!("No tokio runtime; joining deferred work inline");
                    join_inline(deferred, config.max_concurrent_dispatches).await
                }
                DispatchMode::Inline => {
                    join_inline(deferred, config.max_concurrent_dispatches).await
                }
            };
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(dispatched),
        }
    }
}

type Deferred = (String, BoxFuture<'static, ()>);

/// Runs deferred work to completion, turning a panic into an error
/// attributed to its source.
async fn guarded(name: String, work: BoxFuture<'static, ()>) -> Result<(), FetchError> {
    AssertUnwindSafe(work)
        .catch_unwind()
        .await
        .map_err(|panic| FetchError::DispatchAborted {
            data_source: name,
            reason: panic_message(panic.as_ref()),
        })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "deferred work panicked".to_string()
    }
}

/// Spawns deferred work on the ambient tokio runtime and joins it all.
async fn join_spawned(deferred: Vec<Deferred>, limit: Option<usize>) -> Result<(), FetchError> {
    let limit = limit.unwrap_or(usize::MAX).max(1);
    let mut join_set = JoinSet::new();
    let mut first_error = None;

    for (name, work) in deferred {
        while join_set.len() >= limit {
            if let Some(result) = join_set.join_next().await {
                record_joined(result, &mut first_error);
            }
        }
        join_set.spawn(guarded(name, work));
    }

    while let Some(result) = join_set.join_next().await {
        record_joined(result, &mut first_error);
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn record_joined(
    result: Result<Result<(), FetchError>, tokio::task::JoinError>,
    first_error: &mut Option<FetchError>,
) {
    let err = match result {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(join_err) => FetchError::DispatchAborted {
            data_source: "<unknown>".to_string(),
            reason: join_err.to_string(),
        },
    };
    log::error!("Deferred dispatch failed: {}", err);
    first_error.get_or_insert(err);
}

/// Polls deferred work concurrently on the current task.
async fn join_inline(deferred: Vec<Deferred>, limit: Option<usize>) -> Result<(), FetchError> {
    let limit = limit.unwrap_or(deferred.len()).max(1);
    let guarded_work: Vec<_> = deferred
        .into_iter()
        .map(|(name, work)| guarded(name, work))
        .collect();
    let results: Vec<Result<(), FetchError>> = futures::stream::iter(guarded_work)
        .buffer_unordered(limit)
        .collect()
        .await;

    match results.into_iter().find_map(Result::err) {
        Some(err) => {
            log::error!("Deferred dispatch failed: {}", err);
            Err(err)
        }
        None => Ok(()),
    }
}
