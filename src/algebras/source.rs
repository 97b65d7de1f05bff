//! The data source contract.
//!
//! A data source is the only place where a fetch run touches the outside
//! world. The engine groups every request discovered in a round by source
//! name and hands each source its whole batch at once; the source decides
//! how to service it (one call per request, one call for the batch, or
//! anything in between).

use crate::engine::StatusCell;
use crate::error::FetchError;
use crate::types::{RequestId, RequestKey};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;

/// A request value understood by one data source.
///
/// # Laws
///
/// - **L1 (Deterministic identity)**: equal logical requests produce equal
///   identifiers.
///   ```text
///   a == b  =>  a.identifier() == b.identifier()
///   ```
/// - **L2 (Stable identity)**: a request's identifier never changes.
pub trait Request: Send + Sync + 'static {
    /// Value a successful fetch of this request produces.
    type Response: Clone + Send + Sync + 'static;

    /// Identifier used to deduplicate this request within its data source.
    fn identifier(&self) -> RequestId;
}

/// The ability to service a batch of requests.
///
/// # Laws
///
/// All implementations must satisfy these laws:
///
/// - **L1 (Batch completeness)**: every `BlockedFetch` in the batch is
///   resolved, either before `fetch` returns `PerformFetch::Complete` or
///   by the time the `PerformFetch::Deferred` future finishes.
///   ```text
///   fetch(batch) == Complete      =>  all(batch, is_resolved)
///   fetch(batch) == Deferred(fut) =>  fut.await; all(batch, is_resolved)
///   ```
///
/// - **L2 (Exactly once)**: each `BlockedFetch` is resolved once. Later
///   writes are ignored by the engine.
///
/// - **L3 (Isolation)**: a source only writes to the fetches it was handed.
///
/// A request left unresolved fails the run on the next round with
/// [`FetchError::IncompleteFetch`].
pub trait DataSource: Send + Sync + 'static {
    type Request: Request;

    /// Name the engine groups this source's requests under.
    fn name(&self) -> &str;

    /// Services one round's worth of requests, in registration order.
    fn fetch(&self, batch: Vec<BlockedFetch<Self::Request>>) -> PerformFetch;
}

/// Response type produced by a data source's requests.
pub type ResponseOf<S> = <<S as DataSource>::Request as Request>::Response;

/// What a data source did with its batch.
pub enum PerformFetch {
    /// Every fetch in the batch was resolved before returning.
    Complete,
    /// Work that resolves the batch once driven to completion. Deferred
    /// work from all sources in a round runs concurrently.
    Deferred(BoxFuture<'static, ()>),
}

impl PerformFetch {
    pub fn deferred(work: impl Future<Output = ()> + Send + 'static) -> Self {
        PerformFetch::Deferred(Box::pin(work))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, PerformFetch::Deferred(_))
    }
}

impl fmt::Debug for PerformFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformFetch::Complete => f.write_str("Complete"),
            PerformFetch::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// A request waiting on its data source, paired with the cell the source
/// must resolve.
pub struct BlockedFetch<R: Request> {
    request: R,
    key: RequestKey,
    status: StatusCell<R::Response>,
}

impl<R: Request> BlockedFetch<R> {
    pub(crate) fn new(request: R, key: RequestKey, status: StatusCell<R::Response>) -> Self {
        Self {
            request,
            key,
            status,
        }
    }

    pub fn request(&self) -> &R {
        &self.request
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_fetched()
    }

    /// Resolves this fetch with a value or an error.
    pub fn complete(&self, result: Result<R::Response, FetchError>) {
        if !self.status.complete(result) {
            log::warn!("Ignoring second resolution of {}", self.key);
        }
    }

    pub fn put_success(&self, value: R::Response) {
        self.complete(Ok(value));
    }

    /// Fails this fetch with an error attributed to its data source.
    pub fn put_failure(&self, cause: impl Into<anyhow::Error>) {
        let err = FetchError::data_source(self.key.data_source.clone(), cause);
        self.complete(Err(err));
    }
}

impl<R: Request + fmt::Debug> fmt::Debug for BlockedFetch<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockedFetch")
            .field("request", &self.request)
            .field("key", &self.key)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
