// src/engine/round.rs
//! The round engine: steps a computation, dispatches what it blocked on,
//! and resumes, until a value or an error comes out.

use super::cache::DedupCache;
use super::fetch::{Fetch, FetchEnv, FetchStep};
use super::store::{DispatchedBatch, RequestStore};
use crate::config::EngineConfig;
use crate::error::FetchError;
use serde::Serialize;

/// What happened in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    pub round: usize,
    pub batches: Vec<DispatchedBatch>,
}

/// Round-by-round record of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub rounds: Vec<RoundReport>,
}

impl RunReport {
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// Number of batches a data source received over the run.
    pub fn dispatch_count(&self, data_source: &str) -> usize {
        self.batches_for(data_source).count()
    }

    /// Batches a data source received, in round order.
    pub fn batches_for<'a>(
        &'a self,
        data_source: &'a str,
    ) -> impl Iterator<Item = &'a DispatchedBatch> + 'a {
        self.rounds
            .iter()
            .flat_map(|round| round.batches.iter())
            .filter(move |batch| batch.data_source == data_source)
    }

    pub fn total_requests(&self) -> usize {
        self.rounds
            .iter()
            .flat_map(|round| round.batches.iter())
            .map(DispatchedBatch::len)
            .sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// A run's value together with its report.
#[derive(Debug, Clone)]
pub struct RunOutput<T> {
    pub value: T,
    pub report: RunReport,
}

/// Drives fetch computations to completion.
///
/// Each run gets its own cache and store; nothing is shared between runs.
#[derive(Debug, Clone, Default)]
pub struct FetchEngine {
    config: EngineConfig,
}

impl FetchEngine {
    pub fn new(config: EngineConfig) -> Result<Self, FetchError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a computation and returns its value, or the error that ended
    /// the run.
    pub async fn run<T: Send + 'static>(&self, fetch: Fetch<T>) -> Result<T, FetchError> {
        self.run_with_report(fetch).await.map(|output| output.value)
    }

    /// Runs a computation, also reporting every round it took.
    pub async fn run_with_report<T: Send + 'static>(
        &self,
        fetch: Fetch<T>,
    ) -> Result<RunOutput<T>, FetchError> {
        let cache = DedupCache::new();
        let store = RequestStore::new();
        let mut report = RunReport::default();
        let mut current = fetch;

        loop {
            let step = current.step(&FetchEnv::new(&cache, &store));

            let (pending, cont) = match step {
                FetchStep::Done(value) => {
                    log::info!(
                        "Fetch run complete: {} rounds, {} requests",
                        report.round_count(),
                        report.total_requests()
                    );
                    return Ok(RunOutput { value, report });
                }
                FetchStep::Failed(err) => {
                    log::warn!(
                        "Fetch run failed after {} rounds: {}",
                        report.round_count(),
                        err
                    );
                    return Err(err);
                }
                FetchStep::Blocked(pending, cont) => (pending, cont),
            };

            if let Some(limit) = self.config.round_limit {
                if report.round_count() >= limit {
                    return Err(FetchError::RoundLimitExceeded { limit });
                }
            }

            let round = report.round_count() + 1;
            log::debug!(
                "Round {}: {} newly blocked, {} queued for dispatch",
                round,
                pending.len(),
                store.len()
            );

            let batches = store.resolve_all(&self.config).await?;
            report.rounds.push(RoundReport { round, batches });
            current = cont;
        }
    }
}

/// Runs a computation with the default engine configuration.
///
/// Deferred source work is spawned on the ambient tokio runtime, or polled
/// on the caller's task when there is none.
pub async fn run<T: Send + 'static>(fetch: Fetch<T>) -> Result<T, FetchError> {
    FetchEngine::default().run(fetch).await
}
