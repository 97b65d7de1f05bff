// src/lib.rs
//! roundfetch: batches and deduplicates independent data fetches into
//! synchronous rounds against pluggable data sources.
//!
//! Client code writes straight-line fetch expressions. Fetches combined
//! with [`apply`], [`zip`], [`sequence`] or [`traverse`] are independent
//! and share a round; a fetch built inside [`Fetch::and_then`] depends on
//! an earlier value and waits for a later round. Within a run each unique
//! request is dispatched at most once.
//!
//! # Public API
//!
//! The library exposes types organized by concern:
//! - **Error handling**: `FetchError`, `LoggingError`
//! - **Configuration**: `EngineConfig`, `DispatchMode`
//! - **Data source contract**: `Request`, `DataSource`, `BlockedFetch`, `PerformFetch`
//! - **Computations**: `Fetch`, `data_fetch`, `apply`, `zip`, `sequence`, `traverse`, `traverse_seq`
//! - **Execution**: `run`, `FetchEngine`, `RunReport`
//! - **Logging**: `setup_logging`, `LoggingOptions`

mod algebras;
mod config;
mod constants;
mod engine;
mod error;
mod logging;
mod types;

// --- Error Handling ---
pub use crate::error::{FetchError, LoggingError};

// --- Configuration ---
pub use crate::config::{DispatchMode, EngineConfig};

// --- Data Source Contract ---
pub use crate::algebras::{BlockedFetch, DataSource, PerformFetch, Request, ResponseOf};

// --- Identity ---
pub use crate::types::{RequestId, RequestKey};

// --- Computations ---
pub use crate::engine::{
    apply, data_fetch, sequence, traverse, traverse_seq, zip, Fetch, FetchEnv, FetchStep,
};

// --- Run State ---
pub use crate::engine::{DedupCache, FetchStatus, RequestStore, StatusCell};

// --- Execution ---
pub use crate::engine::{run, DispatchedBatch, FetchEngine, RoundReport, RunOutput, RunReport};

// --- Logging ---
pub use crate::logging::{build_logging_config, setup_logging, LoggingOptions};
