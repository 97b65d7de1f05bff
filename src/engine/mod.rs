//! The fetch engine: computations, the per-run cache and store, and the
//! round loop that drives them.
//!
//! Only the round loop has side effects. Combinators build computations;
//! stepping one registers requests in the run's store; the loop hands the
//! store to the data sources and resumes.

mod cache;
mod fetch;
mod round;
mod status;
mod store;

pub use cache::DedupCache;
pub use fetch::{
    apply, data_fetch, sequence, traverse, traverse_seq, zip, Fetch, FetchEnv, FetchStep,
};
pub use round::{run, FetchEngine, RoundReport, RunOutput, RunReport};
pub use status::{FetchStatus, StatusCell};
pub use store::{DispatchedBatch, RequestStore};
