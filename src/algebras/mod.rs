//! Capability algebras for roundfetch.
//!
//! This module defines the traits external collaborators implement:
//!
//! - [`Request`]: a value with a stable identifier used for deduplication
//! - [`DataSource`]: the ability to service a batch of requests
//!
//! # Laws
//!
//! Each trait documents algebraic laws that all implementations must
//! satisfy. The engine relies on them: a source that breaks batch
//! completeness fails the run rather than stalling it.

pub mod source;

pub use source::{BlockedFetch, DataSource, PerformFetch, Request, ResponseOf};
