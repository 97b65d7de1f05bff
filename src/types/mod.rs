//! Identity types shared by the cache, the store and the data sources.

mod ids;

pub use ids::*;
