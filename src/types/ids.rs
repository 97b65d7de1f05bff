use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a request within one data source's request space.
///
/// Equal logical requests must produce equal identifiers; the dedup cache
/// relies on nothing else to recognise a request it has already seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the identifier as a string reference
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A request identifier namespaced by the data source that serves it.
///
/// Two sources may use the same identifier for unrelated requests, so
/// every per-run table is keyed by the pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub data_source: String,
    pub request: RequestId,
}

impl RequestKey {
    pub fn new(data_source: impl Into<String>, request: impl Into<RequestId>) -> Self {
        Self {
            data_source: data_source.into(),
            request: request.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.data_source, self.request)
    }
}
