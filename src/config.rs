// src/config.rs
use crate::error::{FetchError, Result};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

/// How deferred data source work is executed during a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Spawn each source's deferred work on the ambient tokio runtime.
    #[default]
    Spawned,
    /// Poll deferred work together on the task driving the run.
    Inline,
}

/// Engine settings. Flatten into a host CLI with `#[command(flatten)]`.
#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How deferred data source work is executed within a round
    #[arg(long = "dispatch", value_enum, default_value_t = DispatchMode::Spawned)]
    pub dispatch: DispatchMode,

    /// Maximum deferred data source actions in flight per round (default: unbounded)
    #[arg(long)]
    pub max_concurrent_dispatches: Option<usize>,

    /// Fail a run that needs more than this many rounds (default: unbounded)
    #[arg(long)]
    pub round_limit: Option<usize>,
}

impl EngineConfig {
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_max_concurrent_dispatches(mut self, limit: usize) -> Self {
        self.max_concurrent_dispatches = Some(limit);
        self
    }

    pub fn with_round_limit(mut self, limit: usize) -> Self {
        self.round_limit = Some(limit);
        self
    }

    /// Rejects settings that could never let a run make progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_dispatches == Some(0) {
            return Err(FetchError::InvalidConfig(
                "max_concurrent_dispatches must be at least 1".to_string(),
            ));
        }
        if self.round_limit == Some(0) {
            return Err(FetchError::InvalidConfig(
                "round_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Spawned,
            max_concurrent_dispatches: None,
            round_limit: None,
        }
    }
}
