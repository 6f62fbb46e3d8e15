/// Run state definitions for the crawl loop
///
/// A run starts in `Running` and moves to exactly one terminal state.
use serde::Serialize;
use std::fmt;

/// Represents the current state of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    // ===== Active State =====
    /// Requests are being issued
    Running,

    // ===== Terminal States =====
    /// The wall-clock budget ran out
    TimeLimitExceeded,

    /// The requested number of successful pages was collected
    TargetReached,

    /// The site answered with a hard block (every identity, in sharded mode)
    Blocked,

    /// No pending paths remain and nothing is in flight
    FrontierExhausted,

    /// The operator asked the run to stop
    Interrupted,
}

impl RunState {
    /// Returns true once the run has stopped issuing requests
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::TimeLimitExceeded => "time_limit_exceeded",
            Self::TargetReached => "target_reached",
            Self::Blocked => "blocked",
            Self::FrontierExhausted => "frontier_exhausted",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
