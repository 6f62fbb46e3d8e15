//! Pathwalker: a latency-aware link-graph crawler
//!
//! This crate walks the pages of a single site by following the links each page
//! exposes, shaping the delay between requests with a stochastic timing controller
//! and stopping an identity as soon as the site answers with a hard block.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod timing;

use thiserror::Error;

/// Main error type for Pathwalker operations
///
/// Transport failures are classified and handled inside the crawl loop; the
/// `Transport` variant only carries them to the point where they are logged.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] crawler::TransportError),

    #[error("Marker matcher error: {0}")]
    Matcher(#[from] aho_corasick::BuildError),

    #[error("Result sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid range for {field}: min {min} is greater than max {max}")]
    InvalidRange {
        field: &'static str,
        min: String,
        max: String,
    },

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid link pattern: {0}")]
    InvalidPattern(String),
}

/// Result type alias for Pathwalker operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{crawl, Classification, CrawlReport, Frontier, Orchestrator, TraversalPolicy};
pub use state::{RunState, StopSignal};
pub use timing::TimingController;
