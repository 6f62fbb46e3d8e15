//! Configuration module for Pathwalker
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every numeric range is written as a `[min, max]` array; a range with
//! `min > max` is rejected before the crawl starts.
//!
//! # Example
//!
//! ```no_run
//! use pathwalker::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("pathwalker.toml")).unwrap();
//! println!("Crawler will stop after {} pages", config.crawl.target_requests);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ActivityPhaseConfig, ClientConfig, Config, CrawlConfig, IdentityConfig, OutputConfig, Span,
    TimingConfig, DEFAULT_LINK_PATTERN,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_overrides, parse_config, Overrides,
};
pub use validation::validate;

#[cfg(test)]
pub(crate) use parser::SAMPLE_CONFIG;
