use crate::config::types::{
    ActivityPhaseConfig, ClientConfig, Config, CrawlConfig, IdentityConfig, OutputConfig, Span,
    TimingConfig,
};
use crate::crawler::TraversalPolicy;
use crate::ConfigError;
use regex::Regex;
use std::fmt::Display;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_client_config(&config.client)?;
    validate_timing_config(&config.timing)?;
    validate_identities(&config.identities, config.crawl.traversal)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Rejects a range whose lower bound exceeds its upper bound
pub(crate) fn check_span<T: PartialOrd + Display>(
    field: &'static str,
    span: &Span<T>,
) -> Result<(), ConfigError> {
    if !span.is_ordered() {
        return Err(ConfigError::InvalidRange {
            field,
            min: span.min.to_string(),
            max: span.max.to_string(),
        });
    }
    Ok(())
}

/// Like `check_span` but also rejects negative or non-finite durations
fn check_seconds(field: &'static str, span: &Span<f64>) -> Result<(), ConfigError> {
    if !span.min.is_finite() || !span.max.is_finite() || span.min < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} must contain finite, non-negative seconds, got {}",
            field, span
        )));
    }
    check_span(field, span)
}

/// Validates crawl target and limits
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            config.base_url
        )));
    }

    if !config.start_path.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "start_path must be a relative path starting with '/', got '{}'",
            config.start_path
        )));
    }

    if config.target_requests < 1 {
        return Err(ConfigError::Validation(
            "target_requests must be >= 1".to_string(),
        ));
    }

    if config.time_limit < 1 {
        return Err(ConfigError::Validation("time_limit must be >= 1s".to_string()));
    }

    if config.request_timeout < 1 {
        return Err(ConfigError::Validation(
            "request_timeout must be >= 1s".to_string(),
        ));
    }

    if config.cookie_check_interval < 1 {
        return Err(ConfigError::Validation(
            "cookie_check_interval must be >= 1".to_string(),
        ));
    }

    if config.progress_interval < 1 {
        return Err(ConfigError::Validation(
            "progress_interval must be >= 1".to_string(),
        ));
    }

    let pattern = Regex::new(&config.link_pattern)
        .map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;

    if pattern.captures_len() < 2 {
        return Err(ConfigError::InvalidPattern(format!(
            "link_pattern '{}' must contain a capture group for the path",
            config.link_pattern
        )));
    }

    Ok(())
}

/// Validates client settings
fn validate_client_config(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.cookie_name.is_empty()
        || !config
            .cookie_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "cookie_name must be a non-empty token, got '{}'",
            config.cookie_name
        )));
    }

    Ok(())
}

/// Validates every timing range
fn validate_timing_config(config: &TimingConfig) -> Result<(), ConfigError> {
    if !config.target_rps.is_finite() || config.target_rps <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "target_rps must be > 0, got {}",
            config.target_rps
        )));
    }

    if config.burst_size.min < 1 {
        return Err(ConfigError::Validation(
            "burst_size must start at >= 1".to_string(),
        ));
    }
    check_span("burst_size", &config.burst_size)?;

    if config.cooldown_every.min < 1 {
        return Err(ConfigError::Validation(
            "cooldown_every must start at >= 1".to_string(),
        ));
    }
    check_span("cooldown_every", &config.cooldown_every)?;

    check_seconds("burst_interval", &config.burst_interval)?;
    check_seconds("cooldown_duration", &config.cooldown_duration)?;
    check_seconds("think_time", &config.think_time)?;
    check_seconds("fast_delay", &config.fast_delay)?;

    if !(0.0..=1.0).contains(&config.request_variance) {
        return Err(ConfigError::Validation(format!(
            "request_variance must be between 0 and 1, got {}",
            config.request_variance
        )));
    }

    if let Some(phase) = &config.activity_phase {
        validate_activity_phase(phase)?;
    }

    if let Some(threshold) = config.latency_threshold {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Validation(format!(
                "latency_threshold must be >= 0, got {}",
                threshold
            )));
        }
    }

    if config.entropy_check_interval < 1 {
        return Err(ConfigError::Validation(
            "entropy_check_interval must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_activity_phase(phase: &ActivityPhaseConfig) -> Result<(), ConfigError> {
    check_seconds("activity_phase.active", &phase.active)?;
    check_seconds("activity_phase.rest", &phase.rest)?;
    Ok(())
}

/// Validates identities; every policy needs at least one
fn validate_identities(
    identities: &[IdentityConfig],
    traversal: TraversalPolicy,
) -> Result<(), ConfigError> {
    if identities.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[identity]] with a token is required".to_string(),
        ));
    }

    for identity in identities {
        if identity.name.is_empty() {
            return Err(ConfigError::Validation(
                "identity name cannot be empty".to_string(),
            ));
        }

        if identity.token.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "identity '{}' has an empty token",
                identity.name
            )));
        }

        if traversal == TraversalPolicy::Sharded && identity.workers < 1 {
            return Err(ConfigError::Validation(format!(
                "identity '{}' must run at least one worker",
                identity.name
            )));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.results_path.is_empty() {
        return Err(ConfigError::Validation(
            "results_path cannot be empty".to_string(),
        ));
    }

    if matches!(&config.summary_path, Some(path) if path.is_empty()) {
        return Err(ConfigError::Validation(
            "summary_path cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}
