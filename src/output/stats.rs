//! Run metrics and the end-of-run summary
//!
//! This module provides the counters the crawl loop updates and the
//! functions that display them.

use crate::state::{IdentityReport, RunState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Counters of one run
///
/// `requests` counts every attempt. `errors` counts soft-invalid pages and
/// transport failures only; blocks are counted separately.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub requests: u64,
    pub success: u64,
    pub errors: u64,
    pub blocks: u64,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests: 0,
            success: 0,
            errors: 0,
            blocks: 0,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Successful pages per second since the run started
    pub fn rate(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.success as f64 / elapsed
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub total_requests: u64,
    pub success: u64,
    pub errors: u64,
    pub blocks: u64,
    pub rate: f64,
    pub visited: usize,
    pub pending: usize,

    /// Entropy of the recent delay distribution (bits)
    pub entropy: f64,

    /// SHA-256 of the configuration file the run was started with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    pub identities: Vec<IdentityReport>,
}

impl CrawlSummary {
    /// Builds a summary from the final counters
    pub fn from_metrics(
        state: RunState,
        metrics: &Metrics,
        visited: usize,
        pending: usize,
        entropy: f64,
        identities: Vec<IdentityReport>,
    ) -> Self {
        Self {
            state,
            started_at: metrics.started_at(),
            finished_at: Utc::now(),
            elapsed_seconds: metrics.elapsed().as_secs_f64(),
            total_requests: metrics.requests,
            success: metrics.success,
            errors: metrics.errors,
            blocks: metrics.blocks,
            rate: metrics.rate(),
            visited,
            pending,
            entropy,
            config_hash: None,
            identities,
        }
    }

    pub fn with_config_hash(mut self, config_hash: Option<String>) -> Self {
        self.config_hash = config_hash;
        self
    }
}

/// Logs a progress line
///
/// # Arguments
///
/// * `metrics` - Current counters
/// * `target` - Requested number of successful pages
/// * `pending` - Paths waiting in the frontier
/// * `path` - Path of the page just collected
pub fn log_progress(metrics: &Metrics, target: u64, pending: usize, path: &str) {
    let eta = eta_seconds(metrics.success, target, metrics.rate());
    tracing::info!(
        "[{}/{}] {:.1} req/s, ETA {}, {} pending, {} errors, last {}",
        metrics.success,
        target,
        metrics.rate(),
        eta.map(|s| format!("{:.0}s", s))
            .unwrap_or_else(|| "unknown".to_string()),
        pending,
        metrics.errors,
        path
    );
}

/// Seconds left until `target` at the current rate
fn eta_seconds(done: u64, target: u64, rate: f64) -> Option<f64> {
    if rate <= 0.0 {
        return None;
    }
    Some(target.saturating_sub(done) as f64 / rate)
}

/// Prints the run summary to stdout
pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Crawl Summary ===\n");

    println!("Overview:");
    println!("  Final state: {}", summary.state);
    println!("  Elapsed: {:.1}s", summary.elapsed_seconds);
    println!("  Requests: {}", summary.total_requests);
    println!("  Successful pages: {}", summary.success);
    println!("  Errors: {}", summary.errors);
    println!("  Blocks: {}", summary.blocks);
    println!("  Rate: {:.2} pages/s", summary.rate);
    println!();

    println!("Frontier:");
    println!("  Visited: {}", summary.visited);
    println!("  Pending: {}", summary.pending);
    println!();

    println!("Timing:");
    println!("  Delay entropy: {:.2} bits", summary.entropy);
    println!();

    if !summary.identities.is_empty() {
        println!("Identities:");
        for identity in &summary.identities {
            println!(
                "  {} ({}): {} ok / {} attempts, {} token rotations{}",
                identity.name,
                identity.tls_profile,
                identity.successes,
                identity.attempts,
                identity.token_rotations,
                if identity.blocked { ", BLOCKED" } else { "" }
            );
        }
        println!();
    }
}
