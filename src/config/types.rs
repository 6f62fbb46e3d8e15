use crate::crawler::TraversalPolicy;
use serde::Deserialize;
use std::fmt;

/// Default link pattern: relative `/scraping/<n>` references inside an href
pub const DEFAULT_LINK_PATTERN: &str = r#"href=["']?(/scraping/\d+)["']?"#;

/// Main configuration structure for Pathwalker
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub client: ClientConfig,
    pub timing: TimingConfig,
    #[serde(default, rename = "identity")]
    pub identities: Vec<IdentityConfig>,
    pub output: OutputConfig,
}

/// An inclusive `[min, max]` range, written as a two-element array in TOML
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "(T, T)", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Span<T> {
    pub min: T,
    pub max: T,
}

impl<T> Span<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: PartialOrd> Span<T> {
    /// True when `min <= max`
    pub fn is_ordered(&self) -> bool {
        self.min <= self.max
    }

    pub fn contains(&self, value: &T) -> bool {
        *value >= self.min && *value <= self.max
    }
}

impl<T> From<(T, T)> for Span<T> {
    fn from((min, max): (T, T)) -> Self {
        Self { min, max }
    }
}

impl<T: fmt::Display> fmt::Display for Span<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Crawl target and run limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Scheme and host every path is appended to
    pub base_url: String,

    /// Path the frontier is seeded with
    pub start_path: String,

    /// Number of successful pages after which the run stops
    pub target_requests: u64,

    /// Wall-clock budget for the whole run (seconds)
    pub time_limit: u64,

    /// Traversal policy
    #[serde(default)]
    pub traversal: TraversalPolicy,

    /// Per-request timeout handed to the transport (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Successes between session token re-checks
    #[serde(default = "default_cookie_check_interval")]
    pub cookie_check_interval: u64,

    /// Successes between progress lines
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Successes between checkpoint writes of the result sink (0 disables them)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// Regex with one capture group matching an outbound crawlable reference
    #[serde(default = "default_link_pattern")]
    pub link_pattern: String,
}

/// Transport-facing settings shared by all identities
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Browser profile identifier used by identities that don't name their own
    #[serde(default = "default_tls_profile")]
    pub tls_profile: String,

    /// Name of the session cookie carrying the identity token
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            tls_profile: default_tls_profile(),
            cookie_name: default_cookie_name(),
        }
    }
}

/// Timing controller configuration; all durations are in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TimingConfig {
    pub target_rps: f64,
    pub burst_size: Span<u32>,
    pub burst_interval: Span<f64>,
    pub cooldown_every: Span<u64>,
    pub cooldown_duration: Span<f64>,
    pub request_variance: f64,
    pub think_time: Span<f64>,

    #[serde(default)]
    pub activity_phase: Option<ActivityPhaseConfig>,

    /// Latency above which the controller answers with a fast delay
    #[serde(default)]
    pub latency_threshold: Option<f64>,

    #[serde(default = "default_fast_delay")]
    pub fast_delay: Span<f64>,

    /// Entropy (bits) below which the diagnostic reading is reported
    #[serde(default)]
    pub entropy_target: Option<f64>,

    #[serde(default = "default_entropy_check_interval")]
    pub entropy_check_interval: u64,

    /// Seed for a reproducible delay sequence
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Alternating active/resting phase durations
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ActivityPhaseConfig {
    pub active: Span<f64>,
    pub rest: Span<f64>,
}

/// One authenticated session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IdentityConfig {
    pub name: String,

    /// Session token obtained out of band
    pub token: String,

    #[serde(default)]
    pub tls_profile: Option<String>,

    /// Worker tasks bound to this identity in sharded mode
    #[serde(default = "default_workers")]
    pub workers: u32,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path of the JSON result document
    pub results_path: String,

    /// Optional path of the JSON run summary
    #[serde(default)]
    pub summary_path: Option<String>,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_cookie_check_interval() -> u64 {
    200
}

fn default_progress_interval() -> u64 {
    50
}

fn default_checkpoint_interval() -> u64 {
    500
}

fn default_link_pattern() -> String {
    DEFAULT_LINK_PATTERN.to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string()
}

fn default_tls_profile() -> String {
    "chrome_131".to_string()
}

fn default_cookie_name() -> String {
    "datadome".to_string()
}

fn default_fast_delay() -> Span<f64> {
    Span::new(0.005, 0.02)
}

fn default_entropy_check_interval() -> u64 {
    200
}

fn default_workers() -> u32 {
    3
}
