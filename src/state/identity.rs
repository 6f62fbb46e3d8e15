/// Identity session state
///
/// An identity is one authenticated session: a token sent as a cookie plus the
/// browser profile its transport presents. Once an identity observes a hard
/// block it never issues another request.
use crate::config::IdentityConfig;
use crate::ConfigError;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared, thread-safe session state of one identity
#[derive(Debug)]
pub struct IdentitySession {
    name: String,
    tls_profile: String,
    cookie_name: String,
    cookie_pattern: Regex,
    token: Mutex<String>,
    blocked: AtomicBool,
    successes: AtomicU64,
    attempts: AtomicU64,
    rotations: AtomicU64,
}

impl IdentitySession {
    /// Creates a session
    ///
    /// # Arguments
    ///
    /// * `config` - Identity entry from the configuration
    /// * `default_tls_profile` - Profile used when the identity names none
    /// * `cookie_name` - Name of the cookie the token travels in
    pub fn new(
        config: &IdentityConfig,
        default_tls_profile: &str,
        cookie_name: &str,
    ) -> Result<Self, ConfigError> {
        let cookie_pattern = Regex::new(&format!(r"{}=([^;]+)", regex::escape(cookie_name)))
            .map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            tls_profile: config
                .tls_profile
                .clone()
                .unwrap_or_else(|| default_tls_profile.to_string()),
            cookie_name: cookie_name.to_string(),
            cookie_pattern,
            token: Mutex::new(config.token.clone()),
            blocked: AtomicBool::new(false),
            successes: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tls_profile(&self) -> &str {
        &self.tls_profile
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Current session token
    pub fn token(&self) -> String {
        self.token.lock().clone()
    }

    /// Picks up a rotated token from the `set-cookie` headers of a response
    ///
    /// Returns true when the token changed.
    pub fn refresh_token(&self, headers: &HeaderMap) -> bool {
        let rotated = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| {
                self.cookie_pattern
                    .captures(value)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            });

        let Some(new_token) = rotated else {
            return false;
        };

        let mut token = self.token.lock();
        if *token == new_token {
            return false;
        }

        *token = new_token;
        self.rotations.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Marks the identity as blocked
    ///
    /// Returns true for the caller that flipped the flag.
    pub fn mark_blocked(&self) -> bool {
        !self.blocked.swap(true, Ordering::SeqCst)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn record_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Counts a success and returns the identity's running total
    pub fn record_success(&self) -> u64 {
        self.successes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Snapshot for the run summary
    pub fn report(&self) -> IdentityReport {
        IdentityReport {
            name: self.name.clone(),
            tls_profile: self.tls_profile.clone(),
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes(),
            token_rotations: self.rotations.load(Ordering::Relaxed),
            blocked: self.is_blocked(),
        }
    }
}

/// Per-identity totals reported at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityReport {
    pub name: String,
    pub tls_profile: String,
    pub attempts: u64,
    pub successes: u64,
    pub token_rotations: u64,
    pub blocked: bool,
}
