use crate::config::types::Config;
use crate::config::validation::validate;
use crate::crawler::TraversalPolicy;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Command-line values that take precedence over the configuration file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Replaces every configured identity with one unnamed identity per token
    pub tokens: Vec<String>,
    pub results_path: Option<String>,
    pub target_requests: Option<u64>,
    pub target_rps: Option<f64>,
    pub traversal: Option<TraversalPolicy>,
}

impl Overrides {
    /// Applies the overrides in place
    pub fn apply(&self, config: &mut Config) {
        if !self.tokens.is_empty() {
            let profile = config.client.tls_profile.clone();
            let workers = config
                .identities
                .first()
                .map(|identity| identity.workers)
                .unwrap_or(3);

            config.identities = self
                .tokens
                .iter()
                .enumerate()
                .map(|(i, token)| crate::config::IdentityConfig {
                    name: format!("identity-{}", i + 1),
                    token: token.clone(),
                    tls_profile: Some(profile.clone()),
                    workers,
                })
                .collect();
        }

        if let Some(path) = &self.results_path {
            config.output.results_path = path.clone();
        }

        if let Some(target) = self.target_requests {
            config.crawl.target_requests = target;
        }

        if let Some(rps) = self.target_rps {
            config.timing.target_rps = rps;
        }

        if let Some(traversal) = self.traversal {
            config.crawl.traversal = traversal;
        }
    }
}

/// Parses a configuration file without validating it
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use pathwalker::config::load_config;
///
/// let config = load_config(Path::new("pathwalker.toml")).unwrap();
/// println!("Target: {} pages", config.crawl.target_requests);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_overrides(path, &Overrides::default()).map(|(config, _)| config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is logged at start-up and written into the run summary so a result
/// file can be traced back to the exact settings that produced it.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration, applies command-line overrides, validates the result
/// and returns it together with the file hash
pub fn load_config_with_overrides(
    path: &Path,
    overrides: &Overrides,
) -> Result<(Config, String), ConfigError> {
    let mut config = parse_config(path)?;
    overrides.apply(&mut config);
    validate(&config)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"
[crawl]
base-url = "https://example.com"
start-path = "/scraping/1"
target-requests = 100
time-limit = 60

[timing]
target-rps = 10.0
burst-size = [30, 50]
burst-interval = [0.2, 0.5]
cooldown-every = [800, 1000]
cooldown-duration = [2.0, 4.0]
request-variance = 0.15
think-time = [0.01, 0.03]

[[identity]]
name = "primary"
token = "abc"

[output]
results-path = "./results.json"
"#;
