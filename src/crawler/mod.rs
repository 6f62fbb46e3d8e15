//! Crawler module for page fetching and traversal
//!
//! This module contains the core crawling logic, including:
//! - HTTP transport and browser header construction
//! - Regex-based link and fingerprint extraction
//! - Response classification
//! - The frontier of visited and pending paths
//! - Single-identity orchestration and the multi-identity worker pool

mod classifier;
mod coordinator;
mod extractor;
mod fetcher;
mod frontier;
mod shard;

pub use classifier::{Classification, ResponseClassifier, BLOCK_PAGE_MARKER};
pub use coordinator::{CrawlReport, Orchestrator};
pub use extractor::{LinkExtractor, HASH_WINDOW_CHARS};
pub use fetcher::{
    browser_headers, FetchRequest, FetchResponse, HttpTransport, Transport, TransportError,
};
pub use frontier::{Frontier, QueuedPath, TraversalPolicy};
pub use shard::{ShardMember, ShardedCrawl};

use crate::config::Config;
use crate::output::{write_json_atomic, ResultSink};
use crate::state::{IdentitySession, StopSignal};
use crate::{ConfigError, CrawlError};
use std::path::Path;
use std::sync::Arc;

/// Runs a complete crawl operation over HTTP
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Create one session per configured identity
/// 2. Build a transport for each session
/// 3. Run the single-identity loop or the sharded worker pool
/// 4. Persist the results and, if configured, the run summary
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the config file, recorded in the summary
/// * `stop` - Stop flag, set on operator interrupt
///
/// # Returns
///
/// * `Ok(CrawlReport)` - Crawl reached a terminal state and was persisted
/// * `Err(CrawlError)` - Setup or persistence failed
///
/// # Example
///
/// ```no_run
/// use pathwalker::config::load_config;
/// use pathwalker::crawler::crawl;
/// use pathwalker::state::StopSignal;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("config.toml"))?;
/// let (_stop_tx, stop) = StopSignal::channel();
/// let report = crawl(config, None, stop).await?;
/// println!("{} pages", report.results.len());
/// # Ok(())
/// # }
/// ```
pub async fn crawl(
    config: Config,
    config_hash: Option<String>,
    stop: StopSignal,
) -> Result<CrawlReport, CrawlError> {
    crawl_with(config, config_hash, stop, |session| {
        let transport = HttpTransport::new(session.tls_profile())?;
        Ok(Arc::new(transport) as Arc<dyn Transport>)
    })
    .await
}

/// Runs a crawl with transports built by `make_transport`
pub async fn crawl_with<F>(
    config: Config,
    config_hash: Option<String>,
    stop: StopSignal,
    make_transport: F,
) -> Result<CrawlReport, CrawlError>
where
    F: Fn(&IdentitySession) -> Result<Arc<dyn Transport>, CrawlError>,
{
    let config = Arc::new(config);
    let sink = ResultSink::new(&config.output.results_path);

    let mut members = Vec::with_capacity(config.identities.len());
    for identity in &config.identities {
        let session = Arc::new(IdentitySession::new(
            identity,
            &config.client.tls_profile,
            &config.client.cookie_name,
        )?);
        let transport = make_transport(&session)?;
        tracing::debug!(
            "Identity {} ready ({} workers, profile {})",
            session.name(),
            identity.workers,
            session.tls_profile()
        );
        members.push(ShardMember {
            session,
            transport,
            workers: identity.workers,
        });
    }

    let mut report = if config.crawl.traversal == TraversalPolicy::Sharded {
        ShardedCrawl::new(Arc::clone(&config), members)
            .with_sink(sink)
            .run(stop)
            .await?
    } else {
        if members.len() > 1 {
            tracing::warn!(
                "{} identities configured; {} traversal uses only the first",
                members.len(),
                config.crawl.traversal
            );
        }
        let member = members.into_iter().next().ok_or_else(|| {
            ConfigError::Validation("at least one identity is required".to_string())
        })?;

        Orchestrator::new(Arc::clone(&config), member.session, member.transport)?
            .with_sink(sink)
            .run(stop)
            .await?
    };

    report.summary = report.summary.with_config_hash(config_hash);

    if let Some(summary_path) = &config.output.summary_path {
        write_json_atomic(Path::new(summary_path), &report.summary)?;
        tracing::info!("Saved run summary to {}", summary_path);
    }

    Ok(report)
}
