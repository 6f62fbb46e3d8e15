//! Sharded crawl - several identities draining one shared frontier
//!
//! Each identity runs a pool of worker tasks. All workers share one
//! [`CrawlLedger`] behind a lock, so a path is handed to exactly one worker and
//! every discovered link is enqueued at most once. When an identity is blocked,
//! its workers put their path back and exit; the remaining identities carry on.
//!
//! The run halts when:
//! - the shared success count reaches the target
//! - the time budget runs out
//! - nothing is pending and no worker has a path in flight
//! - every identity is blocked
//! - the operator interrupts

use crate::config::Config;
use crate::crawler::classifier::{Classification, ResponseClassifier};
use crate::crawler::coordinator::{build_request, every, page_url, CrawlReport};
use crate::crawler::extractor::LinkExtractor;
use crate::crawler::fetcher::{FetchResponse, Transport, TransportError};
use crate::crawler::frontier::{QueuedPath, TraversalPolicy};
use crate::output::{log_progress, CrawlSummary, PageRecord, ResultSink};
use crate::state::{CrawlLedger, IdentitySession, RunState, StopSignal};
use crate::timing::TimingController;
use crate::CrawlError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Pause of a worker that found the queue empty while others are in flight
const IDLE_WAIT: Duration = Duration::from_millis(25);

/// One identity taking part in a sharded crawl
pub struct ShardMember {
    pub session: Arc<IdentitySession>,
    pub transport: Arc<dyn Transport>,
    pub workers: u32,
}

struct SharedCrawl {
    ledger: CrawlLedger,
    halt: Option<RunState>,
}

/// Records the first halt reason and wakes every worker
fn raise_halt(sender: &watch::Sender<bool>, shared: &mut SharedCrawl, state: RunState) {
    if shared.halt.is_none() {
        tracing::info!("Halting sharded crawl: {}", state);
        shared.halt = Some(state);
    }
    let _ = sender.send(true);
}

/// Multi-identity crawl over a shared frontier
pub struct ShardedCrawl {
    config: Arc<Config>,
    members: Vec<ShardMember>,
    sink: Option<ResultSink>,
}

impl ShardedCrawl {
    /// Creates a sharded crawl
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `members` - Identities with their transports and worker counts
    pub fn new(config: Arc<Config>, members: Vec<ShardMember>) -> Self {
        Self {
            config,
            members,
            sink: None,
        }
    }

    /// Enables checkpoints and the final persist to `sink`
    pub fn with_sink(mut self, sink: ResultSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Runs every worker to completion and persists the results
    pub async fn run(self, mut stop: StopSignal) -> Result<CrawlReport, CrawlError> {
        let config = self.config;
        let extractor = LinkExtractor::new(&config.crawl.link_pattern)?;
        let classifier = ResponseClassifier::new()?;

        let shared = Arc::new(Mutex::new(SharedCrawl {
            ledger: CrawlLedger::new(
                TraversalPolicy::Sharded,
                &config.crawl.start_path,
                &config.crawl.base_url,
            ),
            halt: None,
        }));
        let (halt_tx, halt_rx) = watch::channel(false);
        let halt_tx = Arc::new(halt_tx);

        if stop.is_set() {
            raise_halt(&halt_tx, &mut shared.lock(), RunState::Interrupted);
        }

        let sessions: Arc<Vec<Arc<IdentitySession>>> =
            Arc::new(self.members.iter().map(|m| Arc::clone(&m.session)).collect());

        let total_workers: u32 = self.members.iter().map(|m| m.workers).sum();
        tracing::info!(
            "Starting sharded crawl of {}{} with {} identities and {} workers (target {} pages)",
            config.crawl.base_url,
            config.crawl.start_path,
            self.members.len(),
            total_workers,
            config.crawl.target_requests
        );

        let watcher = {
            let shared = Arc::clone(&shared);
            let halt_tx = Arc::clone(&halt_tx);
            tokio::spawn(async move {
                stop.wait().await;
                tracing::info!("Interrupt received, stopping workers");
                raise_halt(&halt_tx, &mut shared.lock(), RunState::Interrupted);
            })
        };

        let mut handles = Vec::new();
        let mut worker_index: u64 = 0;
        for member in &self.members {
            for slot in 0..member.workers {
                let timing = match config.timing.seed {
                    Some(seed) => {
                        TimingController::seeded(config.timing.clone(), seed.wrapping_add(worker_index))
                    }
                    None => TimingController::new(config.timing.clone()),
                };

                let worker = Worker {
                    name: format!("{}#{}", member.session.name(), slot + 1),
                    config: Arc::clone(&config),
                    shared: Arc::clone(&shared),
                    identity: Arc::clone(&member.session),
                    sessions: Arc::clone(&sessions),
                    transport: Arc::clone(&member.transport),
                    timing,
                    extractor: extractor.clone(),
                    classifier: classifier.clone(),
                    halt: Arc::clone(&halt_tx),
                    stop: StopSignal::new(halt_rx.clone()),
                    sink: self.sink.clone(),
                    attempts: 0,
                    last_latency: 0.0,
                };
                handles.push(tokio::spawn(worker.run()));
                worker_index += 1;
            }
        }

        let mut entropies = Vec::with_capacity(handles.len());
        for handle in handles {
            entropies.push(handle.await?);
        }
        watcher.abort();

        let shared = shared.lock();
        let state = shared.halt.unwrap_or_else(|| {
            if sessions.iter().all(|s| s.is_blocked()) {
                RunState::Blocked
            } else {
                RunState::FrontierExhausted
            }
        });

        let entropy = if entropies.is_empty() {
            0.0
        } else {
            entropies.iter().sum::<f64>() / entropies.len() as f64
        };

        let frontier = shared.ledger.frontier();
        let summary = CrawlSummary::from_metrics(
            state,
            shared.ledger.metrics(),
            frontier.visited_len(),
            frontier.pending_len(),
            entropy,
            sessions.iter().map(|s| s.report()).collect(),
        );
        let report = CrawlReport {
            summary,
            results: shared.ledger.results().to_vec(),
            blocked: state == RunState::Blocked,
        };
        drop(shared);

        tracing::info!(
            "Sharded crawl finished: {} ({} pages, {} errors, {} blocks)",
            state,
            report.summary.success,
            report.summary.errors,
            report.summary.blocks
        );

        if let Some(sink) = &self.sink {
            sink.persist(&report.results, report.blocked)?;
            tracing::info!("Saved {} results to {}", report.results.len(), sink.path().display());
        }

        Ok(report)
    }
}

enum Claim {
    Path(QueuedPath),
    Idle,
    Done,
}

struct Worker {
    name: String,
    config: Arc<Config>,
    shared: Arc<Mutex<SharedCrawl>>,
    identity: Arc<IdentitySession>,
    sessions: Arc<Vec<Arc<IdentitySession>>>,
    transport: Arc<dyn Transport>,
    timing: TimingController,
    extractor: LinkExtractor,
    classifier: ResponseClassifier,
    halt: Arc<watch::Sender<bool>>,
    stop: StopSignal,
    sink: Option<ResultSink>,
    attempts: u64,
    last_latency: f64,
}

impl Worker {
    /// Worker loop; returns the entropy of the delays it emitted
    async fn run(mut self) -> f64 {
        tracing::debug!("Worker {} started", self.name);

        loop {
            let item = match self.claim() {
                Claim::Path(item) => item,
                Claim::Idle => {
                    tokio::select! {
                        _ = self.stop.wait() => break,
                        _ = tokio::time::sleep(IDLE_WAIT) => continue,
                    }
                }
                Claim::Done => break,
            };

            if self.identity.is_blocked() {
                self.shared.lock().ledger.release(item);
                break;
            }

            let delay = self.timing.next_delay(self.attempts, self.last_latency);
            let request = tokio::select! {
                biased;
                _ = self.stop.wait() => {
                    self.shared.lock().ledger.release(item);
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => {
                    build_request(&self.config, &self.identity, &item)
                }
            };

            self.attempts += 1;
            self.identity.record_attempt();
            let started = Instant::now();

            let fetched = match request {
                Ok(request) => {
                    tokio::select! {
                        biased;
                        _ = self.stop.wait() => {
                            self.shared.lock().ledger.release(item);
                            break;
                        }
                        result = self.transport.fetch(&request) => result,
                    }
                }
                Err(CrawlError::Transport(e)) => Err(e),
                Err(e) => Err(TransportError::Other {
                    url: page_url(&self.config.crawl.base_url, &item.path),
                    message: e.to_string(),
                }),
            };
            self.last_latency = started.elapsed().as_secs_f64();

            if !self.settle(item, fetched) {
                break;
            }
        }

        tracing::debug!("Worker {} stopped after {} attempts", self.name, self.attempts);
        self.timing.entropy()
    }

    /// Takes the next path, or decides that the run is over
    fn claim(&self) -> Claim {
        let mut shared = self.shared.lock();

        if shared.halt.is_some() || self.stop.is_set() {
            return Claim::Done;
        }

        if shared.ledger.metrics().success >= self.config.crawl.target_requests {
            raise_halt(&self.halt, &mut shared, RunState::TargetReached);
            return Claim::Done;
        }

        if shared.ledger.metrics().elapsed() >= Duration::from_secs(self.config.crawl.time_limit) {
            raise_halt(&self.halt, &mut shared, RunState::TimeLimitExceeded);
            return Claim::Done;
        }

        if let Some(item) = shared.ledger.next_path() {
            return Claim::Path(item);
        }

        if shared.ledger.is_exhausted() {
            raise_halt(&self.halt, &mut shared, RunState::FrontierExhausted);
            return Claim::Done;
        }

        Claim::Idle
    }

    /// Classifies a fetch outcome and updates the shared ledger
    ///
    /// Returns false when this worker must stop.
    fn settle(&mut self, item: QueuedPath, fetched: Result<FetchResponse, TransportError>) -> bool {
        let response = match fetched {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!("[{}] Transport error on {}: {}", self.name, item.path, e);
                None
            }
        };

        match (self.classifier.classify(response.as_ref()), response) {
            (Classification::Blocked, _) => {
                if self.identity.mark_blocked() {
                    tracing::warn!(
                        "Identity {} blocked on {} after {} pages",
                        self.identity.name(),
                        item.path,
                        self.identity.successes()
                    );
                }

                let mut shared = self.shared.lock();
                shared.ledger.record_block(item);
                if self.sessions.iter().all(|s| s.is_blocked()) {
                    raise_halt(&self.halt, &mut shared, RunState::Blocked);
                }
                false
            }
            (Classification::SoftInvalid, _) => {
                tracing::debug!("[{}] Soft-invalid response for {}", self.name, item.path);
                self.shared.lock().ledger.record_soft_invalid(item);
                true
            }
            (Classification::Success, Some(response)) => {
                self.collect(item, response);
                true
            }
            (Classification::TransportError, _) | (Classification::Success, None) => {
                self.shared.lock().ledger.record_transport_error(item);
                true
            }
        }
    }

    fn collect(&mut self, item: QueuedPath, response: FetchResponse) {
        let url = page_url(&self.config.crawl.base_url, &item.path);
        let hash = self.extractor.extract_hash(&response.body);
        let links = self.extractor.extract_links(&response.body);
        let path = item.path.clone();

        let snapshot: Option<Vec<PageRecord>>;
        let count = {
            let mut shared = self.shared.lock();
            let count = shared
                .ledger
                .record_success(item, &url, hash, response.status, links);

            if every(count, self.config.crawl.progress_interval) {
                log_progress(
                    shared.ledger.metrics(),
                    self.config.crawl.target_requests,
                    shared.ledger.frontier().pending_len(),
                    &path,
                );
            }

            snapshot = (self.sink.is_some()
                && every(count, self.config.crawl.checkpoint_interval))
            .then(|| shared.ledger.results().to_vec());

            if count >= self.config.crawl.target_requests {
                raise_halt(&self.halt, &mut shared, RunState::TargetReached);
            }
            count
        };

        let identity_count = self.identity.record_success();
        if every(identity_count, self.config.crawl.cookie_check_interval)
            && self.identity.refresh_token(&response.headers)
        {
            tracing::info!("Token rotated for identity {}", self.identity.name());
        }

        if let (Some(results), Some(sink)) = (snapshot, &self.sink) {
            match sink.persist(&results, false) {
                Ok(()) => tracing::info!("Checkpoint: {} results saved", results.len()),
                Err(e) => tracing::warn!("Checkpoint failed: {}", e),
            }
        }

        if every(count, self.config.timing.entropy_check_interval) {
            let entropy = self.timing.entropy();
            match self.config.timing.entropy_target {
                Some(target) if entropy < target => tracing::warn!(
                    "[{}] Delay entropy {:.2} bits below target {:.2} bits",
                    self.name,
                    entropy,
                    target
                ),
                _ => tracing::debug!("[{}] Delay entropy {:.2} bits", self.name, entropy),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use async_trait::async_trait;
    use crate::crawler::coordinator::tests::{
        chain_page, create_test_config, html, ScriptedTransport,
    };
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Transport answering after a fixed delay
    struct DelayedTransport {
        delay: Duration,
        inner: ScriptedTransport,
    }

    #[async_trait]
    impl Transport for DelayedTransport {
        async fn fetch(
            &self,
            request: &crate::crawler::FetchRequest,
        ) -> Result<FetchResponse, TransportError> {
            tokio::time::sleep(self.delay).await;
            self.inner.fetch(request).await
        }
    }

    fn create_member(name: &str, workers: u32, transport: impl Transport + 'static) -> ShardMember {
        let config = IdentityConfig {
            name: name.to_string(),
            token: format!("{}-token", name),
            tls_profile: None,
            workers,
        };
        ShardMember {
            session: Arc::new(IdentitySession::new(&config, "chrome_131", "datadome").unwrap()),
            transport: Arc::new(transport),
            workers,
        }
    }

    /// Page `n` links to `2n` and `2n + 1`
    fn tree_page(url: &str) -> FetchResponse {
        let n: u64 = url
            .rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);
        html(
            200,
            format!(
                r#"<a href="/scraping/{}"></a><a href="/scraping/{}"></a>"#,
                2 * n,
                2 * n + 1
            ),
        )
    }

    fn assert_unique_paths(results: &[PageRecord]) {
        let unique: HashSet<_> = results.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(unique.len(), results.len(), "a path was collected twice");
    }

    #[tokio::test]
    async fn test_sharded_reaches_target() {
        let config = Arc::new(create_test_config(20, TraversalPolicy::Sharded));
        let members = vec![
            create_member("a", 2, ScriptedTransport::new(|r| Ok(tree_page(&r.url)))),
            create_member("b", 2, ScriptedTransport::new(|r| Ok(tree_page(&r.url)))),
        ];
        let (_stop_tx, stop) = StopSignal::channel();

        let report = ShardedCrawl::new(config, members).run(stop).await.unwrap();

        assert_eq!(report.summary.state, RunState::TargetReached);
        assert!(report.results.len() >= 20);
        assert!(!report.blocked);
        assert_unique_paths(&report.results);
        assert_eq!(report.summary.identities.len(), 2);
    }

    #[tokio::test]
    async fn test_blocked_identity_hands_over_paths() {
        let config = Arc::new(create_test_config(6, TraversalPolicy::Sharded));
        let members = vec![
            create_member("burned", 1, ScriptedTransport::new(|_| Ok(html(403, "Forbidden")))),
            create_member(
                "fresh",
                1,
                DelayedTransport {
                    delay: Duration::from_millis(20),
                    inner: ScriptedTransport::new(|r| Ok(tree_page(&r.url))),
                },
            ),
        ];
        let (_stop_tx, stop) = StopSignal::channel();

        let report = ShardedCrawl::new(config, members).run(stop).await.unwrap();

        assert_eq!(report.summary.state, RunState::TargetReached);
        assert!(report.results.len() >= 6);
        assert_unique_paths(&report.results);

        let burned = &report.summary.identities[0];
        let fresh = &report.summary.identities[1];
        assert!(burned.blocked);
        assert_eq!(burned.successes, 0);
        assert!(!fresh.blocked);
        assert!(report.summary.blocks <= 1);
        assert_eq!(report.summary.errors, 0);
    }

    #[tokio::test]
    async fn test_all_identities_blocked() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("results.json");
        let config = Arc::new(create_test_config(10, TraversalPolicy::Sharded));
        let members = vec![
            create_member("a", 2, ScriptedTransport::new(|_| Ok(html(429, "")))),
            create_member("b", 1, ScriptedTransport::new(|_| Ok(html(403, "")))),
        ];
        let (_stop_tx, stop) = StopSignal::channel();

        let report = ShardedCrawl::new(config, members)
            .with_sink(ResultSink::new(&path))
            .run(stop)
            .await
            .unwrap();

        assert_eq!(report.summary.state, RunState::Blocked);
        assert!(report.blocked);
        assert!(report.results.is_empty());
        // The seed path is never lost
        assert_eq!(report.summary.pending, 1);

        let document = ResultSink::load(&path).unwrap();
        assert!(document.blocked);
        assert_eq!(document.total, 0);
    }

    #[tokio::test]
    async fn test_sharded_frontier_exhausted() {
        let config = Arc::new(create_test_config(10, TraversalPolicy::Sharded));
        let members = vec![create_member(
            "a",
            3,
            ScriptedTransport::new(|r| {
                if r.url.ends_with("/scraping/3") {
                    Ok(html(200, "<p>end</p>"))
                } else {
                    Ok(chain_page(&r.url))
                }
            }),
        )];
        let (_stop_tx, stop) = StopSignal::channel();

        let report = ShardedCrawl::new(config, members).run(stop).await.unwrap();

        assert_eq!(report.summary.state, RunState::FrontierExhausted);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.summary.pending, 0);
    }

    #[tokio::test]
    async fn test_sharded_interrupted_before_start() {
        let config = Arc::new(create_test_config(10, TraversalPolicy::Sharded));
        let transport = ScriptedTransport::new(|r| Ok(tree_page(&r.url)));
        let members = vec![create_member("a", 2, transport)];
        let (stop_tx, stop) = StopSignal::channel();
        stop_tx.send(true).unwrap();

        let report = ShardedCrawl::new(config, members).run(stop).await.unwrap();

        assert_eq!(report.summary.state, RunState::Interrupted);
        assert_eq!(report.summary.total_requests, 0);
    }
}
