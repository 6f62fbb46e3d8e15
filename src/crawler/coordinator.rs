//! Crawl orchestrator - single-identity crawl loop
//!
//! This module contains the main crawl loop that coordinates one identity:
//! - Checking the time budget and the stop flag
//! - Taking the next path from the frontier
//! - Fetching it with browser headers and the identity's token
//! - Classifying the response and updating the ledger
//! - Periodic token refresh, progress lines and checkpoints
//! - Waiting the delay chosen by the timing controller

use crate::config::Config;
use crate::crawler::classifier::{Classification, ResponseClassifier};
use crate::crawler::extractor::LinkExtractor;
use crate::crawler::fetcher::{browser_headers, FetchRequest, FetchResponse, Transport};
use crate::crawler::frontier::{QueuedPath, TraversalPolicy};
use crate::output::{log_progress, CrawlSummary, PageRecord, ResultSink};
use crate::state::{CrawlLedger, IdentitySession, RunState, StopSignal};
use crate::timing::TimingController;
use crate::CrawlError;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub summary: CrawlSummary,
    pub results: Vec<PageRecord>,
    /// True when the run ended on a hard block
    pub blocked: bool,
}

/// Joins the base URL and a path into an absolute URL
pub(crate) fn page_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// True on every `interval`-th count; an interval of 0 never fires
pub(crate) fn every(count: u64, interval: u64) -> bool {
    interval > 0 && count > 0 && count % interval == 0
}

/// Builds the request for a queued path as sent by `identity`
pub(crate) fn build_request(
    config: &Config,
    identity: &IdentitySession,
    item: &QueuedPath,
) -> Result<FetchRequest, CrawlError> {
    let url = page_url(&config.crawl.base_url, &item.path);
    let headers = browser_headers(
        &config.client.user_agent,
        &item.referer,
        (identity.cookie_name(), &identity.token()),
    )
    .map_err(|e| CrawlError::Transport(e.into()))?;

    Ok(FetchRequest {
        url,
        headers,
        timeout: Duration::from_secs(config.crawl.request_timeout),
    })
}

/// Single-identity crawl orchestrator
///
/// Drives the Running state through one [`Orchestrator::step`] per request
/// until a terminal [`RunState`] is reached.
pub struct Orchestrator<T: Transport> {
    config: Arc<Config>,
    transport: T,
    identity: Arc<IdentitySession>,
    timing: TimingController,
    extractor: LinkExtractor,
    classifier: ResponseClassifier,
    ledger: CrawlLedger,
    sink: Option<ResultSink>,
    state: RunState,
    last_latency: f64,
}

impl<T: Transport> Orchestrator<T> {
    /// Creates a new orchestrator with the frontier seeded
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `identity` - Session the requests are sent as
    /// * `transport` - Transport bound to that session
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Ready to step
    /// * `Err(CrawlError)` - A pattern failed to compile
    pub fn new(
        config: Arc<Config>,
        identity: Arc<IdentitySession>,
        transport: T,
    ) -> Result<Self, CrawlError> {
        let policy = match config.crawl.traversal {
            TraversalPolicy::Greedy => TraversalPolicy::Greedy,
            TraversalPolicy::BreadthFirst => TraversalPolicy::BreadthFirst,
            TraversalPolicy::Sharded => {
                tracing::warn!("Sharded traversal needs a worker pool; crawling breadth-first");
                TraversalPolicy::BreadthFirst
            }
        };

        let ledger = CrawlLedger::new(policy, &config.crawl.start_path, &config.crawl.base_url);
        let extractor = LinkExtractor::new(&config.crawl.link_pattern)?;
        let classifier = ResponseClassifier::new()?;
        let timing = TimingController::new(config.timing.clone());

        Ok(Self {
            config,
            transport,
            identity,
            timing,
            extractor,
            classifier,
            ledger,
            sink: None,
            state: RunState::Running,
            last_latency: 0.0,
        })
    }

    /// Enables checkpoints and the final persist to `sink`
    pub fn with_sink(mut self, sink: ResultSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replaces the timing controller (reproducible runs and tests)
    pub fn with_timing(mut self, timing: TimingController) -> Self {
        self.timing = timing;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn ledger(&self) -> &CrawlLedger {
        &self.ledger
    }

    pub fn identity(&self) -> &IdentitySession {
        &self.identity
    }

    /// Runs one iteration of the crawl loop
    ///
    /// # Returns
    ///
    /// The run state after the iteration; `Running` means another step is due
    pub async fn step(&mut self, stop: &mut StopSignal) -> RunState {
        if self.state.is_terminal() {
            return self.state;
        }

        if stop.is_set() {
            return self.finish(RunState::Interrupted);
        }

        if self.ledger.metrics().elapsed() >= Duration::from_secs(self.config.crawl.time_limit) {
            return self.finish(RunState::TimeLimitExceeded);
        }

        let Some(item) = self.ledger.next_path() else {
            return self.finish(RunState::FrontierExhausted);
        };

        tracing::debug!("Fetching {}", item.path);
        self.identity.record_attempt();

        let started = Instant::now();
        let fetched = match build_request(&self.config, &self.identity, &item) {
            Ok(request) => {
                tokio::select! {
                    biased;
                    _ = stop.wait() => {
                        self.ledger.release(item);
                        return self.finish(RunState::Interrupted);
                    }
                    result = self.transport.fetch(&request) => result.map_err(CrawlError::from),
                }
            }
            Err(e) => Err(e),
        };
        self.last_latency = started.elapsed().as_secs_f64();

        let response = match fetched {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!("Transport error on {}: {}", item.path, e);
                None
            }
        };

        match (self.classifier.classify(response.as_ref()), response) {
            (Classification::Blocked, response) => {
                let status = response.map(|r| r.status).unwrap_or_default();
                tracing::warn!(
                    "Blocked on {} (HTTP {}) after {} pages",
                    item.path,
                    status,
                    self.ledger.metrics().success
                );
                self.identity.mark_blocked();
                self.ledger.record_block(item);
                return self.finish(RunState::Blocked);
            }
            (Classification::TransportError, _) => {
                self.ledger.record_transport_error(item);
            }
            (Classification::SoftInvalid, response) => {
                tracing::debug!(
                    "Soft-invalid response for {} (HTTP {})",
                    item.path,
                    response.map(|r| r.status).unwrap_or_default()
                );
                self.ledger.record_soft_invalid(item);
            }
            (Classification::Success, Some(response)) => {
                let count = self.collect(item, response);
                if count >= self.config.crawl.target_requests {
                    return self.finish(RunState::TargetReached);
                }
            }
            (Classification::Success, None) => {
                self.ledger.record_transport_error(item);
            }
        }

        let delay = self
            .timing
            .next_delay(self.ledger.metrics().requests, self.last_latency);

        tokio::select! {
            biased;
            _ = stop.wait() => self.finish(RunState::Interrupted),
            _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => self.state,
        }
    }

    /// Runs steps until a terminal state and persists the results
    pub async fn run(mut self, mut stop: StopSignal) -> Result<CrawlReport, CrawlError> {
        tracing::info!(
            "Starting {} crawl of {}{} as {} (target {} pages, limit {}s)",
            self.ledger.frontier().policy(),
            self.config.crawl.base_url,
            self.config.crawl.start_path,
            self.identity.name(),
            self.config.crawl.target_requests,
            self.config.crawl.time_limit
        );

        while !self.step(&mut stop).await.is_terminal() {}

        let report = self.report();
        if let Some(sink) = &self.sink {
            sink.persist(&report.results, report.blocked)?;
            tracing::info!("Saved {} results to {}", report.results.len(), sink.path().display());
        }

        Ok(report)
    }

    /// Snapshot of the run as it stands
    pub fn report(&self) -> CrawlReport {
        let frontier = self.ledger.frontier();
        let summary = CrawlSummary::from_metrics(
            self.state,
            self.ledger.metrics(),
            frontier.visited_len(),
            frontier.pending_len(),
            self.timing.entropy(),
            vec![self.identity.report()],
        );

        CrawlReport {
            summary,
            results: self.ledger.results().to_vec(),
            blocked: self.state == RunState::Blocked,
        }
    }

    /// Handles a successful page
    ///
    /// # Returns
    ///
    /// Number of successful pages so far
    fn collect(&mut self, item: QueuedPath, response: FetchResponse) -> u64 {
        let url = page_url(&self.config.crawl.base_url, &item.path);
        let hash = self.extractor.extract_hash(&response.body);
        let links = self.extractor.extract_links(&response.body);
        let path = item.path.clone();

        let count = self
            .ledger
            .record_success(item, &url, hash, response.status, links);
        let identity_count = self.identity.record_success();

        if every(identity_count, self.config.crawl.cookie_check_interval)
            && self.identity.refresh_token(&response.headers)
        {
            tracing::info!("Token rotated for identity {}", self.identity.name());
        }

        if every(count, self.config.crawl.progress_interval) {
            log_progress(
                self.ledger.metrics(),
                self.config.crawl.target_requests,
                self.ledger.frontier().pending_len(),
                &path,
            );
        }

        if every(count, self.config.crawl.checkpoint_interval) {
            self.checkpoint();
        }

        if every(count, self.config.timing.entropy_check_interval) {
            self.check_entropy();
        }

        count
    }

    fn checkpoint(&self) {
        let Some(sink) = &self.sink else {
            return;
        };

        match sink.persist(self.ledger.results(), false) {
            Ok(()) => tracing::info!("Checkpoint: {} results saved", self.ledger.results().len()),
            Err(e) => tracing::warn!("Checkpoint failed: {}", e),
        }
    }

    fn check_entropy(&self) {
        let entropy = self.timing.entropy();
        match self.config.timing.entropy_target {
            Some(target) if entropy < target => {
                tracing::warn!(
                    "Delay entropy {:.2} bits below target {:.2} bits",
                    entropy,
                    target
                );
            }
            _ => tracing::debug!("Delay entropy {:.2} bits", entropy),
        }
    }

    fn finish(&mut self, state: RunState) -> RunState {
        if !self.state.is_terminal() {
            tracing::info!(
                "Crawl finished: {} ({} pages, {} errors, {} blocks)",
                state,
                self.ledger.metrics().success,
                self.ledger.metrics().errors,
                self.ledger.metrics().blocks
            );
            self.state = state;
        }
        self.state
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{
        ClientConfig, CrawlConfig, IdentityConfig, OutputConfig, Span, TimingConfig,
        DEFAULT_LINK_PATTERN,
    };
    use crate::crawler::fetcher::TransportError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
    use tempfile::TempDir;

    /// Timing that never waits noticeably
    pub(crate) fn create_test_timing() -> TimingConfig {
        TimingConfig {
            target_rps: 1_000_000.0,
            burst_size: Span::new(1_000, 1_000),
            burst_interval: Span::new(0.0, 0.0),
            cooldown_every: Span::new(1_000_000, 1_000_000),
            cooldown_duration: Span::new(0.0, 0.0),
            request_variance: 0.0,
            think_time: Span::new(0.0, 0.0),
            activity_phase: None,
            latency_threshold: None,
            fast_delay: Span::new(0.0, 0.0),
            entropy_target: None,
            entropy_check_interval: 200,
            seed: Some(1),
        }
    }

    pub(crate) fn create_test_config(target: u64, traversal: TraversalPolicy) -> Config {
        Config {
            crawl: CrawlConfig {
                base_url: "https://example.com".to_string(),
                start_path: "/scraping/1".to_string(),
                target_requests: target,
                time_limit: 3600,
                traversal,
                request_timeout: 5,
                cookie_check_interval: 200,
                progress_interval: 50,
                checkpoint_interval: 0,
                link_pattern: DEFAULT_LINK_PATTERN.to_string(),
            },
            client: ClientConfig::default(),
            timing: create_test_timing(),
            identities: vec![IdentityConfig {
                name: "primary".to_string(),
                token: "token-1".to_string(),
                tls_profile: None,
                workers: 1,
            }],
            output: OutputConfig {
                results_path: "results.json".to_string(),
                summary_path: None,
            },
        }
    }

    type Handler = dyn Fn(&FetchRequest) -> Result<FetchResponse, TransportError> + Send + Sync;

    /// Transport answering from a closure and recording every request
    pub(crate) struct ScriptedTransport {
        handler: Box<Handler>,
        pub(crate) requests: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new<F>(handler: F) -> Self
        where
            F: Fn(&FetchRequest) -> Result<FetchResponse, TransportError> + Send + Sync + 'static,
        {
            Self {
                handler: Box::new(handler),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
            self.requests.lock().push(request.clone());
            (self.handler)(request)
        }
    }

    pub(crate) fn html(status: u16, body: impl Into<String>) -> FetchResponse {
        FetchResponse {
            status,
            body: body.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Page number `n` of a chain where each page links to `n + 1`
    pub(crate) fn chain_page(url: &str) -> FetchResponse {
        let n: u64 = url
            .rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        html(
            200,
            format!(
                r#"<html><body><a href="/scraping/{}">next</a></body></html>"#,
                n + 1
            ),
        )
    }

    fn create_orchestrator(
        config: Config,
        transport: ScriptedTransport,
    ) -> Orchestrator<Arc<ScriptedTransport>> {
        let identity = Arc::new(
            IdentitySession::new(
                &config.identities[0],
                &config.client.tls_profile,
                &config.client.cookie_name,
            )
            .unwrap(),
        );
        Orchestrator::new(Arc::new(config), identity, Arc::new(transport)).unwrap()
    }

    #[tokio::test]
    async fn test_first_page_enqueues_its_links() {
        let transport = ScriptedTransport::new(|_| {
            Ok(html(
                200,
                r#"<a href="/scraping/2"></a><a href="/scraping/3"></a><a href="/scraping/4"></a>"#,
            ))
        });
        let mut orchestrator =
            create_orchestrator(create_test_config(10, TraversalPolicy::BreadthFirst), transport);
        let (_stop_tx, mut stop) = StopSignal::channel();

        let state = orchestrator.step(&mut stop).await;

        assert_eq!(state, RunState::Running);
        assert_eq!(orchestrator.ledger().frontier().pending_len(), 3);
        assert_eq!(orchestrator.ledger().frontier().visited_len(), 4);
        assert_eq!(orchestrator.ledger().results().len(), 1);
        assert_eq!(orchestrator.ledger().results()[0].path, "/scraping/1");
        assert_eq!(orchestrator.ledger().results()[0].hash, None);
    }

    #[tokio::test]
    async fn test_forbidden_response_blocks_run() {
        let transport = ScriptedTransport::new(|_| Ok(html(403, "Forbidden")));
        let mut orchestrator =
            create_orchestrator(create_test_config(10, TraversalPolicy::BreadthFirst), transport);
        let (_stop_tx, mut stop) = StopSignal::channel();

        let state = orchestrator.step(&mut stop).await;

        assert_eq!(state, RunState::Blocked);
        assert!(orchestrator.ledger().results().is_empty());
        assert_eq!(orchestrator.ledger().metrics().errors, 0);
        assert_eq!(orchestrator.ledger().metrics().blocks, 1);
        assert!(orchestrator.identity().is_blocked());

        // Terminal: no further requests are issued
        assert_eq!(orchestrator.step(&mut stop).await, RunState::Blocked);
        assert_eq!(orchestrator.ledger().metrics().requests, 1);
    }

    #[tokio::test]
    async fn test_target_reached_after_exact_iterations() {
        let transport = ScriptedTransport::new(|request| Ok(chain_page(&request.url)));
        let mut orchestrator =
            create_orchestrator(create_test_config(5, TraversalPolicy::BreadthFirst), transport);
        let (_stop_tx, mut stop) = StopSignal::channel();

        let mut iterations = 0;
        let mut state = RunState::Running;
        while !state.is_terminal() && iterations < 100 {
            state = orchestrator.step(&mut stop).await;
            iterations += 1;
        }

        assert_eq!(state, RunState::TargetReached);
        assert_eq!(iterations, 5);
        assert_eq!(orchestrator.ledger().results().len(), 5);
    }

    #[tokio::test]
    async fn test_transport_error_requeues_path() {
        let transport = ScriptedTransport::new(|request| {
            Err(TransportError::Timeout {
                url: request.url.clone(),
            })
        });
        let mut orchestrator =
            create_orchestrator(create_test_config(10, TraversalPolicy::BreadthFirst), transport);
        let (_stop_tx, mut stop) = StopSignal::channel();

        let state = orchestrator.step(&mut stop).await;

        assert_eq!(state, RunState::Running);
        assert_eq!(orchestrator.ledger().metrics().errors, 1);
        assert_eq!(orchestrator.ledger().metrics().blocks, 0);
        assert_eq!(orchestrator.ledger().frontier().pending_len(), 1);
    }

    #[tokio::test]
    async fn test_soft_invalid_consumes_path() {
        let transport = ScriptedTransport::new(|_| Ok(html(200, "please complete the captcha")));
        let mut orchestrator =
            create_orchestrator(create_test_config(10, TraversalPolicy::BreadthFirst), transport);
        let (_stop_tx, mut stop) = StopSignal::channel();

        assert_eq!(orchestrator.step(&mut stop).await, RunState::Running);
        assert_eq!(orchestrator.ledger().metrics().errors, 1);
        assert_eq!(orchestrator.ledger().frontier().pending_len(), 0);

        assert_eq!(orchestrator.step(&mut stop).await, RunState::FrontierExhausted);
    }

    #[tokio::test]
    async fn test_time_limit_checked_before_fetch() {
        let mut config = create_test_config(10, TraversalPolicy::BreadthFirst);
        config.crawl.time_limit = 0;
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(html(200, ""))));
        let identity = Arc::new(
            IdentitySession::new(&config.identities[0], "chrome_131", "datadome").unwrap(),
        );
        let mut orchestrator =
            Orchestrator::new(Arc::new(config), identity, Arc::clone(&transport)).unwrap();
        let (_stop_tx, mut stop) = StopSignal::channel();

        assert_eq!(orchestrator.step(&mut stop).await, RunState::TimeLimitExceeded);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_flag_interrupts() {
        let transport = ScriptedTransport::new(|request| Ok(chain_page(&request.url)));
        let mut orchestrator =
            create_orchestrator(create_test_config(10, TraversalPolicy::BreadthFirst), transport);
        let (stop_tx, mut stop) = StopSignal::channel();

        assert_eq!(orchestrator.step(&mut stop).await, RunState::Running);
        stop_tx.send(true).unwrap();
        assert_eq!(orchestrator.step(&mut stop).await, RunState::Interrupted);
        assert_eq!(orchestrator.ledger().results().len(), 1);
    }

    #[tokio::test]
    async fn test_greedy_follows_first_link() {
        let transport = ScriptedTransport::new(|request| {
            if request.url.ends_with("/scraping/1") {
                Ok(html(200, r#"<a href="/scraping/9"></a><a href="/scraping/2"></a>"#))
            } else {
                Ok(html(200, r#"<a href="/scraping/1"></a>"#))
            }
        });
        let mut orchestrator =
            create_orchestrator(create_test_config(10, TraversalPolicy::Greedy), transport);
        let (_stop_tx, mut stop) = StopSignal::channel();

        assert_eq!(orchestrator.step(&mut stop).await, RunState::Running);
        assert_eq!(orchestrator.ledger().frontier().pending_len(), 1);
        assert!(!orchestrator.ledger().frontier().is_visited("/scraping/2"));

        // Page 9 only links back to a visited page: dead end
        assert_eq!(orchestrator.step(&mut stop).await, RunState::Running);
        assert_eq!(orchestrator.step(&mut stop).await, RunState::FrontierExhausted);

        let paths: Vec<_> = orchestrator
            .ledger()
            .results()
            .iter()
            .map(|r| r.path.as_str())
            .collect();
        assert_eq!(paths, vec!["/scraping/1", "/scraping/9"]);
    }

    #[tokio::test]
    async fn test_referer_and_token_rotation() {
        let mut config = create_test_config(10, TraversalPolicy::BreadthFirst);
        config.crawl.cookie_check_interval = 1;
        let transport = Arc::new(ScriptedTransport::new(|request| {
            let mut response = chain_page(&request.url);
            response.headers.insert(
                SET_COOKIE,
                HeaderValue::from_static("datadome=rotated; Path=/; Secure"),
            );
            Ok(response)
        }));
        let identity = Arc::new(
            IdentitySession::new(&config.identities[0], "chrome_131", "datadome").unwrap(),
        );
        let mut orchestrator =
            Orchestrator::new(Arc::new(config), identity, Arc::clone(&transport)).unwrap();
        let (_stop_tx, mut stop) = StopSignal::channel();

        orchestrator.step(&mut stop).await;
        orchestrator.step(&mut stop).await;

        let requests = transport.requests.lock();
        assert_eq!(requests[0].headers.get(COOKIE).unwrap(), "datadome=token-1");
        assert_eq!(requests[0].headers.get("referer").unwrap(), "https://example.com");
        assert_eq!(requests[1].headers.get(COOKIE).unwrap(), "datadome=rotated");
        assert_eq!(
            requests[1].headers.get("referer").unwrap(),
            "https://example.com/scraping/1"
        );
    }

    #[tokio::test]
    async fn test_run_persists_results() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("results.json");
        let transport = ScriptedTransport::new(|request| {
            if request.url.ends_with("/scraping/3") {
                Ok(html(403, "Forbidden"))
            } else {
                Ok(chain_page(&request.url))
            }
        });
        let orchestrator =
            create_orchestrator(create_test_config(10, TraversalPolicy::BreadthFirst), transport)
                .with_sink(ResultSink::new(&path));
        let (_stop_tx, stop) = StopSignal::channel();

        let report = orchestrator.run(stop).await.unwrap();

        assert_eq!(report.summary.state, RunState::Blocked);
        assert!(report.blocked);
        assert_eq!(report.results.len(), 2);

        let document = ResultSink::load(&path).unwrap();
        assert_eq!(document.total, 2);
        assert!(document.blocked);
        assert_eq!(document.results, report.results);
    }

    #[test]
    fn test_every() {
        assert!(!every(0, 5));
        assert!(every(5, 5));
        assert!(!every(6, 5));
        assert!(!every(5, 0));
    }
}
