/// Crawl ledger: frontier, collected results and counters of one run
///
/// Every path handed out by [`CrawlLedger::next_path`] is in flight until
/// exactly one of the `record_*` methods or [`CrawlLedger::release`] settles it.
/// In sharded mode the ledger sits behind a single lock so that the
/// dequeue-mark-enqueue sequence stays atomic across workers.
use crate::crawler::{Frontier, QueuedPath, TraversalPolicy};
use crate::output::{Metrics, PageRecord};

#[derive(Debug)]
pub struct CrawlLedger {
    frontier: Frontier,
    results: Vec<PageRecord>,
    metrics: Metrics,
    in_flight: usize,
}

impl CrawlLedger {
    /// Creates a ledger whose frontier holds the starting path
    ///
    /// # Arguments
    ///
    /// * `policy` - Traversal policy of the frontier
    /// * `start_path` - Path the crawl begins at
    /// * `base_url` - Referer of the starting path
    pub fn new(policy: TraversalPolicy, start_path: &str, base_url: &str) -> Self {
        let mut frontier = Frontier::new(policy);
        frontier.seed(start_path, base_url);

        Self {
            frontier,
            results: Vec::new(),
            metrics: Metrics::new(),
            in_flight: 0,
        }
    }

    /// Takes the next pending path and marks it in flight
    pub fn next_path(&mut self) -> Option<QueuedPath> {
        let item = self.frontier.pop()?;
        self.in_flight += 1;
        Some(item)
    }

    /// Puts back a path that was never attempted
    pub fn release(&mut self, item: QueuedPath) {
        self.settle();
        self.frontier.requeue(item);
    }

    /// Records a collected page and offers its links
    ///
    /// # Returns
    ///
    /// Number of successful pages collected so far
    pub fn record_success<I>(
        &mut self,
        item: QueuedPath,
        page_url: &str,
        hash: Option<String>,
        status: u16,
        links: I,
    ) -> u64
    where
        I: IntoIterator<Item = String>,
    {
        self.settle();
        self.metrics.requests += 1;
        self.metrics.success += 1;

        self.frontier.offer(links, page_url);
        self.results.push(PageRecord {
            path: item.path,
            hash,
            status,
        });

        self.metrics.success
    }

    /// Records a page that answered but is not usable; the path is consumed
    pub fn record_soft_invalid(&mut self, _item: QueuedPath) {
        self.settle();
        self.metrics.requests += 1;
        self.metrics.errors += 1;
    }

    /// Records a transport failure; the path goes back to the tail
    pub fn record_transport_error(&mut self, item: QueuedPath) {
        self.settle();
        self.metrics.requests += 1;
        self.metrics.errors += 1;
        self.frontier.requeue(item);
    }

    /// Records a hard block; the path goes back for another identity
    pub fn record_block(&mut self, item: QueuedPath) {
        self.settle();
        self.metrics.requests += 1;
        self.metrics.blocks += 1;
        self.frontier.requeue(item);
    }

    /// True when nothing is pending and nothing is in flight
    pub fn is_exhausted(&self) -> bool {
        self.frontier.is_empty() && self.in_flight == 0
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn results(&self) -> &[PageRecord] {
        &self.results
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn settle(&mut self) {
        debug_assert!(self.in_flight > 0, "settled a path that was not in flight");
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}
