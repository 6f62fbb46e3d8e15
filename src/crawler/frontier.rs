//! Frontier management
//!
//! The frontier owns two collections:
//! - `visited`: every path ever enqueued (grows monotonically, never shrinks)
//! - `pending`: paths waiting to be fetched
//!
//! A path enters `visited` at the moment it is first enqueued, so it can be
//! enqueued at most once per run. Paths put back after a block or a transport
//! failure are already in `visited` and go through [`Frontier::requeue`].

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// How newly discovered paths are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraversalPolicy {
    /// Follow the first not-yet-visited link of each page
    Greedy,

    /// FIFO queue of every discovered path
    #[default]
    BreadthFirst,

    /// FIFO queue shared by the workers of several identities
    Sharded,
}

impl TraversalPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::BreadthFirst => "breadth-first",
            Self::Sharded => "sharded",
        }
    }
}

impl fmt::Display for TraversalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TraversalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greedy" => Ok(Self::Greedy),
            "breadth-first" | "bfs" => Ok(Self::BreadthFirst),
            "sharded" => Ok(Self::Sharded),
            other => Err(format!(
                "unknown traversal policy '{}' (expected greedy, breadth-first or sharded)",
                other
            )),
        }
    }
}

/// A path waiting to be fetched, with the page it was discovered on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPath {
    pub path: String,
    /// Absolute URL sent as Referer when the path is fetched
    pub referer: String,
}

impl QueuedPath {
    pub fn new(path: impl Into<String>, referer: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            referer: referer.into(),
        }
    }
}

/// Visited set plus pending paths
///
/// Under [`TraversalPolicy::Greedy`] the pending side holds at most one path:
/// each page contributes only its first unvisited link.
#[derive(Debug)]
pub struct Frontier {
    visited: HashSet<String>,
    pending: VecDeque<QueuedPath>,
    policy: TraversalPolicy,
}

impl Frontier {
    pub fn new(policy: TraversalPolicy) -> Self {
        Self {
            visited: HashSet::new(),
            pending: VecDeque::new(),
            policy,
        }
    }

    /// Seeds the frontier with the starting path
    ///
    /// Returns false if the path was already visited.
    pub fn seed(&mut self, path: &str, referer: &str) -> bool {
        if !self.visited.insert(path.to_string()) {
            return false;
        }
        self.pending.push_back(QueuedPath::new(path, referer));
        true
    }

    /// Takes the next path to fetch
    pub fn pop(&mut self) -> Option<QueuedPath> {
        self.pending.pop_front()
    }

    /// Offers the links discovered on a page
    ///
    /// # Arguments
    ///
    /// * `links` - Candidate paths in document order
    /// * `referer` - Absolute URL of the page the links were found on
    ///
    /// # Returns
    ///
    /// Number of paths newly enqueued
    pub fn offer<I>(&mut self, links: I, referer: &str) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;

        for link in links {
            if self.visited.contains(&link) {
                continue;
            }

            self.visited.insert(link.clone());
            self.pending.push_back(QueuedPath::new(link, referer));
            added += 1;

            if self.policy == TraversalPolicy::Greedy {
                break;
            }
        }

        added
    }

    /// Puts an already visited path back at the tail of the queue
    pub fn requeue(&mut self, item: QueuedPath) {
        debug_assert!(self.visited.contains(&item.path));
        self.pending.push_back(item);
    }

    pub fn is_visited(&self, path: &str) -> bool {
        self.visited.contains(path)
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn policy(&self) -> TraversalPolicy {
        self.policy
    }
}
