//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `RunState`: Where a run is in its lifecycle (running or one terminal state)
//! - `CrawlLedger`: Frontier, collected results and counters of a run
//! - `IdentitySession`: Token, block flag and counters of one identity
//! - `StopSignal`: Cooperative stop flag observed by the crawl loops

mod identity;
mod ledger;
mod run_state;
mod stop;

// Re-export main types
pub use identity::{IdentityReport, IdentitySession};
pub use ledger::CrawlLedger;
pub use run_state::RunState;
pub use stop::StopSignal;
