//! Output module for persisting crawl results
//!
//! This module handles:
//! - Writing the JSON result document (checkpoints and final persist)
//! - Recording run metrics and printing the end-of-run summary

mod sink;
pub mod stats;

pub use sink::{write_json_atomic, PageRecord, ResultDocument, ResultSink, SinkError};
pub use stats::{log_progress, print_summary, CrawlSummary, Metrics};
