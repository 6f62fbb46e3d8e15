//! Pathwalker main entry point
//!
//! This is the command-line interface for the Pathwalker crawler.

use clap::Parser;
use pathwalker::config::{load_config_with_overrides, Config, Overrides};
use pathwalker::crawler::crawl;
use pathwalker::output::print_summary;
use pathwalker::state::StopSignal;
use pathwalker::TraversalPolicy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Pathwalker: a latency-aware link-graph crawler
///
/// Pathwalker follows the links of one site from a starting path, paces its
/// requests with a stochastic timing controller and stops an identity as soon
/// as the site answers with a hard block. Results are written as JSON.
#[derive(Parser, Debug)]
#[command(name = "pathwalker")]
#[command(version = "1.0.0")]
#[command(about = "A latency-aware link-graph crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,

    /// Session token; repeat to crawl with several identities
    #[arg(long = "token", value_name = "TOKEN")]
    tokens: Vec<String>,

    /// Result document path (overrides the config file)
    #[arg(short, long, value_name = "PATH")]
    output: Option<String>,

    /// Number of successful pages to collect
    #[arg(long, value_name = "N")]
    target: Option<u64>,

    /// Target requests per second
    #[arg(long, value_name = "RPS")]
    rps: Option<f64>,

    /// Traversal policy: greedy, breadth-first or sharded
    #[arg(long, value_name = "POLICY")]
    traversal: Option<TraversalPolicy>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            tokens: self.tokens.clone(),
            results_path: self.output.clone(),
            target_requests: self.target,
            target_rps: self.rps,
            traversal: self.traversal,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_overrides(&cli.config, &cli.overrides()) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
    } else {
        handle_crawl(config, config_hash, cli.quiet).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("pathwalker=info,warn"),
            1 => EnvFilter::new("pathwalker=debug,info"),
            2 => EnvFilter::new("pathwalker=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Pathwalker Dry Run ===\n");

    println!("Crawl:");
    println!("  Start: {}{}", config.crawl.base_url, config.crawl.start_path);
    println!("  Traversal: {}", config.crawl.traversal);
    println!("  Target pages: {}", config.crawl.target_requests);
    println!("  Time limit: {}s", config.crawl.time_limit);
    println!("  Request timeout: {}s", config.crawl.request_timeout);
    println!("  Link pattern: {}", config.crawl.link_pattern);

    let timing = &config.timing;
    println!("\nTiming:");
    println!("  Target rate: {} req/s", timing.target_rps);
    println!("  Burst size: {}", timing.burst_size);
    println!("  Burst pause: {}s", timing.burst_interval);
    println!("  Cooldown every: {} requests", timing.cooldown_every);
    println!("  Cooldown duration: {}s", timing.cooldown_duration);
    println!("  Variance: ±{:.0}%", timing.request_variance * 100.0);
    println!("  Think time: {}s", timing.think_time);
    if let Some(phase) = &timing.activity_phase {
        println!("  Active phase: {}s, rest phase: {}s", phase.active, phase.rest);
    }
    if let Some(threshold) = timing.latency_threshold {
        println!(
            "  Fast delay {}s above {}s latency",
            timing.fast_delay, threshold
        );
    }

    println!("\nIdentities ({}):", config.identities.len());
    for identity in &config.identities {
        println!(
            "  - {} ({}, {} workers)",
            identity.name,
            identity
                .tls_profile
                .as_deref()
                .unwrap_or(&config.client.tls_profile),
            identity.workers
        );
    }

    println!("\nOutput:");
    println!("  Results: {}", config.output.results_path);
    if let Some(summary) = &config.output.summary_path {
        println!("  Summary: {}", summary);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    config_hash: String,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (stop_tx, stop) = StopSignal::channel();

    // Ctrl-C sets the stop flag; the crawl loop persists what it has and exits
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current request");
            let _ = stop_tx.send(true);
        }
    });

    match crawl(config, Some(config_hash), stop).await {
        Ok(report) => {
            tracing::info!("Crawl finished: {}", report.summary.state);
            if !quiet {
                print_summary(&report.summary);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
