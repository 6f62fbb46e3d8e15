//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end over real HTTP.

use pathwalker::config::load_config;
use pathwalker::crawler::crawl;
use pathwalker::output::ResultSink;
use pathwalker::state::StopSignal;
use pathwalker::RunState;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HASH: &str = "0123456789abcdef0123456789abcdef";

/// Writes a fast-paced configuration file and returns its path
fn write_test_config(dir: &Path, base_url: &str, crawl_extra: &str, identities: &str) -> PathBuf {
    let content = format!(
        r#"
[crawl]
base-url = "{base_url}"
start-path = "/scraping/1"
target-requests = 10
time-limit = 30
request-timeout = 5
{crawl_extra}

[timing]
target-rps = 1000.0
burst-size = [1000, 1000]
burst-interval = [0.0, 0.0]
cooldown-every = [100000, 100000]
cooldown-duration = [0.0, 0.0]
request-variance = 0.0
think-time = [0.0, 0.0]
seed = 11

{identities}

[output]
results-path = "{results}"
summary-path = "{summary}"
"#,
        base_url = base_url,
        crawl_extra = crawl_extra,
        identities = identities,
        results = dir.join("results.json").display(),
        summary = dir.join("summary.json").display(),
    );

    let config_path = dir.join("pathwalker.toml");
    std::fs::write(&config_path, content).expect("Failed to write config");
    config_path
}

const ONE_IDENTITY: &str = r#"
[[identity]]
name = "primary"
token = "tok-1"
"#;

fn page(links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|l| format!(r#"<a href="{}">next</a>"#, l))
        .collect();
    format!("<html><body>{}</body></html>", anchors)
}

async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_breadth_first_crawl_exhausts_site() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();

    mount_page(
        &mock_server,
        "/scraping/1",
        format!(
            "<html><p>{}</p>{}</html>",
            HASH,
            page(&["/scraping/2", "/scraping/3"])
        ),
    )
    .await;
    mount_page(&mock_server, "/scraping/2", page(&["/scraping/1", "/scraping/4"])).await;
    mount_page(&mock_server, "/scraping/3", page(&[])).await;
    mount_page(&mock_server, "/scraping/4", page(&["/scraping/2"])).await;

    let config_path = write_test_config(temp_dir.path(), &mock_server.uri(), "", ONE_IDENTITY);
    let config = load_config(&config_path).unwrap();
    let (_stop_tx, stop) = StopSignal::channel();

    let report = crawl(config, None, stop).await.unwrap();

    assert_eq!(report.summary.state, RunState::FrontierExhausted);
    assert_eq!(report.summary.visited, 4);
    assert_eq!(report.summary.errors, 0);

    let document = ResultSink::load(&temp_dir.path().join("results.json")).unwrap();
    assert_eq!(document.total, 4);
    assert!(!document.blocked);

    let paths: Vec<_> = document.results.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["/scraping/1", "/scraping/2", "/scraping/3", "/scraping/4"]);
    assert_eq!(document.results[0].hash.as_deref(), Some(HASH));
    assert_eq!(document.results[1].hash, None);
    assert!(document.results.iter().all(|r| r.status == 200));
}

#[tokio::test]
async fn test_block_stops_crawl_and_marks_results() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();

    mount_page(&mock_server, "/scraping/1", page(&["/scraping/2", "/scraping/3"])).await;
    Mock::given(method("GET"))
        .and(path("/scraping/2"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .mount(&mock_server)
        .await;
    mount_page(&mock_server, "/scraping/3", page(&[])).await;

    let config_path = write_test_config(temp_dir.path(), &mock_server.uri(), "", ONE_IDENTITY);
    let config = load_config(&config_path).unwrap();
    let (_stop_tx, stop) = StopSignal::channel();

    let report = crawl(config, None, stop).await.unwrap();

    assert_eq!(report.summary.state, RunState::Blocked);
    assert_eq!(report.summary.blocks, 1);
    assert_eq!(report.summary.errors, 0);

    let document = ResultSink::load(&temp_dir.path().join("results.json")).unwrap();
    assert!(document.blocked);
    assert_eq!(document.total, 1);
    assert_eq!(document.results[0].path, "/scraping/1");

    // /scraping/3 was never requested after the block
    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/scraping/3"));
}

#[tokio::test]
async fn test_challenge_marker_counts_as_block() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();

    mount_page(
        &mock_server,
        "/scraping/1",
        r#"<html><script src="https://geo.captcha-delivery.com/captcha/"></script></html>"#
            .to_string(),
    )
    .await;

    let config_path = write_test_config(temp_dir.path(), &mock_server.uri(), "", ONE_IDENTITY);
    let config = load_config(&config_path).unwrap();
    let (_stop_tx, stop) = StopSignal::channel();

    let report = crawl(config, None, stop).await.unwrap();

    assert_eq!(report.summary.state, RunState::Blocked);
    assert!(report.results.is_empty());
}

#[tokio::test]
async fn test_browser_headers_and_token_rotation() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/scraping/1"))
        .and(header("cookie", "datadome=tok-1"))
        .and(header("sec-fetch-mode", "navigate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page(&["/scraping/2"]))
                .insert_header("set-cookie", "datadome=tok-2; Max-Age=3600; Path=/"),
        )
        .mount(&mock_server)
        .await;

    // Only answered when the rotated token and the referer trail are sent
    Mock::given(method("GET"))
        .and(path("/scraping/2"))
        .and(header("cookie", "datadome=tok-2"))
        .and(header("referer", format!("{}/scraping/1", base_url).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[])))
        .mount(&mock_server)
        .await;

    let config_path = write_test_config(
        temp_dir.path(),
        &base_url,
        "cookie-check-interval = 1",
        ONE_IDENTITY,
    );
    let config = load_config(&config_path).unwrap();
    let (_stop_tx, stop) = StopSignal::channel();

    let report = crawl(config, None, stop).await.unwrap();

    assert_eq!(report.summary.state, RunState::FrontierExhausted);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.summary.identities[0].token_rotations, 1);
}

#[tokio::test]
async fn test_greedy_traversal_follows_single_chain() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();

    mount_page(&mock_server, "/scraping/1", page(&["/scraping/2", "/scraping/5"])).await;
    mount_page(&mock_server, "/scraping/2", page(&["/scraping/1", "/scraping/3"])).await;
    mount_page(&mock_server, "/scraping/3", page(&["/scraping/2"])).await;
    mount_page(&mock_server, "/scraping/5", page(&[])).await;

    let config_path = write_test_config(
        temp_dir.path(),
        &mock_server.uri(),
        r#"traversal = "greedy""#,
        ONE_IDENTITY,
    );
    let config = load_config(&config_path).unwrap();
    let (_stop_tx, stop) = StopSignal::channel();

    let report = crawl(config, None, stop).await.unwrap();

    assert_eq!(report.summary.state, RunState::FrontierExhausted);
    let paths: Vec<_> = report.results.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["/scraping/1", "/scraping/2", "/scraping/3"]);
}

#[tokio::test]
async fn test_sharded_crawl_with_two_identities() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();

    for n in 1..=15u32 {
        let children: Vec<String> = [2 * n, 2 * n + 1]
            .iter()
            .filter(|c| **c <= 15)
            .map(|c| format!("/scraping/{}", c))
            .collect();
        let refs: Vec<&str> = children.iter().map(|s| s.as_str()).collect();
        mount_page(&mock_server, &format!("/scraping/{}", n), page(&refs)).await;
    }

    let identities = r#"
[[identity]]
name = "first"
token = "tok-a"
workers = 2

[[identity]]
name = "second"
token = "tok-b"
workers = 2
"#;
    let config_path = write_test_config(
        temp_dir.path(),
        &mock_server.uri(),
        r#"traversal = "sharded""#,
        identities,
    );
    let config = load_config(&config_path).unwrap();
    let (_stop_tx, stop) = StopSignal::channel();

    let report = crawl(config, None, stop).await.unwrap();

    assert!(matches!(
        report.summary.state,
        RunState::TargetReached | RunState::FrontierExhausted
    ));
    assert!(report.results.len() >= 10);

    let mut paths: Vec<_> = report.results.iter().map(|r| r.path.clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), report.results.len(), "a path was fetched twice");
    assert_eq!(report.summary.identities.len(), 2);
}

#[tokio::test]
async fn test_summary_file_records_config_hash() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();

    mount_page(&mock_server, "/scraping/1", page(&[])).await;

    let config_path = write_test_config(temp_dir.path(), &mock_server.uri(), "", ONE_IDENTITY);
    let (config, hash) =
        pathwalker::config::load_config_with_overrides(&config_path, &Default::default())
            .unwrap();
    let (_stop_tx, stop) = StopSignal::channel();

    crawl(config, Some(hash.clone()), stop).await.unwrap();

    let summary: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(temp_dir.path().join("summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["config_hash"], hash.as_str());
    assert_eq!(summary["state"], "frontier_exhausted");
    assert_eq!(summary["success"], 1);
}

#[tokio::test]
async fn test_unreachable_host_keeps_retrying_until_time_limit() {
    let temp_dir = TempDir::new().unwrap();

    // Nothing listens on port 9 of the loopback interface
    let config_path = write_test_config(
        temp_dir.path(),
        "http://127.0.0.1:9",
        "",
        ONE_IDENTITY,
    );
    let mut config = load_config(&config_path).unwrap();
    config.crawl.time_limit = 1;
    let (_stop_tx, stop) = StopSignal::channel();

    let report = crawl(config, None, stop).await.unwrap();

    assert_eq!(report.summary.state, RunState::TimeLimitExceeded);
    assert!(report.summary.errors >= 1);
    assert_eq!(report.summary.blocks, 0);
    // The seed path survived every failure
    assert_eq!(report.summary.pending, 1);
}
