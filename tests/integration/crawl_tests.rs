//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end, through both transports.

use scrapfly_crawl::config::{Config, FetcherBackend};
use scrapfly_crawl::crawler::{build_fetcher, Crawler};
use scrapfly_crawl::output::OutputRecord;
use scrapfly_crawl::storage::{rebuild_state_files, state_file_path, CrawlSnapshot, JsonStateStore, StateStore};
use scrapfly_crawl::url::domain_of;
use scrapfly_crawl::{ConfigError, CrawlError, LinkStatus};
use std::path::Path;
use std::sync::atomic::Ordering;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a fast direct-transport configuration writing into `output_dir`
fn create_test_config(output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.crawler.initial_concurrency = 2;
    config.crawler.min_concurrency = 1;
    config.crawler.max_concurrency = Some(4);
    config.crawler.politeness_min_ms = 0;
    config.crawler.politeness_max_ms = 0;
    config.retry.max_retries = 2;
    config.retry.base_delay_ms = 10;
    config.retry.timeout_ms = 5_000;
    config.fetcher.backend = FetcherBackend::Direct;
    config.output.output_dir = output_dir.to_string_lossy().into_owned();
    config
}

fn html_page(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(format!("<html><body>{}</body></html>", body))
}

async fn mount_page(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html_page(body))
        .mount(server)
        .await;
}

async fn run_crawl(config: Config, start_url: &str) -> Result<(Crawler, scrapfly_crawl::output::CrawlStatistics), CrawlError> {
    let fetcher = build_fetcher(&config.fetcher, config.retry.max_redirect_hops)?;
    let mut crawler = Crawler::new(config, start_url, fetcher)?;
    let stats = crawler.run().await?;
    Ok((crawler, stats))
}

fn read_output(path: &Path) -> Vec<OutputRecord> {
    std::fs::read_to_string(path)
        .expect("Failed to read output log")
        .lines()
        .map(|line| serde_json::from_str(line).expect("Invalid output line"))
        .collect()
}

fn load_state(output_dir: &Path, start_url: &str) -> CrawlSnapshot {
    let domain = domain_of(start_url).expect("Failed to extract domain");
    JsonStateStore::new(state_file_path(output_dir, &domain))
        .load()
        .expect("Failed to load state")
        .expect("State file missing")
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    mount_page(
        &server,
        "/",
        r#"<a href="/about">About</a><a href="/contact?utm_source=nav">Contact</a><a href="https://other.example/">Out</a>"#,
    )
    .await;
    mount_page(&server, "/about", r#"<a href="/">Home</a><a href="/contact#form">Contact</a>"#).await;
    mount_page(&server, "/contact", r#"<a href="/">Home</a>"#).await;

    let (crawler, stats) = run_crawl(create_test_config(dir.path()), &start).await.unwrap();

    assert_eq!(stats.completed, 3);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.failed, 0);
    assert!(!stats.interrupted);

    let mut urls: Vec<String> = read_output(crawler.output_path().unwrap())
        .into_iter()
        .map(|record| record.url)
        .collect();
    urls.sort();
    assert_eq!(
        urls,
        vec![start.clone(), format!("{}/about", server.uri()), format!("{}/contact", server.uri())]
    );

    let snapshot = load_state(dir.path(), &start);
    assert_eq!(snapshot.count(LinkStatus::Completed), 3);
    assert!(snapshot.links.keys().all(|k| !k.contains("other.example")));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    mount_page(&server, "/", r#"<a href="/gone">Gone</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (crawler, stats) = run_crawl(create_test_config(dir.path()), &start).await.unwrap();

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    let record = crawler.frontier().record("/gone").unwrap();
    assert_eq!(record.status_code, Some(404));
    assert_eq!(record.error.as_deref(), Some("HTTP 404"));
}

#[tokio::test]
async fn test_server_error_is_retried_until_success() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/", "no links").await;

    let (crawler, stats) = run_crawl(create_test_config(dir.path()), &start).await.unwrap();

    assert_eq!(stats.completed, 1);
    let record = crawler.frontier().record(&start).unwrap();
    assert_eq!(record.timing.unwrap().attempts, 2);
}

#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    mount_page(&server, "/", r#"<a href="/broken">Broken</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let (crawler, stats) = run_crawl(create_test_config(dir.path()), &start).await.unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(crawler.frontier().record("/broken").unwrap().status_code, Some(500));
}

#[tokio::test]
async fn test_rate_limit_lowers_concurrency_and_waits() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/", r#"<a href="/a">A</a>"#).await;
    mount_page(&server, "/a", "").await;

    let started = std::time::Instant::now();
    let (crawler, stats) = run_crawl(create_test_config(dir.path()), &start).await.unwrap();

    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
    assert_eq!(stats.completed, 2);

    let state = crawler.controller().state().await;
    assert_eq!(state.consecutive_rate_limit_hits(), 0);
    assert!(state.concurrency() >= 1 && state.concurrency() <= 4);
}

#[tokio::test]
async fn test_moved_permanently_is_followed_and_recorded() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    mount_page(&server, "/", r#"<a href="/old">Old</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    mount_page(&server, "/new", "moved here").await;

    let (crawler, stats) = run_crawl(create_test_config(dir.path()), &start).await.unwrap();

    assert_eq!(stats.completed, 3);
    let old = crawler.frontier().record("/old").unwrap();
    assert!(old.is_redirected);
    assert_eq!(old.final_url.as_deref(), Some(format!("{}/new", server.uri()).as_str()));
    assert_eq!(old.redirect_chain.len(), 2);
}

#[tokio::test]
async fn test_excluded_paths_are_never_requested() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    mount_page(&server, "/", r#"<a href="/admin/login">Admin</a><a href="/docs">Docs</a>"#).await;
    mount_page(&server, "/docs", "").await;
    Mock::given(method("GET"))
        .and(path("/admin/login"))
        .respond_with(html_page(""))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = create_test_config(dir.path());
    config.exclude = vec!["/admin".to_string()];
    let (_, stats) = run_crawl(config, &start).await.unwrap();

    assert_eq!(stats.completed, 2);
    assert_eq!(stats.excluded, 1);
}

#[tokio::test]
async fn test_binary_content_is_tracked_but_not_logged() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    mount_page(&server, "/", r#"<a href="/logo">Logo</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/logo"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]),
        )
        .mount(&server)
        .await;

    let (crawler, stats) = run_crawl(create_test_config(dir.path()), &start).await.unwrap();

    assert_eq!(stats.completed, 2);
    let records = read_output(crawler.output_path().unwrap());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].url, start);
}

#[tokio::test]
async fn test_interrupted_crawl_resumes_without_refetching() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(r#"<a href="/one">1</a><a href="/two">2</a>"#))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/one", "").await;
    mount_page(&server, "/two", "").await;

    // First run stops right after the start page
    let config = create_test_config(dir.path());
    let fetcher = build_fetcher(&config.fetcher, config.retry.max_redirect_hops).unwrap();
    let mut crawler = Crawler::new(config, &start, fetcher).unwrap();
    crawler.shutdown_handle().store(true, Ordering::SeqCst);
    let stats = crawler.run().await.unwrap();

    assert!(stats.interrupted);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 2);

    let snapshot = load_state(dir.path(), &start);
    assert_eq!(snapshot.count(LinkStatus::Pending), 2);

    let mut config = create_test_config(dir.path());
    config.output.resume = true;
    let (_, stats) = run_crawl(config, &start).await.unwrap();

    assert_eq!(stats.completed, 3);
    assert_eq!(stats.pending, 0);
    assert!(!stats.interrupted);
}

#[tokio::test]
async fn test_fresh_crawl_overwrites_previous_state() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    mount_page(&server, "/", "").await;

    let domain = domain_of(&start).unwrap();
    let state_path = state_file_path(dir.path(), &domain);
    let mut stale = CrawlSnapshot::new(start.clone(), domain.clone());
    stale.status.insert(format!("{}/stale", server.uri()), LinkStatus::Pending);
    JsonStateStore::new(&state_path).save(&stale).unwrap();

    let (_, stats) = run_crawl(create_test_config(dir.path()), &start).await.unwrap();

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 0);
    assert!(!load_state(dir.path(), &start).status.keys().any(|k| k.ends_with("/stale")));
}

#[tokio::test]
async fn test_scrape_api_backend_crawl() {
    let api = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let start = "https://site.test/";

    let envelope = |url: &str, content: &str| {
        serde_json::json!({
            "result": {
                "status_code": 200,
                "response_headers": { "Content-Type": "text/html" },
                "content": content,
                "url": url,
            }
        })
    };

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("key", "secret"))
        .and(query_param("url", start))
        .and(query_param("render_js", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            start,
            r#"<a href="/page">Page</a><a href="https://elsewhere.test/">Out</a>"#,
        )))
        .expect(1)
        .mount(&api)
        .await;

    // The API rate-limits the caller once before serving /page
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", "https://site.test/page"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", "https://site.test/page"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope("https://site.test/page", "done")))
        .mount(&api)
        .await;

    let mut config = create_test_config(dir.path());
    config.fetcher.backend = FetcherBackend::ScrapeApi;
    config.fetcher.api_endpoint = format!("{}/scrape", api.uri());
    config.fetcher.api_key = Some("secret".to_string());
    config.fetcher.render_js = true;

    let (crawler, stats) = run_crawl(config, start).await.unwrap();

    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 0);

    let records = read_output(crawler.output_path().unwrap());
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.metadata.render_js == Some(true)));
    assert!(records.iter().any(|r| r.html == "done"));
}

#[tokio::test]
async fn test_scrape_api_requires_credentials() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.fetcher.backend = FetcherBackend::ScrapeApi;
    config.fetcher.api_key = None;

    let result = build_fetcher(&config.fetcher, config.retry.max_redirect_hops);
    assert!(matches!(result, Err(ConfigError::MissingCredentials(_))));
}

#[tokio::test]
async fn test_rebuild_state_from_output_log() {
    let server = MockServer::start().await;
    let start = format!("{}/", server.uri());
    let dir = TempDir::new().unwrap();

    mount_page(&server, "/", r#"<a href="/a">A</a><a href="/b">B</a>"#).await;
    mount_page(&server, "/a", "").await;
    mount_page(&server, "/b", "").await;

    run_crawl(create_test_config(dir.path()), &start).await.unwrap();

    let domain = domain_of(&start).unwrap();
    let state_path = state_file_path(dir.path(), &domain);
    std::fs::remove_file(&state_path).unwrap();

    let written = rebuild_state_files(dir.path()).unwrap();
    assert_eq!(written, vec![state_path]);

    let snapshot = load_state(dir.path(), &start);
    assert_eq!(snapshot.domain, domain);
    assert_eq!(snapshot.count(LinkStatus::Completed), 3);
}
