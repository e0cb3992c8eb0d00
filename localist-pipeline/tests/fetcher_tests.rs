//! Fetcher tests against a local HTTP server, plus the request floor

mod helpers;

use helpers::{create_test_db, register_source, test_context};
use localist_common::config::LocalistConfig;
use localist_common::db::models::{BronzeKind, SourceType};
use localist_pipeline::agents::Collector;
use localist_pipeline::db::bronze;
use localist_pipeline::fetchers::{fetcher_from_config, FetchError, HttpJsonFetcher, RequestGate, SourceFetcher};
use localist_pipeline::types::{Agent, RunCounters};
use serial_test::serial;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

type Responder = Arc<dyn Fn(&str) -> (u16, String) + Send + Sync>;

/// Minimal HTTP/1.1 server answering every request with `respond(request_head)`
///
/// Returns the base URL and the request heads seen so far.
async fn spawn_server(respond: Responder) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let respond = respond.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let (status, body) = respond(&head);
                log.lock().unwrap().push(head);

                let reason = match status {
                    200 => "OK",
                    401 => "Unauthorized",
                    _ => "Error",
                };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}/venues", addr), seen)
}

/// Three records over two pages; page 3 is empty. Unpaged requests get page 1.
fn paged_venues(head: &str) -> (u16, String) {
    let body = if head.contains("page=1") || !head.contains("page=") {
        r#"[{"name": "Joe's Pizza", "city": "nyc", "lat": 40.7128, "lng": -74.006, "id": 1},
            {"name": "Lucali", "city": "nyc", "lat": 40.6818, "lng": -74.0003, "id": 2}]"#
    } else if head.contains("page=2") {
        r#"{"results": [{"name": "L'Industrie", "city": "nyc", "lat": 40.7115, "lng": -73.9577, "id": 3}]}"#
    } else {
        "[]"
    };
    (200, body.to_string())
}

#[tokio::test]
async fn test_http_fetcher_pages_until_empty() {
    let (url, seen) = spawn_server(Arc::new(paged_venues)).await;
    let fetcher = HttpJsonFetcher::new(url, Some("secret".to_string()), Some(10)).unwrap();
    let gate = RequestGate::from_millis(0);

    let first = fetcher.fetch_page(1, &gate).await.unwrap().unwrap();
    assert_eq!(first.items.len(), 2);
    let second = fetcher.fetch_page(2, &gate).await.unwrap().unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(fetcher.fetch_page(3, &gate).await.unwrap().is_none());

    let heads = seen.lock().unwrap().clone();
    assert_eq!(heads.len(), 3);
    assert!(heads[0].to_lowercase().contains("authorization: bearer secret"));
}

#[tokio::test]
async fn test_http_fetcher_stops_at_page_limit() {
    let (url, seen) = spawn_server(Arc::new(paged_venues)).await;
    let fetcher = HttpJsonFetcher::new(url, None, Some(1)).unwrap();
    let gate = RequestGate::from_millis(0);

    assert!(fetcher.fetch_page(1, &gate).await.unwrap().is_some());
    assert!(fetcher.fetch_page(2, &gate).await.unwrap().is_none());
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejected_credentials_are_fatal() {
    let (url, _) = spawn_server(Arc::new(|_: &str| (401, r#"{"error": "bad key"}"#.to_string()))).await;
    let fetcher = HttpJsonFetcher::new(url, Some("wrong".to_string()), None).unwrap();

    let result = fetcher.fetch_page(1, &RequestGate::from_millis(0)).await;
    assert!(matches!(result, Err(FetchError::Fatal(_))));
}

#[tokio::test]
async fn test_malformed_page_is_item_error() {
    let (url, _) = spawn_server(Arc::new(|_: &str| (200, "{not json".to_string()))).await;
    let fetcher = HttpJsonFetcher::new(url, None, None).unwrap();

    let result = fetcher.fetch_page(1, &RequestGate::from_millis(0)).await;
    assert!(matches!(result, Err(FetchError::Item(_))));
}

#[tokio::test]
async fn test_collector_ingests_every_http_page() {
    let (_dir, pool) = create_test_db().await;
    let source = register_source(&pool, "api", SourceType::Directory).await;
    let (url, _) = spawn_server(Arc::new(paged_venues)).await;
    let fetcher = HttpJsonFetcher::new(url, None, Some(10)).unwrap();

    let collector = Collector::new(test_context(&pool), source, None, Box::new(fetcher));
    let mut counters = RunCounters::default();
    collector.execute(&mut counters).await.unwrap();

    assert_eq!(counters.created, 3);
    assert_eq!(counters.failed, 0);
    let rows = bronze::records_for_source(&pool, BronzeKind::Venue, "api").await.unwrap();
    let mut ids: Vec<String> = rows.into_iter().map(|r| r.source_native_id).collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_collector_run_fails_on_rejected_credentials() {
    let (_dir, pool) = create_test_db().await;
    let source = register_source(&pool, "api", SourceType::Directory).await;
    let (url, _) = spawn_server(Arc::new(|_: &str| (401, "{}".to_string()))).await;
    let fetcher = HttpJsonFetcher::new(url, Some("expired".to_string()), None).unwrap();

    let collector = Collector::new(test_context(&pool), source, None, Box::new(fetcher));
    let mut counters = RunCounters::default();
    let err = collector.execute(&mut counters).await.unwrap_err();
    assert!(err.to_string().contains("api"));
}

#[tokio::test]
async fn test_request_gate_enforces_minimum_interval() {
    let gate = RequestGate::from_millis(100);

    let started = Instant::now();
    for _ in 0..3 {
        gate.wait().await;
    }
    let elapsed = started.elapsed();

    // First permit is immediate, the next two wait one interval each
    assert!(elapsed >= Duration::from_millis(190), "elapsed only {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
#[serial]
async fn test_configured_api_key_comes_from_environment() {
    let (url, seen) = spawn_server(Arc::new(paged_venues)).await;
    std::env::set_var("LOCALIST_TEST_API_KEY", "from-env");

    let config = LocalistConfig::from_toml_str(&format!(
        r#"
        [[sources]]
        id = "api"
        source_type = "directory"
        fetcher = {{ kind = "http_json", url = "{}", api_key_env = "LOCALIST_TEST_API_KEY" }}
        "#,
        url
    ))
    .unwrap();
    let fetcher = fetcher_from_config(&config.sources[0], Path::new(".")).unwrap();
    std::env::remove_var("LOCALIST_TEST_API_KEY");

    let page = fetcher.fetch_page(1, &RequestGate::from_millis(0)).await.unwrap().unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(seen.lock().unwrap()[0].to_lowercase().contains("authorization: bearer from-env"));
}
