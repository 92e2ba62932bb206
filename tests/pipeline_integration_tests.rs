use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use news_shelf::config::{Config, SourceConfig, SourceKind};
use news_shelf::feed::pipeline::{placeholder_items, FetchPipeline, Notice, Origin};
use news_shelf::storage::{CachePolicy, CacheStore, FileBackend};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod test_data;
use test_data::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 16, 12, 0, 0).unwrap()
}

fn source(name: &str, kind: SourceKind, base_url: String) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        kind,
        base_url,
        proxy: None,
        timeout_secs: 5,
        attempts: 1,
        backoff_secs: 0,
    }
}

fn config_with(sources: Vec<SourceConfig>) -> Config {
    let mut config = Config::default();
    config.sources = sources;
    config
}

fn file_cache(dir: &TempDir) -> Arc<CacheStore> {
    let backend = FileBackend::new(dir.path().join("items_cache.json")).unwrap();
    Arc::new(CacheStore::new(Arc::new(backend), CachePolicy::default()))
}

async fn mount_item_api(server: &MockServer, expected_list_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/v0/topstories.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TOP_STORIES_JSON))
        .expect(expected_list_calls)
        .mount(server)
        .await;

    for id in [101, 102, 103, 104] {
        Mock::given(method("GET"))
            .and(path(format!("/v0/item/{}.json", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(item_payload(id)))
            .mount(server)
            .await;
    }
}

async fn mount_failure(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(503))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_direct_source_skips_malformed_items() {
    let server = MockServer::start().await;
    mount_item_api(&server, 1).await;

    let temp_dir = TempDir::new().unwrap();
    let config = config_with(vec![source("hn", SourceKind::Direct, format!("{}/v0", server.uri()))]);
    let pipeline = FetchPipeline::from_config(&config, file_cache(&temp_dir)).unwrap();

    let result = pipeline.retrieve(t0()).await;
    assert_eq!(result.origin, Origin::Fresh);
    assert_eq!(result.source.as_deref(), Some("hn"));

    let ids: Vec<u64> = result.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, VALID_TOP_IDS.to_vec());

    // Ask HN has no link of its own.
    assert_eq!(result.items[1].url, "https://news.ycombinator.com/item?id=102");
    assert_eq!(result.items[0].domain().as_deref(), Some("getdropbox.com"));
}

#[tokio::test]
async fn test_cache_window_controls_network_use() {
    let server = MockServer::start().await;
    // Fetched at t0 and again after the 30 minute window, never in between.
    mount_item_api(&server, 2).await;

    let temp_dir = TempDir::new().unwrap();
    let config = config_with(vec![source("hn", SourceKind::Direct, format!("{}/v0", server.uri()))]);
    let pipeline = FetchPipeline::from_config(&config, file_cache(&temp_dir)).unwrap();

    let first = pipeline.retrieve(t0()).await;
    assert!(first.source.is_some());

    let cached = pipeline.retrieve(t0() + Duration::minutes(10)).await;
    assert_eq!(cached.origin, Origin::Fresh);
    assert!(cached.source.is_none());
    assert_eq!(cached.fetched_at, Some(t0()));

    let refetched = pipeline.retrieve(t0() + Duration::minutes(31)).await;
    assert_eq!(refetched.source.as_deref(), Some("hn"));
    assert_eq!(refetched.fetched_at, Some(t0() + Duration::minutes(31)));
}

#[tokio::test]
async fn test_outage_after_cache_window_serves_stale_items() {
    let server = MockServer::start().await;
    mount_item_api(&server, 1).await;

    let temp_dir = TempDir::new().unwrap();
    let config = config_with(vec![source("hn", SourceKind::Direct, format!("{}/v0", server.uri()))]);
    let pipeline = FetchPipeline::from_config(&config, file_cache(&temp_dir)).unwrap();

    let first = pipeline.retrieve(t0()).await;
    assert_eq!(first.origin, Origin::Fresh);

    let cached = pipeline.retrieve(t0() + Duration::minutes(10)).await;
    assert!(cached.source.is_none());

    // Upstream goes down entirely.
    server.reset().await;
    mount_failure(&server, "/v0/topstories.json").await;

    let refetch = pipeline.retrieve(t0() + Duration::minutes(31)).await;
    assert_eq!(refetch.origin, Origin::Stale);
    assert!(refetch.source.is_none());
    assert_eq!(refetch.items, first.items);
    assert_eq!(refetch.fetched_at, Some(t0()));
    assert_eq!(
        refetch.notice,
        Some(Notice::Outdated {
            fetched_at: t0(),
            expired: false
        })
    );
}

#[tokio::test]
async fn test_file_cache_serves_after_restart() {
    let server = MockServer::start().await;
    mount_item_api(&server, 1).await;

    let temp_dir = TempDir::new().unwrap();
    let config = config_with(vec![source("hn", SourceKind::Direct, format!("{}/v0", server.uri()))]);

    {
        let pipeline = FetchPipeline::from_config(&config, file_cache(&temp_dir)).unwrap();
        pipeline.retrieve(t0()).await;
    }

    let reopened = FetchPipeline::from_config(&config, file_cache(&temp_dir)).unwrap();
    let result = reopened.retrieve(t0() + Duration::minutes(5)).await;
    assert_eq!(result.origin, Origin::Fresh);
    assert!(result.source.is_none());
    assert_eq!(result.items.len(), VALID_TOP_IDS.len());
}

#[tokio::test]
async fn test_falls_back_through_proxy_to_front_page() {
    let server = MockServer::start().await;
    mount_failure(&server, "/v0/topstories.json").await;
    mount_failure(&server, "/raw").await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search"))
        .and(query_param("tags", "front_page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FRONT_PAGE_JSON))
        .expect(1)
        .mount(&server)
        .await;

    let mut proxy = source("proxy", SourceKind::Proxy, "https://hacker-news.firebaseio.com/v0".to_string());
    proxy.proxy = Some(format!("{}/raw?url={{url}}", server.uri()));

    let config = config_with(vec![
        source("hn", SourceKind::Direct, format!("{}/v0", server.uri())),
        proxy,
        source("front-page", SourceKind::FrontPage, format!("{}/api/v1", server.uri())),
    ]);
    let temp_dir = TempDir::new().unwrap();
    let cache = file_cache(&temp_dir);
    let pipeline = FetchPipeline::from_config(&config, cache.clone()).unwrap();

    let result = pipeline.retrieve(t0()).await;
    assert_eq!(result.origin, Origin::Fresh);
    assert_eq!(result.source.as_deref(), Some("front-page"));
    assert_eq!(result.items.len(), 2);
    assert_eq!(cache.get().await.unwrap().items, result.items);
}

#[tokio::test]
async fn test_outage_degrades_to_stale_then_placeholder() {
    let server = MockServer::start().await;
    mount_failure(&server, "/v0/topstories.json").await;

    let config = config_with(vec![source("hn", SourceKind::Direct, format!("{}/v0", server.uri()))]);

    // Nothing cached: placeholder.
    let empty_dir = TempDir::new().unwrap();
    let pipeline = FetchPipeline::from_config(&config, file_cache(&empty_dir)).unwrap();
    let result = pipeline.retrieve(t0()).await;
    assert_eq!(result.origin, Origin::Fallback);
    assert_eq!(result.notice, Some(Notice::Offline));
    assert_eq!(result.items, placeholder_items());

    // Something cached: served with a warning, whatever its age.
    let warm_dir = TempDir::new().unwrap();
    let cache = file_cache(&warm_dir);
    let fetched_at = t0() - Duration::hours(6);
    let seeded = placeholder_items().into_iter().take(1).collect::<Vec<_>>();
    cache.set(seeded.clone(), fetched_at).await;

    let pipeline = FetchPipeline::from_config(&config, cache).unwrap();
    let result = pipeline.retrieve(t0()).await;
    assert_eq!(result.origin, Origin::Stale);
    assert_eq!(result.items, seeded);
    assert_eq!(
        result.notice,
        Some(Notice::Outdated {
            fetched_at,
            expired: true
        })
    );
}

#[tokio::test]
async fn test_force_refresh_bypasses_fresh_cache() {
    let server = MockServer::start().await;
    mount_item_api(&server, 2).await;

    let temp_dir = TempDir::new().unwrap();
    let config = config_with(vec![source("hn", SourceKind::Direct, format!("{}/v0", server.uri()))]);
    let pipeline = FetchPipeline::from_config(&config, file_cache(&temp_dir)).unwrap();

    pipeline.retrieve(t0()).await;
    let forced = pipeline.force_refresh(t0() + Duration::minutes(1)).await;
    assert_eq!(forced.source.as_deref(), Some("hn"));
    assert_eq!(forced.fetched_at, Some(t0() + Duration::minutes(1)));
}
