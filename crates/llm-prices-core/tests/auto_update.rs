use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use llm_prices_core::{AsyncSource, Freshness, PriceError, Provenance, SourceConfig, SyncSource, Usage};
use rust_decimal_macros::dec;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &str = r#"[
    {
        "id": "openai", "name": "OpenAI",
        "api_pattern": "https://api\\.openai\\.com",
        "models": [
            {"id": "gpt-4o", "match": {"starts_with": "gpt-4o"}, "prices": {"input_mtok": 2.5, "output_mtok": 10}}
        ]
    }
]"#;

fn config(server: &MockServer) -> SourceConfig {
    SourceConfig {
        request_timeout: Duration::from_secs(5),
        ..SourceConfig::with_url(format!("{}/data.json", server.uri()))
    }
}

/// Stale after 100ms, expired after 300ms.
fn short_lived(server: &MockServer) -> SourceConfig {
    SourceConfig {
        fetch_age: Duration::from_millis(100),
        max_age: Duration::from_millis(300),
        ..config(server)
    }
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

fn ok_body() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(BODY)
}

#[tokio::test]
async fn first_fetch_downloads_and_marks_snapshot_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ok_body())
        .expect(1)
        .mount(&server)
        .await;

    let source = AsyncSource::new(config(&server)).unwrap();
    assert!(source.current().is_none());
    let snapshot = source.fetch().await.unwrap();
    assert_eq!(snapshot.provenance(), Provenance::Fetched);

    let calc = snapshot.calc(&Usage::new(1000, 100), "gpt-4o", None, None).unwrap();
    assert_eq!(calc.total_price, dec!(0.0035));
    assert_eq!(calc.auto_update_timestamp, Some(snapshot.created_at()));

    // Fresh: served from memory.
    let again = source.fetch().await.unwrap();
    assert!(Arc::ptr_eq(&snapshot, &again));
}

#[tokio::test]
async fn concurrent_async_fetches_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ok_body().set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let source = AsyncSource::new(config(&server)).unwrap();
    let fetches = (0..10).map(|_| source.fetch());
    let results = futures::future::join_all(fetches).await;

    let first = results[0].as_ref().unwrap();
    for r in &results {
        assert!(Arc::ptr_eq(first, r.as_ref().unwrap()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_blocking_fetches_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ok_body().set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let source = SyncSource::new(config(&server)).unwrap();
    let snapshots = tokio::task::spawn_blocking(move || {
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| source.fetch().unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        })
    })
    .await
    .unwrap();

    for s in &snapshots {
        assert!(Arc::ptr_eq(&snapshots[0], s));
    }
}

#[tokio::test]
async fn stale_snapshot_survives_a_failed_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ok_body())
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    // Every snapshot is immediately due for a refresh but stays servable.
    let source = AsyncSource::new(SourceConfig {
        fetch_age: Duration::ZERO,
        ..config(&server)
    })
    .unwrap();

    let original = source.fetch().await.unwrap();
    // Stale: served at once while a refresh starts in the background.
    let served = source.fetch().await.unwrap();
    assert!(Arc::ptr_eq(&original, &served));
    // Joins or restarts the refresh; either way the 404 must not surface.
    let after_404 = source.fetch().await.unwrap();
    assert!(Arc::ptr_eq(&original, &after_404));

    let calc = after_404.calc(&Usage::new(1000, 100), "gpt-4o", None, None).unwrap();
    assert_eq!(calc.total_price, dec!(0.0035));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.len() >= 2, "expected a refresh attempt, saw {} requests", requests.len());
}

#[tokio::test]
async fn failure_without_a_snapshot_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let source = AsyncSource::new(config(&server)).unwrap();
    match source.fetch().await {
        Err(PriceError::Refresh(inner)) => {
            assert!(matches!(*inner, PriceError::Api { status: 404, .. }), "{inner}");
        }
        other => panic!("expected a refresh error, got {other:?}"),
    }
    assert!(source.current().is_none());
}

#[tokio::test]
async fn invalid_data_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"id": "x"}]"#))
        .mount(&server)
        .await;

    let source = AsyncSource::new(config(&server)).unwrap();
    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, PriceError::Refresh(ref inner) if matches!(**inner, PriceError::Json(_))), "{err}");
}

#[tokio::test]
async fn pre_fetch_is_joined_by_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ok_body().set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let source = AsyncSource::new(config(&server)).unwrap();
    source.pre_fetch();
    source.pre_fetch();
    let snapshot = source.fetch().await.unwrap();
    assert_eq!(snapshot.providers().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_source_reports_failure_without_a_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source = SyncSource::new(config(&server)).unwrap();
    let result = tokio::task::spawn_blocking(move || source.fetch()).await.unwrap();
    assert!(matches!(result, Err(PriceError::Refresh(_))));
}

#[test]
fn config_is_validated_up_front() {
    let bad = SourceConfig {
        fetch_age: Duration::from_secs(7200),
        ..SourceConfig::default()
    };
    assert!(matches!(SyncSource::new(bad), Err(PriceError::Config(_))));
}

#[tokio::test]
async fn expired_data_is_refetched_after_a_background_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/data.json")).respond_with(ok_body()).mount(&server).await;

    let source = AsyncSource::new(short_lived(&server)).unwrap();
    let first = source.fetch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let stale = source.fetch().await.unwrap();
    assert!(Arc::ptr_eq(&first, &stale));

    // The background refresh finishes unobserved, then its result expires too.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let latest = source.fetch().await.unwrap();
    assert_ne!(Freshness::of(Some(&*latest), source.config(), Utc::now()), Freshness::Expired);
    assert_eq!(request_count(&server).await, 3);

    // pre_fetch starts new work once nothing is running.
    source.pre_fetch();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(request_count(&server).await, 4);
}

#[tokio::test]
async fn old_background_failure_is_not_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ok_body())
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = AsyncSource::new(short_lived(&server)).unwrap();
    source.fetch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    source.fetch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, PriceError::Refresh(_)), "{err}");
    assert_eq!(request_count(&server).await, 3, "expired data must trigger a new attempt");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_source_refetches_expired_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/data.json")).respond_with(ok_body()).mount(&server).await;

    let source = SyncSource::new(short_lived(&server)).unwrap();
    let (first, stale, latest, config) = tokio::task::spawn_blocking(move || {
        let first = source.fetch().unwrap();
        std::thread::sleep(Duration::from_millis(150));
        let stale = source.fetch().unwrap();
        std::thread::sleep(Duration::from_millis(600));
        let latest = source.fetch().unwrap();
        (first, stale, latest, source.config().clone())
    })
    .await
    .unwrap();

    assert!(Arc::ptr_eq(&first, &stale));
    assert!(!Arc::ptr_eq(&first, &latest));
    assert_ne!(Freshness::of(Some(&*latest), &config, Utc::now()), Freshness::Expired);
    // Three refreshes on three worker threads, one shared client.
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn updater_refreshes_on_a_schedule_until_stopped() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/data.json")).respond_with(ok_body()).mount(&server).await;

    let source = AsyncSource::new(config(&server)).unwrap();
    let updater = source.start_updater(Duration::from_millis(100)).unwrap();
    let first = updater.wait_first().await.unwrap();
    assert_eq!(first.provenance(), Provenance::Fetched);
    // Callers see the updater's data without fetching themselves.
    assert_eq!(source.fetch().await.unwrap().provenance(), Provenance::Fetched);

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(request_count(&server).await >= 3);
    assert!(matches!(updater.last_update(), Some(Ok(_))));

    updater.stop().await;
    let after_stop = request_count(&server).await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(request_count(&server).await, after_stop);
}

#[tokio::test]
async fn updater_reports_a_failed_first_refresh_and_keeps_trying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET")).and(path("/data.json")).respond_with(ok_body()).mount(&server).await;

    let source = AsyncSource::new(config(&server)).unwrap();
    let updater = source.start_updater(Duration::from_millis(100)).unwrap();
    match updater.wait_first().await {
        Err(PriceError::Refresh(inner)) => assert!(matches!(*inner, PriceError::Api { status: 500, .. })),
        other => panic!("expected the first refresh to fail, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(source.current().is_some(), "a later tick should have succeeded");
    updater.stop().await;
}

#[tokio::test]
async fn updater_needs_a_positive_interval() {
    let server = MockServer::start().await;
    let source = AsyncSource::new(config(&server)).unwrap();
    assert!(matches!(source.start_updater(Duration::ZERO), Err(PriceError::Config(_))));
}
