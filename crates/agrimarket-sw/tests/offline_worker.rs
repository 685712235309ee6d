//! End-to-end behaviour of the caching worker against a live HTTP origin.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agrimarket_net::{Request, RequestDestination};
use agrimarket_sw::push::{DEFAULT_BODY, DEFAULT_TAG, DEFAULT_URL};
use agrimarket_sw::{
    select_worker, CacheCategory, ContainerOptions, MessageTarget, ProductionCachingWorker,
    RegistrationOptions, ServiceWorkerContainer, ServiceWorkerError, SharedCacheStorage,
    SyncHandler, WorkerConfig, WorkerScope, SYNC_DATA_TAG,
};
use async_trait::async_trait;
use bytes::Bytes;
use common::{data_caching_config, Harness, SwitchableNetwork};
use http::StatusCode;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn body(response: &agrimarket_net::Response) -> String {
    response.text().unwrap()
}

#[tokio::test]
async fn test_non_get_requests_bypass_the_cache() {
    let harness = Harness::installed(WorkerConfig::default()).await;
    Mock::given(method("POST"))
        .and(path("/index.html"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&harness.server)
        .await;
    let static_cache = harness.cache_name(CacheCategory::Static);
    let before = harness.caches.entry_count(&static_cache).await;

    let request = Request::post(harness.url("/index.html"), Bytes::from_static(b"{\"qty\":3}"));
    let response = harness.fetch(request).await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(body(&response), "created");
    assert_eq!(harness.caches.entry_count(&static_cache).await, before);
}

#[tokio::test]
async fn test_no_cache_requests_always_hit_the_network() {
    let harness = Harness::installed(WorkerConfig::default()).await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(3)
        .mount(&harness.server)
        .await;

    for _ in 0..3 {
        assert_eq!(body(&harness.get("/api/products").await), "[]");
    }
    assert_eq!(harness.caches.entry_count(&harness.cache_name(CacheCategory::Data)).await, 0);
}

#[tokio::test]
async fn test_cache_first_serves_repeat_requests_without_network() {
    let harness = Harness::installed(WorkerConfig::default()).await;
    Mock::given(method("GET"))
        .and(path("/img/tomato.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
        .expect(1)
        .mount(&harness.server)
        .await;

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let response = harness.get_as("/img/tomato.png", RequestDestination::Image).await;
        bodies.push(response.body().clone());
    }

    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(harness.caches.entry_count(&harness.cache_name(CacheCategory::Images)).await, 1);
}

#[tokio::test]
async fn test_network_first_returns_and_stores_live_response() {
    let harness = Harness::installed(data_caching_config()).await;
    let data_cache = harness.cache_name(CacheCategory::Data);
    Mock::given(method("GET"))
        .and(path("/api/prices"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"maize":310}"#))
        .mount(&harness.server)
        .await;

    let stale = agrimarket_net::Response::from_parts(
        harness.url("/api/prices"),
        StatusCode::OK,
        http::HeaderMap::new(),
        r#"{"maize":250}"#,
    );
    let request = Request::get(harness.url("/api/prices"));
    harness.caches.put(&data_cache, &request, &stale).await.unwrap();

    let live = harness.get("/api/prices").await;
    assert_eq!(body(&live), r#"{"maize":310}"#);
    let cached = harness.caches.match_in(&data_cache, &request).await.unwrap();
    assert_eq!(body(&cached), r#"{"maize":310}"#);
}

#[tokio::test]
async fn test_offline_fallbacks() {
    let harness = Harness::installed(data_caching_config()).await;
    harness.network.set_online(false);

    let image = harness.get_as("/img/unseen.png", RequestDestination::Image).await;
    assert_eq!(image.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(image.header("content-type"), Some("text/plain"));
    assert_eq!(body(&image), "Offline");

    let data = harness.get("/api/orders").await;
    assert_eq!(data.status, StatusCode::SERVICE_UNAVAILABLE);
    let payload: serde_json::Value = data.json().unwrap();
    assert_eq!(payload["error"], "Offline");
    assert_eq!(payload["message"], harness.config.offline_message.as_str());
}

#[tokio::test]
async fn test_stale_while_revalidate_answers_before_network() {
    let harness = Harness::installed(WorkerConfig::default()).await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200).set_body_string("catalogue v1"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("catalogue v2")
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&harness.server)
        .await;
    let page = || Request::navigate(harness.url("/products"));

    assert_eq!(body(&harness.fetch(page()).await), "catalogue v1");

    let started = Instant::now();
    let stale = harness.fetch(page()).await;
    assert_eq!(body(&stale), "catalogue v1");
    assert!(started.elapsed() < Duration::from_millis(400));

    harness.container.wait_for_background().await.unwrap();
    let cached = harness
        .caches
        .match_in(&harness.cache_name(CacheCategory::Static), &page())
        .await
        .unwrap();
    assert_eq!(body(&cached), "catalogue v2");
}

#[tokio::test]
async fn test_activation_evicts_previous_generation_only() {
    let v1 = WorkerConfig {
        cache_prefix: "app".to_string(),
        version: "v1".to_string(),
        ..Default::default()
    };
    let v2 = WorkerConfig {
        version: "v2".to_string(),
        ..v1.clone()
    };
    let harness = Harness::new(v1.clone()).await;
    harness.caches.open("other-app-cache").await;

    harness.install(v1).await.unwrap();
    assert!(harness.caches.has("app-static-v1").await);

    harness.install(v2).await.unwrap();
    assert_eq!(
        harness.caches.keys().await,
        ["app-data-v2", "app-images-v2", "app-static-v2", "other-app-cache"]
    );
    let registration = harness.container.registration(&harness.scope).await.unwrap();
    assert_eq!(registration.controller().map(|w| w.version.as_str()), Some("v2"));
}

#[tokio::test]
async fn test_development_host_tears_everything_down() {
    common::init_test_logging();
    let (container, _events) =
        ServiceWorkerContainer::new(SwitchableNetwork::new(), SharedCacheStorage::default(), ContainerOptions::default());
    for name in ["agrimarket-static-v3.0.0", "agrimarket-data-v2.0.0", "legacy"] {
        container.caches().open(name).await;
    }
    let page = container.open_page(Url::parse("http://192.168.1.5:8080/market").unwrap()).await;

    let behavior = select_worker(Arc::new(WorkerConfig::default()), "192.168.1.5").unwrap();
    container
        .register("http://192.168.1.5:8080/sw.js", RegistrationOptions::default(), behavior)
        .await
        .unwrap();

    assert!(container.caches().keys().await.is_empty());
    assert!(container.get_registrations().await.is_empty());
    let reloaded = container.client(&page.id).await.unwrap();
    assert_eq!(reloaded.navigation_count, 1);
    assert_eq!(reloaded.url, page.url);
}

#[tokio::test]
async fn test_install_is_all_or_nothing() {
    let harness = Harness::new(WorkerConfig::default()).await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&harness.server)
        .await;

    let result = harness.install(harness.config.clone()).await;

    assert!(matches!(result, Err(ServiceWorkerError::InstallFailed(_))));
    assert_eq!(harness.caches.entry_count(&harness.cache_name(CacheCategory::Static)).await, 0);
    let registration = harness.container.registration(&harness.scope).await.unwrap();
    assert!(registration.controller().is_none());
    assert!(registration.waiting.is_none());
}

#[tokio::test]
async fn test_cache_urls_message_is_atomic() {
    let harness = Harness::installed(WorkerConfig::default()).await;
    let static_cache = harness.cache_name(CacheCategory::Static);
    for asset in ["/offline.html", "/about"] {
        Mock::given(method("GET"))
            .and(path(asset))
            .respond_with(ResponseTemplate::new(200).set_body_string(asset))
            .mount(&harness.server)
            .await;
    }
    let installed = harness.caches.entry_count(&static_cache).await;

    let partial = harness
        .container
        .post_message(
            &harness.scope,
            MessageTarget::Active,
            json!({"type": "CACHE_URLS", "urls": ["/offline.html", "/not-there"]}),
        )
        .await;
    assert!(partial.is_err());
    assert_eq!(harness.caches.entry_count(&static_cache).await, installed);

    harness
        .container
        .post_message(
            &harness.scope,
            MessageTarget::Active,
            json!({"type": "CACHE_URLS", "urls": ["/offline.html", "/about"]}),
        )
        .await
        .unwrap();
    assert_eq!(harness.caches.entry_count(&static_cache).await, installed + 2);
}

#[tokio::test]
async fn test_malformed_messages_change_nothing() {
    let harness = Harness::installed(WorkerConfig::default()).await;
    let keys = harness.caches.keys().await;

    for message in [
        json!({"type": "PURGE"}),
        json!({"type": "CACHE_URLS", "urls": 5}),
        json!({"urls": ["/x"]}),
        json!("CLEAR_CACHE"),
        json!(null),
    ] {
        harness
            .container
            .post_message(&harness.scope, MessageTarget::Active, message)
            .await
            .unwrap();
    }

    assert_eq!(harness.caches.keys().await, keys);
}

#[tokio::test]
async fn test_push_and_notification_click() {
    let harness = Harness::installed(WorkerConfig::default()).await;
    let home = harness.container.open_page(harness.url(DEFAULT_URL)).await;

    harness
        .container
        .dispatch_push(&harness.scope, Some(br#"{"title":"Fresh tomatoes","tag":42}"#.as_slice()))
        .await
        .unwrap();
    let shown = harness.container.notifications().await;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Fresh tomatoes");
    assert_eq!(shown[0].body, DEFAULT_BODY);
    assert_eq!(shown[0].tag, DEFAULT_TAG);

    harness.container.notification_click(&harness.scope, DEFAULT_TAG).await.unwrap();

    assert!(harness.container.notifications().await.is_empty());
    assert_eq!(harness.container.clients().await.len(), 1);
    assert!(harness.container.client(&home.id).await.unwrap().focused);
}

#[tokio::test]
async fn test_failing_sync_is_retried_then_surfaces() {
    struct AlwaysFails(AtomicU32);

    #[async_trait]
    impl SyncHandler for AlwaysFails {
        async fn synchronize(&self, _scope: &WorkerScope) -> agrimarket_sw::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ServiceWorkerError::SyncFailed("cooperative ledger unreachable".to_string()))
        }
    }

    let harness = Harness::new(WorkerConfig::default()).await;
    let handler = Arc::new(AlwaysFails(AtomicU32::new(0)));
    let worker = ProductionCachingWorker::new(Arc::new(harness.config.clone()))
        .unwrap()
        .with_sync_handler(handler.clone());
    harness
        .container
        .register(&harness.script_url(), RegistrationOptions::default(), Arc::new(worker))
        .await
        .unwrap();

    let result = harness.container.dispatch_sync(&harness.scope, SYNC_DATA_TAG).await;

    assert!(matches!(result, Err(ServiceWorkerError::SyncFailed(_))));
    assert_eq!(handler.0.load(Ordering::SeqCst), harness.config.sync_retry_attempts);
    assert!(harness.container.dispatch_sync(&harness.scope, "other").await.is_ok());
}

#[tokio::test]
async fn test_cache_snapshot_survives_restart() {
    let harness = Harness::installed(WorkerConfig::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("state").join("caches.json");

    harness.caches.save(&file).await.unwrap();

    let restored = SharedCacheStorage::default();
    assert_eq!(restored.load(&file).await.unwrap(), 3);
    assert_eq!(restored.keys().await, harness.caches.keys().await);

    let static_cache = harness.cache_name(CacheCategory::Static);
    let index = Request::get(harness.url("/index.html"));
    let response = restored.match_in(&static_cache, &index).await.unwrap();
    assert_eq!(body(&response), "/index.html");
}

#[tokio::test]
async fn test_scenario_document_cached_on_first_visit() {
    let harness = Harness::installed(WorkerConfig {
        precache_manifest: vec!["/".to_string()],
        ..Default::default()
    })
    .await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>market</html>"))
        .mount(&harness.server)
        .await;
    let static_cache = harness.cache_name(CacheCategory::Static);
    let request = Request::navigate(harness.url("/index.html"));
    assert!(harness.caches.match_in(&static_cache, &request).await.is_none());

    let response = harness.fetch(request.clone()).await;

    assert_eq!(body(&response), "<html>market</html>");
    let cached = harness.caches.match_in(&static_cache, &request).await.unwrap();
    assert_eq!(body(&cached), "<html>market</html>");
}

#[tokio::test]
async fn test_scenario_data_served_from_cache_when_offline() {
    let harness = Harness::installed(data_caching_config()).await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "status": 200})))
        .mount(&harness.server)
        .await;
    let data_cache = harness.cache_name(CacheCategory::Data);

    let live = harness.get("/api/products").await;
    assert_eq!(live.json::<serde_json::Value>().unwrap(), json!({"ok": true, "status": 200}));
    assert_eq!(harness.caches.entry_count(&data_cache).await, 1);

    harness.network.set_online(false);
    let offline = harness.get("/api/products").await;
    assert_eq!(offline.status, StatusCode::OK);
    assert_eq!(offline.body(), live.body());
}

#[tokio::test]
async fn test_scenario_clear_cache_forces_refetch() {
    let harness = Harness::installed(WorkerConfig::default()).await;
    Mock::given(method("GET"))
        .and(path("/img/maize.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_string("jpeg"))
        .expect(2)
        .mount(&harness.server)
        .await;

    harness.get_as("/img/maize.jpg", RequestDestination::Image).await;
    harness.get_as("/img/maize.jpg", RequestDestination::Image).await;

    harness
        .container
        .post_message(&harness.scope, MessageTarget::Active, json!({"type": "CLEAR_CACHE"}))
        .await
        .unwrap();
    assert!(harness.caches.keys().await.is_empty());

    let refetched = harness.get_as("/img/maize.jpg", RequestDestination::Image).await;
    assert_eq!(body(&refetched), "jpeg");
}
