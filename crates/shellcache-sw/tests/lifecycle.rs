//! End-to-end lifecycle scenarios over a scripted network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use shellcache_net::{FetchFuture, Fetcher, NetError, Request, Response, UrlPattern};
use shellcache_sw::{CacheStorage, GatewayConfig, ServiceWorkerState, ShellCacheGateway};
use url::Url;

/// Network whose answers can be swapped between requests.
#[derive(Default)]
struct ScriptedNetwork {
    bodies: Mutex<HashMap<String, &'static str>>,
    offline: Mutex<bool>,
}

impl ScriptedNetwork {
    fn serve(&self, url: &str, body: &'static str) {
        self.bodies.lock().unwrap().insert(url.to_string(), body);
    }

    fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

impl Fetcher for ScriptedNetwork {
    fn fetch<'a>(&'a self, request: &'a Request) -> FetchFuture<'a> {
        Box::pin(async move {
            if *self.offline.lock().unwrap() {
                return Err(NetError::RequestFailed("network unreachable".into()));
            }
            let body = self.bodies.lock().unwrap().get(request.url.as_str()).copied();
            match body {
                Some(body) => Ok(Response::new(
                    request.url.clone(),
                    StatusCode::OK,
                    HeaderMap::new(),
                    Bytes::from_static(body.as_bytes()),
                )),
                None => Err(NetError::RequestFailed("connection refused".into())),
            }
        })
    }
}

fn config(version: &str) -> GatewayConfig {
    GatewayConfig {
        cache_prefix: None,
        version: version.to_string(),
        scope: "https://app.example.com/".to_string(),
        manifest: vec!["/".to_string(), "/index.html".to_string()],
        backend: UrlPattern::host("api.example.com"),
        ..Default::default()
    }
}

fn network() -> Arc<ScriptedNetwork> {
    let net = Arc::new(ScriptedNetwork::default());
    net.serve("https://app.example.com/", "<html>shell</html>");
    net.serve("https://app.example.com/index.html", "<html>shell</html>");
    net
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[tokio::test]
async fn version_bump_replaces_generation() {
    let net = network();
    let caches = CacheStorage::new().shared();

    let (v1, _rx) = ShellCacheGateway::new(&config("v1"), net.clone(), caches.clone()).unwrap();
    v1.install().await.unwrap();
    {
        let storage = caches.read().await;
        let generation = storage.get("v1").unwrap();
        assert!(generation.match_request(&url("https://app.example.com/")).is_some());
        assert!(generation
            .match_request(&url("https://app.example.com/index.html"))
            .is_some());
    }

    let (v2, _rx) = ShellCacheGateway::new(&config("v2"), net.clone(), caches.clone()).unwrap();
    v2.install().await.unwrap();
    assert_eq!(caches.read().await.keys(), vec!["v1", "v2"]);

    let deleted = v2.activate().await.unwrap();

    assert_eq!(deleted, vec!["v1".to_string()]);
    let storage = caches.read().await;
    assert!(!storage.has("v1"));
    let generation = storage.get("v2").unwrap();
    assert_eq!(
        generation.keys(),
        vec!["https://app.example.com/", "https://app.example.com/index.html"]
    );
}

#[tokio::test]
async fn backend_rows_network_then_offline_fallback() {
    let net = network();
    let caches = CacheStorage::new().shared();
    let (gateway, _rx) = ShellCacheGateway::new(&config("v1"), net.clone(), caches.clone()).unwrap();
    gateway.start().await.unwrap();
    assert_eq!(gateway.state().await, ServiceWorkerState::Activated);

    let rows = Request::get(url("https://api.example.com/rows"));

    // Online: the live body comes back and nothing is cached.
    net.serve("https://api.example.com/rows", r#"{"a":1}"#);
    let before = caches.read().await.total_bytes();
    let response = gateway.handle_fetch(&rows).await.unwrap();
    assert_eq!(response.text().unwrap(), r#"{"a":1}"#);
    assert_eq!(caches.read().await.total_bytes(), before);

    // Offline with an older copy present: the copy is served.
    let stale = Response::new(
        url("https://api.example.com/rows"),
        StatusCode::OK,
        HeaderMap::new(),
        Bytes::from_static(br#"{"a":0}"#),
    );
    caches
        .write()
        .await
        .put(
            "v1",
            shellcache_sw::CacheEntry::from_response(&rows.url, &stale),
        )
        .unwrap();
    net.set_offline(true);

    let response = gateway.handle_fetch(&rows).await.unwrap();
    assert!(response.from_cache);
    assert_eq!(response.text().unwrap(), r#"{"a":0}"#);
}

#[tokio::test]
async fn shell_survives_restart_while_offline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("caches.json");
    let net = network();

    {
        let caches = CacheStorage::new().shared();
        let (gateway, _rx) =
            ShellCacheGateway::new(&config("v1"), net.clone(), caches.clone()).unwrap();
        gateway.start().await.unwrap();
        caches.read().await.save(&path).await.unwrap();
    }

    net.set_offline(true);
    let caches = CacheStorage::load(&path, None).await.unwrap().shared();
    let (gateway, _rx) = ShellCacheGateway::new(&config("v1"), net.clone(), caches).unwrap();
    gateway.start().await.unwrap();

    let response = gateway
        .handle_fetch(&Request::get(url("https://app.example.com/index.html")))
        .await
        .unwrap();
    assert!(response.from_cache);
    assert_eq!(response.text().unwrap(), "<html>shell</html>");

    // Anything outside the shell still fails while offline.
    assert!(gateway
        .handle_fetch(&Request::get(url("https://app.example.com/report.csv")))
        .await
        .is_err());
}
