//! End-to-end tests of the HTTP surface: routing, secrets, validation and
//! the flush flow.

mod support;

use prerender_common::secret::SecretStore;
use prerender_server::config::{FetcherConfig, RenderLimits};
use prerender_server::{HttpFetcher, HttpServer, PackageCache, Renderer, ServerState};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use support::{Route, spawn_server};

const ECHO_ENTRY: &str = r#"
    __registerForSSR__(function (props) {
        return Promise.resolve({
            html: "HTML: " + JSON.stringify(props),
            css: "CSS: " + JSON.stringify(props)
        });
    });
"#;

struct TestService {
    addr: SocketAddr,
    client: reqwest::Client,
    _secret_file: tempfile::NamedTempFile,
}

impl TestService {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }
}

async fn spawn_service() -> TestService {
    let mut secret_file = tempfile::NamedTempFile::new().unwrap();
    write!(secret_file, "sekret").unwrap();
    secret_file.flush().unwrap();

    let http = reqwest::Client::new();
    let fetcher = HttpFetcher::new(
        http.clone(),
        FetcherConfig::new()
            .with_retry_delay(Duration::from_millis(1))
            .with_attempt_timeout(Duration::from_secs(5)),
    );
    let cache = Arc::new(PackageCache::new(Arc::new(fetcher)));
    let renderer = Renderer::new(
        cache,
        http,
        RenderLimits::new().with_render_timeout(Duration::from_secs(5)),
    );

    let state = Arc::new(ServerState {
        renderer,
        secrets: SecretStore::from_file(secret_file.path()),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = HttpServer::new(state).serve(listener).await;
    });

    TestService {
        addr,
        client: reqwest::Client::new(),
        _secret_file: secret_file,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping() {
    let service = spawn_service().await;
    let response = service.get("/_api/ping").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "pong!\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lifecycle_endpoints() {
    let service = spawn_service().await;
    for path in ["/_ah/health", "/_ah/start", "/_ah/stop"] {
        let response = service.get(path).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "ok!\n");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_version_reflects_environment() {
    let service = spawn_service().await;

    let response = service.get("/_api/version").await;
    assert_eq!(response.text().await.unwrap(), "dev\n");

    unsafe { std::env::set_var("GAE_VERSION", "foo-version") };
    let response = service.get("/_api/version").await;
    assert_eq!(response.text().await.unwrap(), "foo-version\n");
    unsafe { std::env::remove_var("GAE_VERSION") };
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_route_is_404() {
    let service = spawn_service().await;
    let response = service.get("/nope").await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_render_happy_path_over_http() {
    let packages = spawn_server(HashMap::from([(
        "/entry.js".to_string(),
        Route::ok(ECHO_ENTRY),
    )]))
    .await;
    let service = spawn_service().await;

    let response = service
        .post(
            "/render",
            json!({
                "urls": [packages.url("/entry.js")],
                "props": {"name": "NAME", "date": "DATE"},
                "secret": "sekret",
            }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["html"], r#"HTML: {"name":"NAME","date":"DATE"}"#);
    assert_eq!(body["css"], r#"CSS: {"name":"NAME","date":"DATE"}"#);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_bodies_are_rejected() {
    let service = spawn_service().await;
    let abs = "https://cdn.example.com/entry.js";

    let cases = vec![
        json!({}),
        json!({"props": {"bar": 4}, "secret": "sekret"}),
        json!({"urls": [], "props": {"bar": 4}, "secret": "sekret"}),
        json!({"urls": ["foo"], "props": {"bar": 4}, "secret": "sekret"}),
        json!({"urls": [abs], "props": "foo", "secret": "sekret"}),
        json!({"urls": [abs], "props": {"bar": 4}}),
        json!({"urls": [abs], "props": {"bar": 4}, "secret": "bad"}),
    ];

    for case in cases {
        let response = service.post("/render", case.clone()).await;
        assert_eq!(response.status(), 400, "expected 400 for {}", case);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_secret_message_is_stable() {
    let service = spawn_service().await;
    let response = service
        .post(
            "/render",
            json!({
                "urls": ["https://cdn.example.com/entry.js"],
                "props": {},
                "secret": "wrong",
            }),
        )
        .await;

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Missing or invalid secret");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_render_requires_json_content_type() {
    let service = spawn_service().await;
    let response = service
        .client
        .post(service.url("/render"))
        .header("content-type", "text/plain")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fetch_failure_maps_to_500() {
    let packages = spawn_server(HashMap::new()).await;
    let service = spawn_service().await;

    let response = service
        .post(
            "/render",
            json!({
                "urls": [packages.url("/gone.js")],
                "props": {},
                "secret": "sekret",
            }),
        )
        .await;

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("failed to fetch"));
    assert!(body["stack"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flush_drops_the_cache() {
    let packages = spawn_server(HashMap::from([(
        "/entry.js".to_string(),
        Route::ok(ECHO_ENTRY),
    )]))
    .await;
    let service = spawn_service().await;

    let request = json!({
        "urls": [packages.url("/entry.js")],
        "props": {},
        "secret": "sekret",
    });

    // Two renders, one upstream fetch: the second hits the cache.
    service.post("/render", request.clone()).await;
    service.post("/render", request.clone()).await;
    assert_eq!(packages.hits(), 1);

    let response = service.post("/flush", json!({"secret": "sekret"})).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "dev\n");

    // Post-flush, the same URL is fetched upstream again.
    service.post("/render", request).await;
    assert_eq!(packages.hits(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flush_requires_the_secret() {
    let service = spawn_service().await;
    let response = service.post("/flush", json!({"secret": "nope"})).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_bodies_are_rejected() {
    let service = spawn_service().await;
    let padding = "x".repeat(5 * 1024 * 1024 + 1024);
    let response = service
        .post("/render", json!({"props": {"padding": padding}}))
        .await;
    assert_eq!(response.status(), 413);
}
