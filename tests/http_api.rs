//! Drives the JSON API over real HTTP.

mod common;

use amazon_competitor_analysis::{AppState, api::routes::create_router};
use axum::http::StatusCode;
use common::{MockProvider, config, product_reply, search_reply};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

struct Server {
    _dir: TempDir,
    provider: MockProvider,
    base: String,
    http: reqwest::Client,
}

async fn start(api_key: Option<&str>) -> Server {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::start().await;
    let state = AppState::build(config(&provider, &dir.path().join("records.json"), api_key)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });

    Server {
        _dir: dir,
        provider,
        base: format!("http://{}/api", addr),
        http: reqwest::Client::new(),
    }
}

impl Server {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let res = self.http.post(format!("{}{}", self.base, path)).json(&body).send().await.unwrap();
        (res.status().as_u16(), res.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let res = self.http.get(format!("{}{}", self.base, path)).send().await.unwrap();
        (res.status().as_u16(), res.json().await.unwrap())
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let server = start(None).await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"], "ok");
    assert_eq!(body["meta"]["status"], "success");
}

#[tokio::test]
async fn product_and_competitor_flow() {
    let server = start(None).await;
    server.provider.enqueue(StatusCode::OK, product_reply("Widget", 9.99));
    server.provider.enqueue(
        StatusCode::OK,
        search_reply(json!([{"asin": "C1", "title": "Gizmo"}, {"asin": "C2", "title": "Doohickey"}])),
    );

    let (status, body) = server
        .post("/products", json!({"asin": "B000X1", "locale": "us", "geo_location": "10001"}))
        .await;
    assert_eq!(status, 201);
    assert_eq!(body["data"]["title"], "Widget");
    assert_eq!(body["data"]["locale"], "US");

    let (status, body) = server.get("/products/US/B000X1").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["stage"], "fetched");

    let (status, body) = server.post("/products/US/B000X1/competitors", json!({})).await;
    assert_eq!(status, 201);
    assert_eq!(body["data"]["competitors"].as_array().unwrap().len(), 2);

    let (status, body) = server.get("/products/US/B000X1/competitors").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["parent"]["asin"], "B000X1");

    let (status, body) = server.get("/products?page=1&per_page=5").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn errors_use_the_envelope_and_status_taxonomy() {
    let server = start(None).await;

    let (status, body) = server.post("/products", json!({"asin": "B000X1", "locale": "ZZ"})).await;
    assert_eq!(status, 400);
    assert_eq!(body["meta"]["status"], "error");
    assert!(body["data"].is_null());

    let (status, _) = server.get("/products/US/B000X1").await;
    assert_eq!(status, 404);

    let (status, _) = server.post("/products/US/B000X1/analysis", json!({})).await;
    assert_eq!(status, 409);

    server.provider.enqueue(StatusCode::UNAUTHORIZED, json!({}));
    let (status, body) = server.post("/products", json!({"asin": "B000X1", "locale": "US"})).await;
    assert_eq!(status, 502);
    assert!(body["meta"]["message"].as_str().unwrap().contains("Authentication"));
}

#[tokio::test]
async fn malformed_requests_get_the_error_envelope() {
    let server = start(None).await;

    let res = server
        .http
        .post(format!("{}/products", server.base))
        .header("content-type", "application/json")
        .body("{\"asin\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["meta"]["status"], "error");
    assert!(body["data"].is_null());

    let (status, body) = server.post("/products", json!({"locale": "US"})).await;
    assert_eq!(status, 400);
    assert!(body["meta"]["message"].as_str().unwrap().contains("asin"));

    let (status, body) = server.get("/products?page=first").await;
    assert_eq!(status, 400);
    assert_eq!(body["meta"]["status"], "error");
    assert_eq!(server.provider.request_count(), 0);
}

#[tokio::test]
async fn analysis_without_key_is_service_unavailable() {
    let server = start(None).await;
    server.provider.enqueue(StatusCode::OK, product_reply("Widget", 9.99));
    server.provider.enqueue(StatusCode::OK, search_reply(json!([{"asin": "C1", "title": "Gizmo"}])));

    server.post("/products", json!({"asin": "B000X1", "locale": "US"})).await;
    server.post("/products/US/B000X1/competitors", json!({})).await;
    let (status, body) = server.post("/products/US/B000X1/analysis", json!({})).await;

    assert_eq!(status, 503);
    assert!(body["meta"]["message"].as_str().unwrap().contains("OPENAI_API_KEY"));
}
