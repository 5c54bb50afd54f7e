//! Local stand-ins for the scraping and LLM providers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use amazon_competitor_analysis::config::{Config, LlmConfig, ScraperConfig};
use amazon_competitor_analysis::marketplace::SupportedLocales;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Shared {
    replies: Arc<Mutex<VecDeque<(StatusCode, Value)>>>,
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

/// An HTTP server that answers each POST with the next queued reply and
/// records what it was sent.
pub struct MockProvider {
    pub addr: SocketAddr,
    shared: Shared,
}

impl MockProvider {
    pub async fn start() -> Self {
        let shared = Shared::default();
        let app = Router::new()
            .route("/v1/queries", post(reply))
            .route("/v1/chat/completions", post(reply))
            .with_state(shared.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        MockProvider { addr, shared }
    }

    pub fn enqueue(&self, status: StatusCode, body: Value) {
        self.shared.replies.lock().unwrap().push_back((status, body));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.shared.delay.lock().unwrap() = Some(delay);
    }

    /// `(authorization header, JSON body)` of every request received so far.
    pub fn requests(&self) -> Vec<(Option<String>, Value)> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.shared.requests.lock().unwrap().len()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }
}

async fn reply(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    shared.requests.lock().unwrap().push((auth, body));

    let delay = *shared.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let next = shared.replies.lock().unwrap().pop_front();
    match next {
        Some((status, body)) => (status, Json(body)),
        None => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "no reply queued"}))),
    }
}

pub fn scraper_config(provider: &MockProvider) -> ScraperConfig {
    ScraperConfig {
        username: "user".into(),
        password: "secret".into(),
        base_url: format!("{}/queries", provider.base_url()),
        timeout: Duration::from_secs(5),
        max_competitors: 20,
        locales: SupportedLocales::default(),
    }
}

pub fn llm_config(provider: &MockProvider, api_key: Option<&str>) -> LlmConfig {
    LlmConfig {
        api_key: api_key.map(str::to_string),
        base_url: provider.base_url(),
        model: "test-model".into(),
        timeout: Duration::from_secs(5),
    }
}

pub fn config(provider: &MockProvider, store: &Path, api_key: Option<&str>) -> Config {
    Config {
        server_addr: "127.0.0.1:0".parse().unwrap(),
        store_path: store.to_path_buf(),
        scraper: scraper_config(provider),
        llm: llm_config(provider, api_key),
    }
}

pub fn product_reply(title: &str, price: f64) -> Value {
    json!({"results": [{"status_code": 200, "content": {
        "asin": "B000X1",
        "title": title,
        "price": price,
        "rating": 4.1,
        "reviews_count": 57,
        "category": [{"ladder": [{"name": "Tools"}, {"name": "Hand Tools"}]}]
    }}]})
}

pub fn search_reply(items: Value) -> Value {
    json!({"results": [{"status_code": 200, "content": {"results": {"organic": items, "paid": []}}}]})
}

pub fn chat_reply(content: &str) -> Value {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
}
