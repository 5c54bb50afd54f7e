use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::error::{AppError, Result};
use crate::models::{Competitor, Product};

/// Turns a product and its competitors into a short market summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, product: &Product, competitors: &[Competitor]) -> Result<String>;
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
    response_format: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisOutput {
    summary: String,
    positioning: String,
    #[serde(default)]
    top_competitors: Vec<CompetitorInsight>,
    #[serde(default)]
    recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CompetitorInsight {
    asin: String,
    title: Option<String>,
    price: Option<f64>,
    currency: Option<String>,
    rating: Option<f64>,
    #[serde(default)]
    key_points: Vec<String>,
}

/// OpenAI-compatible chat completion client. Without an API key every
/// call fails with [`AppError::Config`] and nothing is sent.
pub struct AnalysisClient {
    client: Client,
    config: LlmConfig,
}

impl AnalysisClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(AnalysisClient { client, config })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn complete(&self, api_key: &str, prompt: String) -> Result<String> {
        let body = ChatRequest {
            model: self.config.model.clone(),
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system".into(),
                    content: "You are a market analyst. Reply with a single JSON object.".into(),
                },
                Message {
                    role: "user".into(),
                    content: prompt,
                },
            ],
            response_format: json!({"type": "json_object"}),
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!(model = %self.config.model, "Calling LLM API");
        let res = self.client.post(url).bearer_auth(api_key).json(&body).send().await?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AppError::Auth(format!("LLM provider returned {}", status)));
        }
        if !status.is_success() {
            return Err(AppError::Upstream(format!("LLM provider returned {}", status)));
        }

        let reply: ChatResponse = res.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::parse("LLM", "reply has no content"))
    }
}

#[async_trait]
impl Summarizer for AnalysisClient {
    async fn summarize(&self, product: &Product, competitors: &[Competitor]) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("OPENAI_API_KEY is not set; analysis is disabled".to_string()))?;

        if competitors.is_empty() {
            return Ok(no_competitors_note(product));
        }

        let reply = self.complete(api_key, build_prompt(product, competitors)).await?;
        let output: AnalysisOutput = serde_json::from_str(strip_code_fence(&reply))
            .map_err(|e| AppError::parse("analysis", e))?;

        info!(product = %product.key(), competitors = competitors.len(), "Generated analysis");
        Ok(render(&output))
    }
}

pub fn no_competitors_note(product: &Product) -> String {
    format!(
        "No competitive data is available for {} ({}) on amazon.{}. \
         Fetch competitors first, or try again later if the search returned no results.",
        product.title,
        product.asin,
        product.locale.marketplace().domain
    )
}

pub fn build_prompt(product: &Product, competitors: &[Competitor]) -> String {
    let currency = product.currency.as_deref().unwrap_or("");
    let competitors_json = serde_json::to_string(
        &competitors
            .iter()
            .map(|c| {
                json!({
                    "asin": c.asin,
                    "title": c.title,
                    "price": c.price,
                    "currency": c.currency,
                    "rating": c.rating,
                    "reviews_count": c.reviews_count,
                })
            })
            .collect::<Vec<_>>(),
    )
    .unwrap_or_else(|_| "[]".to_string());

    format!(
        "Given a product and its competitor list, write a concise analysis. \
         Pay attention to currency and pricing context.\n\n\
         Product Title: {}\n\
         Brand: {}\n\
         Price: {} {}\n\
         Rating: {}\n\
         Category: {}\n\
         Amazon Domain: amazon.{}\n\n\
         Competitors (JSON): {}\n\n\
         All prices must be shown with their currency. Compare prices in the same currency context.\n\n\
         Respond with JSON of the form {{\"summary\": string, \"positioning\": string, \
         \"top_competitors\": [{{\"asin\": string, \"title\": string, \"price\": number, \
         \"currency\": string, \"rating\": number, \"key_points\": [string]}}], \
         \"recommendations\": [string]}}.",
        product.title,
        product.brand.as_deref().unwrap_or("-"),
        currency,
        opt(product.price),
        opt(product.rating),
        product.category_path.join(" > "),
        product.locale.marketplace().domain,
        competitors_json,
    )
}

fn render(output: &AnalysisOutput) -> String {
    let mut lines = vec![
        format!("Summary:\n{}", output.summary.trim()),
        format!("\nPositioning:\n{}", output.positioning.trim()),
    ];
    if !output.top_competitors.is_empty() {
        lines.push("\nTop Competitors:".to_string());
        for c in output.top_competitors.iter().take(5) {
            let price = match (c.price, c.currency.as_deref()) {
                (Some(p), Some(cur)) if !cur.is_empty() => format!("{} {:.2}", cur, p),
                (Some(p), _) => format!("{:.2}", p),
                (None, _) => "N/A".to_string(),
            };
            let mut line = format!(
                "- {} | {} | {} | rating {}",
                c.asin,
                c.title.as_deref().unwrap_or("-"),
                price,
                opt(c.rating)
            );
            if !c.key_points.is_empty() {
                line.push_str(" | ");
                line.push_str(&c.key_points.join("; "));
            }
            lines.push(line);
        }
    }
    if !output.recommendations.is_empty() {
        lines.push("\nRecommendations:".to_string());
        lines.extend(output.recommendations.iter().map(|r| format!("- {}", r)));
    }
    lines.join("\n")
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

// Some models wrap JSON in ```json fences even in JSON mode.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
