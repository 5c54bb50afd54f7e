//! Client for the Oxylabs realtime scraping API.
//!
//! Oxylabs does the crawling and parsing; this module sends one query per
//! call and maps the loosely structured JSON it returns onto [`Product`] and
//! [`Competitor`] through typed intermediate structs, so nothing untyped
//! reaches the store.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::error::{AppError, Result};
use crate::models::{Competitor, Product, ProductKey};

/// Source of product and competitor data.
#[async_trait]
pub trait ProductScraper: Send + Sync {
    /// Looks up one product page. Makes exactly one outbound request.
    async fn fetch_product(&self, key: &ProductKey, geo_location: Option<&str>) -> Result<Product>;

    /// Searches the product's marketplace for similar items. Makes exactly
    /// one outbound request; an empty result is not an error.
    async fn search_competitors(&self, product: &Product) -> Result<CompetitorSearch>;
}

/// Outcome of one competitor search.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitorSearch {
    pub query: String,
    pub category: Option<String>,
    pub competitors: Vec<Competitor>,
}

pub struct OxylabsClient {
    client: Client,
    config: ScraperConfig,
}

#[derive(Serialize)]
struct Query<'a> {
    source: &'static str,
    query: &'a str,
    domain: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    geo_location: Option<&'a str>,
    parse: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    refinements: Option<Refinements<'a>>,
}

#[derive(Serialize)]
struct Refinements<'a> {
    category: &'a str,
}

impl OxylabsClient {
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(std::time::Duration::from_secs(10)))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(OxylabsClient { client, config })
    }

    async fn post_query(&self, query: &Query<'_>) -> Result<Value> {
        debug!(source = query.source, query = query.query, domain = query.domain, "Sending scraper query");
        let response = self
            .client
            .post(&self.config.base_url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AppError::Auth(format!("scraper returned {}", status)));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("{} not found upstream", query.query)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("scraper returned {}: {}", status, snippet(&body))));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| AppError::parse("scraper", e))
    }
}

#[async_trait]
impl ProductScraper for OxylabsClient {
    async fn fetch_product(&self, key: &ProductKey, geo_location: Option<&str>) -> Result<Product> {
        let market = key.locale.marketplace();
        let raw = self
            .post_query(&Query {
                source: "amazon_product",
                query: &key.asin,
                domain: market.domain,
                geo_location,
                parse: true,
                refinements: None,
            })
            .await?;

        let product = map_product(key, geo_location, &raw)?;
        info!(product = %key, title = %product.title, price = ?product.price, "Fetched product");
        Ok(product)
    }

    async fn search_competitors(&self, product: &Product) -> Result<CompetitorSearch> {
        let query = clean_search_title(&product.title);
        let category = product.category.clone();
        let raw = self
            .post_query(&Query {
                source: "amazon_search",
                query: &query,
                domain: product.locale.marketplace().domain,
                geo_location: product.geo_location.as_deref(),
                parse: true,
                refinements: category.as_deref().map(|category| Refinements { category }),
            })
            .await?;

        let competitors = map_search(product, &raw, self.config.max_competitors)?;
        info!(product = %product.key(), query = %query, found = competitors.len(), "Searched competitors");
        Ok(CompetitorSearch {
            query,
            category,
            competitors,
        })
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    results: Option<Vec<ResultEntry>>,
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Deserialize)]
struct ResultEntry {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    status_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ProductContent {
    asin: Option<String>,
    title: Option<String>,
    price: Option<f64>,
    currency: Option<String>,
    rating: Option<f64>,
    reviews_count: Option<u64>,
    brand: Option<String>,
    url: Option<String>,
    stock: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    category_path: Vec<String>,
    #[serde(default)]
    category: Vec<CategoryLadder>,
}

#[derive(Debug, Deserialize)]
struct CategoryLadder {
    #[serde(default)]
    ladder: Vec<LadderStep>,
}

#[derive(Debug, Deserialize)]
struct LadderStep {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchContent {
    #[serde(default)]
    results: SearchBuckets,
    #[serde(default)]
    products: Vec<SearchItem>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchBuckets {
    #[serde(default)]
    organic: Vec<SearchItem>,
    #[serde(default)]
    paid: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(alias = "product_asin")]
    asin: Option<String>,
    title: Option<String>,
    price: Option<f64>,
    currency: Option<String>,
    rating: Option<f64>,
    reviews_count: Option<u64>,
}

/// Pulls the first result's `content` out of a provider response.
fn extract_content(raw: &Value, query: &str) -> Result<Value> {
    let envelope: Envelope =
        serde_json::from_value(raw.clone()).map_err(|e| AppError::parse("scraper", e))?;

    match (envelope.results, envelope.content) {
        (Some(results), _) => {
            let first = results
                .into_iter()
                .next()
                .ok_or_else(|| AppError::NotFound(format!("no results for {}", query)))?;
            match first.status_code {
                Some(404) => Err(AppError::NotFound(format!("{} not found upstream", query))),
                Some(code) if !(200..300).contains(&code) => {
                    Err(AppError::Upstream(format!("scraper job for {} failed with {}", query, code)))
                }
                _ => first
                    .content
                    .ok_or_else(|| AppError::parse("scraper", "result has no content")),
            }
        }
        (None, Some(content)) => Ok(content),
        (None, None) => Err(AppError::parse("scraper", "neither results nor content present")),
    }
}

fn map_product(key: &ProductKey, geo_location: Option<&str>, raw: &Value) -> Result<Product> {
    let content = extract_content(raw, &key.asin)?;
    let content: ProductContent =
        serde_json::from_value(content).map_err(|e| AppError::parse("product", e))?;

    let title = content
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::parse("product", "missing title"))?;

    if let Some(asin) = content.asin.as_deref().filter(|a| !a.is_empty()) {
        if !asin.eq_ignore_ascii_case(&key.asin) {
            debug!(requested = %key.asin, returned = asin, "Provider returned a different ASIN");
        }
    }

    let category_path: Vec<String> = if content.category_path.is_empty() {
        content
            .category
            .into_iter()
            .next()
            .map(|c| c.ladder.into_iter().map(|step| step.name).collect())
            .unwrap_or_default()
    } else {
        content.category_path
    };
    let category_path: Vec<String> = category_path
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    Ok(Product {
        asin: key.asin.clone(),
        locale: key.locale.clone(),
        title,
        price: content.price,
        currency: content
            .currency
            .or_else(|| Some(key.locale.marketplace().currency.to_string())),
        rating: content.rating,
        reviews_count: content.reviews_count,
        category: category_path.last().cloned(),
        category_path,
        brand: content.brand,
        url: content.url,
        stock: content.stock,
        images: content.images,
        geo_location: geo_location.map(str::to_string),
        fetched_at: Utc::now(),
    })
}

fn map_search(parent: &Product, raw: &Value, limit: usize) -> Result<Vec<Competitor>> {
    let content = extract_content(raw, &parent.title)?;
    let content: SearchContent =
        serde_json::from_value(content).map_err(|e| AppError::parse("search", e))?;

    let items = content
        .results
        .organic
        .into_iter()
        .chain(content.results.paid)
        .chain(content.products);

    let mut seen = HashSet::new();
    let mut competitors = Vec::new();
    for item in items {
        if competitors.len() >= limit {
            break;
        }
        let (Some(asin), Some(title)) = (item.asin, item.title) else {
            continue;
        };
        if asin.is_empty() || title.trim().is_empty() || asin == parent.asin {
            continue;
        }
        if !seen.insert(asin.clone()) {
            continue;
        }
        competitors.push(Competitor {
            asin,
            title: title.trim().to_string(),
            price: item.price,
            currency: item.currency.or_else(|| parent.currency.clone()),
            rating: item.rating,
            reviews_count: item.reviews_count,
            parent_asin: parent.asin.clone(),
        });
    }
    Ok(competitors)
}

/// Strips marketing suffixes (`" - ..."`, `"| ..."`) from a product title.
/// Falls back to the whole title when nothing precedes the separator.
pub fn clean_search_title(title: &str) -> String {
    let cleaned = title.split(" - ").next().unwrap_or(title);
    let cleaned = cleaned.split('|').next().unwrap_or(cleaned).trim();
    if cleaned.is_empty() {
        title.trim().to_string()
    } else {
        cleaned.to_string()
    }
}

fn snippet(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
