use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::marketplace::Locale;

/// Identifies one stored product snapshot: the same ASIN in two marketplaces
/// is two products.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductKey {
    pub asin: String,
    pub locale: Locale,
}

impl ProductKey {
    pub fn new(asin: &str, locale: Locale) -> Result<Self> {
        Ok(ProductKey {
            asin: validate_asin(asin)?,
            locale,
        })
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.locale, self.asin)
    }
}

pub fn validate_asin(asin: &str) -> Result<String> {
    let asin = asin.trim();
    if asin.is_empty() {
        return Err(AppError::InvalidInput("Product identifier must not be empty".to_string()));
    }
    if asin.contains(|c: char| c.is_whitespace() || c == '/') {
        return Err(AppError::InvalidInput(format!("Invalid product identifier: {:?}", asin)));
    }
    Ok(asin.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub asin: String,
    pub locale: Locale,
    pub title: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub rating: Option<f64>,
    pub reviews_count: Option<u64>,
    /// Most specific category, when the provider reports one.
    pub category: Option<String>,
    #[serde(default)]
    pub category_path: Vec<String>,
    pub brand: Option<String>,
    pub url: Option<String>,
    pub stock: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub geo_location: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl Product {
    pub fn key(&self) -> ProductKey {
        ProductKey {
            asin: self.asin.clone(),
            locale: self.locale.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competitor {
    pub asin: String,
    pub title: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub rating: Option<f64>,
    pub reviews_count: Option<u64>,
    /// ASIN of the product this competitor was discovered for.
    pub parent_asin: String,
}

/// One competitor search for one product. Replaced wholesale by the next
/// search for the same product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorSet {
    pub parent: ProductKey,
    pub query: String,
    pub category: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub competitors: Vec<Competitor>,
}

/// Transient analysis output; held in memory only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub asin: String,
    pub locale: Locale,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}
