use serde::{Deserialize, Serialize};

use crate::models::{AnalysisResult, Product};
use crate::pipeline::Stage;

#[derive(Deserialize)]
pub struct FetchProductRequest {
    pub asin: String,
    pub locale: String,
    /// Postal code the provider should price and ship to.
    #[serde(default)]
    pub geo_location: Option<String>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    5
}

#[derive(Serialize)]
pub struct ProductView {
    pub product: Product,
    pub stage: Stage,
    pub analysis: Option<AnalysisResult>,
}
