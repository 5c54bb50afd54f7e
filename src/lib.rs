pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod marketplace;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod store;

use std::sync::Arc;

use tracing::warn;

use config::Config;
use error::Result;
use llm::AnalysisClient;
use pipeline::Pipeline;
use scraper::OxylabsClient;
use store::RecordStore;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Opens the record store and builds both provider clients from `config`.
    pub fn build(config: Config) -> Result<Self> {
        let store = Arc::new(RecordStore::open(&config.store_path)?);
        let scraper = Arc::new(OxylabsClient::new(config.scraper.clone())?);
        let analyst = Arc::new(AnalysisClient::new(config.llm.clone())?);
        if !analyst.is_enabled() {
            warn!("OPENAI_API_KEY not set; competitor analysis is disabled");
        }
        let pipeline = Pipeline::new(store, scraper, analyst, config.scraper.locales.clone());

        Ok(AppState {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        })
    }
}
