//! Per-product lifecycle: fetch the product, fetch its competitors, analyze.
//!
//! ```text
//! Idle -> Fetching -> Fetched -> CompetitorsFetching -> CompetitorsLoaded -> Analyzing -> Analyzed
//! ```
//!
//! Every transition is caller-triggered and never retried. While a key sits in
//! a transitional stage any other action on it is refused. A failed (or
//! cancelled) transition puts the key back in the stage it started from.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::llm::Summarizer;
use crate::marketplace::SupportedLocales;
use crate::models::{AnalysisResult, CompetitorSet, Product, ProductKey};
use crate::scraper::ProductScraper;
use crate::store::{CompetitorSets, Products, RecordKind, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Fetching,
    Fetched,
    CompetitorsFetching,
    CompetitorsLoaded,
    Analyzing,
    Analyzed,
}

impl Stage {
    pub fn is_transitional(self) -> bool {
        matches!(self, Stage::Fetching | Stage::CompetitorsFetching | Stage::Analyzing)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductPage {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
    pub products: Vec<Product>,
}

pub struct Pipeline {
    store: Arc<RecordStore>,
    scraper: Arc<dyn ProductScraper>,
    summarizer: Arc<dyn Summarizer>,
    locales: SupportedLocales,
    stages: Mutex<HashMap<ProductKey, Stage>>,
    analyses: Mutex<HashMap<ProductKey, AnalysisResult>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<RecordStore>,
        scraper: Arc<dyn ProductScraper>,
        summarizer: Arc<dyn Summarizer>,
        locales: SupportedLocales,
    ) -> Self {
        Pipeline {
            store,
            scraper,
            summarizer,
            locales,
            stages: Mutex::new(HashMap::new()),
            analyses: Mutex::new(HashMap::new()),
        }
    }

    /// Validates a caller-supplied identifier and marketplace code.
    pub fn key(&self, asin: &str, locale: &str) -> Result<ProductKey> {
        ProductKey::new(asin, self.locales.resolve(locale)?)
    }

    pub fn stage(&self, key: &ProductKey) -> Result<Stage> {
        let mut stages = self.stages()?;
        self.current_stage(&mut stages, key)
    }

    /// Scrapes the product page and upserts it, replacing any earlier snapshot.
    pub async fn fetch_product(&self, key: &ProductKey, geo_location: Option<&str>) -> Result<Product> {
        let guard = self.begin(key, Stage::Fetching, |_| true)?;
        info!(product = %key, "Fetching product");

        let product = self.scraper.fetch_product(key, geo_location).await?;
        self.persist::<Products>(key, product.clone()).await?;
        self.analyses()?.remove(key);

        guard.commit(Stage::Fetched);
        Ok(product)
    }

    /// Searches competitors for a stored product and replaces its competitor batch.
    pub async fn fetch_competitors(&self, key: &ProductKey) -> Result<CompetitorSet> {
        let guard = self.begin(key, Stage::CompetitorsFetching, |stage| stage != Stage::Idle)?;
        let product = self.stored_product(key)?;
        info!(product = %key, "Fetching competitors");

        let search = self.scraper.search_competitors(&product).await?;
        let set = CompetitorSet {
            parent: key.clone(),
            query: search.query,
            category: search.category,
            fetched_at: Utc::now(),
            competitors: search.competitors,
        };
        self.persist::<CompetitorSets>(key, set.clone()).await?;
        self.analyses()?.remove(key);

        guard.commit(Stage::CompetitorsLoaded);
        Ok(set)
    }

    /// Summarizes the product against its stored competitors. The result is
    /// kept in memory only.
    pub async fn analyze(&self, key: &ProductKey) -> Result<AnalysisResult> {
        let guard = self.begin(key, Stage::Analyzing, |stage| {
            matches!(stage, Stage::CompetitorsLoaded | Stage::Analyzed)
        })?;
        let product = self.stored_product(key)?;
        let competitors = self
            .store
            .get::<CompetitorSets>(key)?
            .map(|set| set.competitors)
            .unwrap_or_default();
        info!(product = %key, competitors = competitors.len(), "Analyzing product");

        let summary = self.summarizer.summarize(&product, &competitors).await?;
        let result = AnalysisResult {
            asin: key.asin.clone(),
            locale: key.locale.clone(),
            summary,
            generated_at: Utc::now(),
        };
        self.analyses()?.insert(key.clone(), result.clone());

        guard.commit(Stage::Analyzed);
        Ok(result)
    }

    pub fn product(&self, key: &ProductKey) -> Result<Option<Product>> {
        self.store.get::<Products>(key)
    }

    pub fn competitors(&self, key: &ProductKey) -> Result<Option<CompetitorSet>> {
        self.store.get::<CompetitorSets>(key)
    }

    pub fn last_analysis(&self, key: &ProductKey) -> Result<Option<AnalysisResult>> {
        Ok(self.analyses()?.get(key).cloned())
    }

    /// One page of stored products, newest first. `page` is 1-based.
    pub fn products(&self, page: usize, per_page: usize) -> Result<ProductPage> {
        let per_page = per_page.max(1);
        let mut products = self
            .store
            .list::<Products>()?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        products.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));

        let total = products.len();
        let total_pages = total.div_ceil(per_page).max(1);
        let page = page.clamp(1, total_pages);
        let products = products
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();

        Ok(ProductPage {
            page,
            per_page,
            total,
            total_pages,
            products,
        })
    }

    /// Upserts on the blocking pool; the store writes and fsyncs synchronously.
    async fn persist<K>(&self, key: &ProductKey, record: K::Record) -> Result<()>
    where
        K: RecordKind + 'static,
        K::Record: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let key = key.clone();
        tokio::task::spawn_blocking(move || store.upsert::<K>(&key, &record))
            .await
            .map_err(|e| AppError::Storage(format!("store write task failed: {}", e)))?
    }

    fn stored_product(&self, key: &ProductKey) -> Result<Product> {
        self.store
            .get::<Products>(key)?
            .ok_or_else(|| AppError::InvalidState(format!("Product {} has not been fetched yet", key)))
    }

    fn begin(
        &self,
        key: &ProductKey,
        next: Stage,
        allowed: impl Fn(Stage) -> bool,
    ) -> Result<Transition<'_>> {
        let mut stages = self.stages()?;
        let from = self.current_stage(&mut stages, key)?;
        if from.is_transitional() {
            return Err(AppError::InvalidState(format!(
                "Product {} is busy ({:?})",
                key, from
            )));
        }
        if !allowed(from) {
            let hint = match next {
                Stage::CompetitorsFetching => "fetch the product first",
                _ => "fetch competitors first",
            };
            return Err(AppError::InvalidState(format!(
                "Cannot start {:?} for {} from {:?}; {}",
                next, key, from, hint
            )));
        }
        stages.insert(key.clone(), next);
        Ok(Transition {
            stages: &self.stages,
            key: key.clone(),
            from,
            committed: false,
        })
    }

    fn current_stage(&self, stages: &mut HashMap<ProductKey, Stage>, key: &ProductKey) -> Result<Stage> {
        if let Some(stage) = stages.get(key) {
            return Ok(*stage);
        }
        // Idle keys are not tracked; they are re-derived on demand.
        let Some(product) = self.store.get::<Products>(key)? else {
            return Ok(Stage::Idle);
        };
        // A batch from before the latest product fetch does not count.
        let loaded = self
            .store
            .get::<CompetitorSets>(key)?
            .is_some_and(|set| set.fetched_at >= product.fetched_at);
        let stage = if loaded { Stage::CompetitorsLoaded } else { Stage::Fetched };
        stages.insert(key.clone(), stage);
        Ok(stage)
    }

    fn stages(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ProductKey, Stage>>> {
        self.stages
            .lock()
            .map_err(|_| AppError::Storage("stage table lock poisoned".to_string()))
    }

    fn analyses(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ProductKey, AnalysisResult>>> {
        self.analyses
            .lock()
            .map_err(|_| AppError::Storage("analysis table lock poisoned".to_string()))
    }
}

/// Holds a key in a transitional stage. Dropping it without `commit` puts
/// the key back where it started.
struct Transition<'a> {
    stages: &'a Mutex<HashMap<ProductKey, Stage>>,
    key: ProductKey,
    from: Stage,
    committed: bool,
}

impl Transition<'_> {
    fn commit(mut self, to: Stage) {
        self.set(to);
        self.committed = true;
        info!(product = %self.key, stage = ?to, "Stage reached");
    }

    fn set(&self, stage: Stage) {
        let mut stages = match self.stages.lock() {
            Ok(stages) => stages,
            Err(poisoned) => poisoned.into_inner(),
        };
        if stage == Stage::Idle {
            stages.remove(&self.key);
        } else {
            stages.insert(self.key.clone(), stage);
        }
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.committed {
            warn!(product = %self.key, stage = ?self.from, "Transition failed; stage restored");
            self.set(self.from);
        }
    }
}
