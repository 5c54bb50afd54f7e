use axum::{
    Router,
    extract::{
        Json, Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::AppState;
use crate::api::models::{FetchProductRequest, PageQuery, ProductView};
use crate::api::response;
use crate::error::{AppError, Result};

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/products", post(fetch_product_handler).get(list_products_handler))
        .route("/api/products/:locale/:asin", get(get_product_handler))
        .route(
            "/api/products/:locale/:asin/competitors",
            post(fetch_competitors_handler).get(get_competitors_handler),
        )
        .route("/api/products/:locale/:asin/analysis", post(analyze_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

/// Renders a handler outcome. Every error is logged once here.
fn respond<T: Serialize>(action: &str, started: Instant, result: Result<response::Reply<T>>) -> Response {
    let elapsed = started.elapsed();
    match result {
        Ok(reply) => {
            info!(action, ?elapsed, "Request succeeded");
            reply.into_response()
        }
        Err(err) => {
            warn!(action, ?elapsed, error = %err, "Request failed");
            err.into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    response::success("ok")
}

async fn fetch_product_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FetchProductRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let result = async {
        let Json(req) = payload.map_err(|e| AppError::InvalidInput(e.body_text()))?;
        let key = state.pipeline.key(&req.asin, &req.locale)?;
        let geo = req.geo_location.as_deref().map(str::trim).filter(|g| !g.is_empty());
        let product = state.pipeline.fetch_product(&key, geo).await?;
        Ok::<_, AppError>(response::created(product))
    }
    .await;
    respond("fetch_product", started, result)
}

async fn list_products_handler(
    State(state): State<AppState>,
    query: std::result::Result<Query<PageQuery>, QueryRejection>,
) -> Response {
    let started = Instant::now();
    let result = query
        .map_err(|e| AppError::InvalidInput(e.body_text()))
        .and_then(|Query(query)| state.pipeline.products(query.page, query.per_page))
        .map(response::success);
    respond("list_products", started, result)
}

async fn get_product_handler(
    State(state): State<AppState>,
    Path((locale, asin)): Path<(String, String)>,
) -> Response {
    let started = Instant::now();
    let result = (|| {
        let key = state.pipeline.key(&asin, &locale)?;
        let product = state
            .pipeline
            .product(&key)?
            .ok_or_else(|| AppError::NotFound(format!("Product {} is not stored", key)))?;
        Ok::<_, AppError>(response::success(ProductView {
            product,
            stage: state.pipeline.stage(&key)?,
            analysis: state.pipeline.last_analysis(&key)?,
        }))
    })();
    respond("get_product", started, result)
}

async fn fetch_competitors_handler(
    State(state): State<AppState>,
    Path((locale, asin)): Path<(String, String)>,
) -> Response {
    let started = Instant::now();
    let result = async {
        let key = state.pipeline.key(&asin, &locale)?;
        let set = state.pipeline.fetch_competitors(&key).await?;
        Ok::<_, AppError>(response::created(set))
    }
    .await;
    respond("fetch_competitors", started, result)
}

async fn get_competitors_handler(
    State(state): State<AppState>,
    Path((locale, asin)): Path<(String, String)>,
) -> Response {
    let started = Instant::now();
    let result = (|| {
        let key = state.pipeline.key(&asin, &locale)?;
        let set = state
            .pipeline
            .competitors(&key)?
            .ok_or_else(|| AppError::NotFound(format!("No competitors stored for {}", key)))?;
        Ok::<_, AppError>(response::success(set))
    })();
    respond("get_competitors", started, result)
}

async fn analyze_handler(
    State(state): State<AppState>,
    Path((locale, asin)): Path<(String, String)>,
) -> Response {
    let started = Instant::now();
    let result = async {
        let key = state.pipeline.key(&asin, &locale)?;
        let analysis = state.pipeline.analyze(&key).await?;
        Ok::<_, AppError>(response::success(analysis))
    }
    .await;
    respond("analyze", started, result)
}
