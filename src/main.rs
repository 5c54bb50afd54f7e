use amazon_competitor_analysis::{AppState, api::routes::create_router, config::Config};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::load()?;
    let server_addr = config.server_addr;

    let app_state = AppState::build(config)?;
    info!(store = %app_state.config.store_path.display(), "Record store ready");

    let app = create_router(app_state);
    let listener = TcpListener::bind(server_addr).await?;

    info!("Listening on {}", server_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
