//! Campaign bot - referral coupon chatbot core
//!
//! Routes chat messages to state-indexed agents and runs the referral
//! campaign protocol behind a small HTTP surface.

mod agent;
mod api;
mod classifier;
mod config;
mod db;
mod message;
mod runtime;

use agent::campaign::CampaignManager;
use api::{create_router, AppState};
use config::Config;
use db::Database;
use runtime::{DatabaseStorage, Dispatcher, HttpImageService, HttpPublisher, LogPublisher, Publisher, SessionStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_bot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env()?;

    // Ensure data directories exist
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.image_dir)?;

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;
    let storage = Arc::new(DatabaseStorage::new(db.clone()));

    let images = Arc::new(HttpImageService::new(
        config.image_dir.clone(),
        config.public_url.clone(),
        config.campaign.fetch_timeout,
    )?);

    let publisher: Arc<dyn Publisher> = match &config.outbound_url {
        Some(url) => {
            tracing::info!(endpoint = %url, "Delivering outbound messages over HTTP");
            Arc::new(HttpPublisher::new(url.clone(), config.publish_timeout)?)
        }
        None => {
            tracing::warn!("CAMPAIGN_OUTBOUND_URL not set, outbound messages are only logged");
            Arc::new(LogPublisher)
        }
    };

    let campaign = Arc::new(
        CampaignManager::new(storage.clone(), storage, images, config.campaign.clone()).await?,
    );

    let dispatcher = Dispatcher::builder()
        .agent(campaign.clone())?
        .build(Arc::new(SessionStore::new()), publisher);

    let state = AppState::new(
        Arc::new(dispatcher),
        campaign,
        db,
        config.image_dir.clone(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Campaign bot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
