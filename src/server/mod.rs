pub mod api;
pub mod dtos;
pub mod error;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Instant;

use axum::{Extension, Router, http::Method, http::header, routing::get};
use once_cell::sync::Lazy;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use crate::config::AppConfig;
use crate::database::RedisDatabase;
use api::{
    catalog_controller::CatalogController, episode_controller::EpisodeController,
    health_controller, proxy_controller::ProxyController,
};
use services::AppServices;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub struct ApplicationServer;

impl ApplicationServer {
    pub async fn serve(config: Arc<AppConfig>, redis_db: RedisDatabase) -> anyhow::Result<()> {
        // pin the uptime clock before the first request can ask about it
        Lazy::force(&START_TIME);

        let services = AppServices::new(redis_db, config.clone());
        let app = build_router(services, &config);

        let addr = format!("0.0.0.0:{}", config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("server listening on http://{}", addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// full route table plus the cors envelope. split out so tests can drive the
/// router without binding a socket
pub fn build_router(services: AppServices, config: &AppConfig) -> Router {
    Router::new()
        .route("/health", get(health_controller::health_endpoint))
        .merge(ProxyController::app())
        .merge(EpisodeController::app())
        .merge(CatalogController::app())
        .layer(Extension(services))
        .layer(cors_layer(config))
}

// every response carries the permissive envelope, players run in browsers and
// the proxy is useless to them without it
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
            header::CONTENT_TYPE,
        ]);

    if config.cors_origin.trim() == "*" {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<header::HeaderValue> = config
            .cors_origin
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
