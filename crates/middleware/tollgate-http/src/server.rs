//! Standalone rate limited HTTP server

use crate::config::AppConfig;
use crate::extract::{self, KeyExtractor};
use crate::middleware::RateLimitMiddleware;
use crate::{HttpError, Result};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tollgate_limiter::{build_limiter, RateLimiter};
use tollgate_storage::StorageBuilder;
use tower_http::trace::TraceLayer;

/// Serves `/api/hello` behind the configured limiter
pub struct TollgateServer {
    config: AppConfig,
    router: Router,
}

impl TollgateServer {
    /// Connect storage and build the limiter and routes
    pub async fn new(config: AppConfig) -> Result<Self> {
        let storage = StorageBuilder::new(config.storage.clone()).build().await?;
        let limiter = build_limiter(config.limiter.clone(), storage)?;

        let metrics = if config.server.metrics {
            Some(
                PrometheusBuilder::new()
                    .install_recorder()
                    .map_err(|e| HttpError::Server(format!("metrics recorder: {e}")))?,
            )
        } else {
            None
        };

        let router = create_router(&config, limiter, metrics);
        Ok(Self { config, router })
    }

    /// Listen and serve until the process is stopped
    pub async fn start(self) -> Result<()> {
        let addr = self.config.server.bind;
        tracing::info!(
            %addr,
            algorithm = %self.config.limiter.algorithm,
            rate = self.config.limiter.rate,
            window_ms = self.config.limiter.window_ms,
            "Starting tollgate server"
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        tracing::info!("Server stopped");
        Ok(())
    }

    /// The assembled routes
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// `/health` and `/metrics` unlimited, `/api/*` rate limited
pub fn create_router(
    config: &AppConfig,
    limiter: Arc<dyn RateLimiter>,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let key_extractor: KeyExtractor = match &config.server.api_key_header {
        Some(header) => extract::api_key(header.clone()),
        None => extract::ip_address(),
    };

    let limited = RateLimitMiddleware::new(limiter, key_extractor)
        .with_cost(config.server.cost)
        .with_failure_mode(config.server.failure_mode)
        .apply(Router::new().route("/api/hello", get(hello)));

    let mut router = Router::new().route("/health", get(health_check));
    if let Some(handle) = metrics {
        router = router.route("/metrics", get(move || async move { handle.render() }));
    }

    router.merge(limited).layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tollgate",
    }))
}

async fn hello() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Hello, World!" }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
