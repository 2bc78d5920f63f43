//! Minimal liveness endpoint, distinct from the (out-of-scope) read-only
//! capture query façade. Exists only so an orchestrator can tell the
//! process is alive.

use anyhow::Result;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;

async fn health_check_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Runs the health check HTTP server.
///
/// Binds to the address specified in the config and serves the `/health` endpoint.
pub async fn run_health_server(config: Config) -> Result<()> {
    let app = Router::new().route("/health", get(health_check_handler));

    let addr_str = format!("{}:{}", config.health_check_bind_address, config.health_check_port);

    let listener = TcpListener::bind(&addr_str).await.map_err(|e| {
        error!(addr = %addr_str, error = %e, "failed to bind health check server");
        anyhow::anyhow!("failed to bind health check server: {}", e)
    })?;

    info!(addr = %addr_str, "health check server listening");

    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "health check server error");
        anyhow::anyhow!("health check server failed: {}", e)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_returns_ok() {
        let response = health_check_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
