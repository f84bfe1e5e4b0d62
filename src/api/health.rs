//! Health check and statistics endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::dispatch::StatsReport;
use crate::error::QueueError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: StoreHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: String,
    pub table: String,
    pub reachable: bool,
    pub schema_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub connected: bool,
    pub pool_size: u32,
    pub idle_connections: u32,
}

/// GET /health - 200 when the store is reachable and its table exists, 503 otherwise
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.queue.store();

    let (reachable, schema_present, error) = match store.schema_present().await {
        Ok(present) => (true, present, None),
        Err(e) => (false, false, Some(e.to_string())),
    };

    let postgres = match &state.postgres_pool {
        Some(pool) => {
            let inner_pool = pool.pool();
            Some(PostgresHealthResponse {
                connected: pool.ping().await.is_ok(),
                pool_size: inner_pool.size(),
                idle_connections: inner_pool.num_idle() as u32,
            })
        }
        None => None,
    };

    let healthy = reachable && schema_present;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store: StoreHealthResponse {
            backend: store.backend_name().to_string(),
            table: state.queue.config().table.clone(),
            reachable,
            schema_present,
            error,
        },
        postgres,
    };

    (status, Json(body))
}

/// GET /stats - read-only diagnostic pass over pending mail
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsReport>, QueueError> {
    let report = state.queue.stat().await?;
    Ok(Json(report))
}
