//! API layer - ops endpoint handlers.

mod health;
mod metrics;
mod routes;

pub use health::{health, stats, HealthResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
