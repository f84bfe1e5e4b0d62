//! Ops HTTP server served alongside the round scheduler.

mod app;
mod state;

pub use app::create_app;
pub use state::AppState;
