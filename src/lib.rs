// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::postgres;

// Domain layer
pub mod codec;
pub mod dispatch;
pub mod mail;
pub mod mailqueue;
pub mod queue;
pub mod transport;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;

pub use mailqueue::MailQueue;
