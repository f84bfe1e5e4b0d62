mod settings;

pub use settings::{
    DatabaseConfig, MailQueueConfig, OtelConfig, ServerConfig, Settings, TransportConfig,
};
