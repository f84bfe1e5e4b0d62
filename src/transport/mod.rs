//! Mail transports.
//!
//! A transport is anything that can take a composed [`MailMessage`] and try to
//! deliver it. The dispatcher distinguishes three outcomes:
//!
//! - `Ok(true)`: accepted for delivery
//! - `Ok(false)`: declined without an error (e.g. recipient refused)
//! - `Err(TransportError)`: the attempt itself failed
//!
//! Use `create_transport()` to build the configured transport.

mod file;
mod log;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::TransportConfig;
use crate::mail::{MailMessage, MessageError};

pub use file::FileTransport;
pub use log::LogTransport;

/// Errors raised by a delivery attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Message cannot be sent: {0}")]
    Message(#[from] MessageError),

    #[error("Unknown transport kind \"{0}\"")]
    UnknownKind(String),

    #[error("{0}")]
    Other(String),
}

/// Capability to deliver one message.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single transport is shared by
/// every round.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport identifier used in logs.
    fn name(&self) -> &'static str;

    /// Attempt to deliver `message`.
    async fn send(&self, message: &MailMessage) -> Result<bool, TransportError>;
}

/// Create a transport based on configuration.
///
/// - `"file"`: Writes each message as an `.eml` file under `file_path`
/// - `"log"` (default): Logs the envelope and reports success
///
/// Any other kind is an error; mail is never silently routed to the log.
pub fn create_transport(settings: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
    match settings.kind.as_str() {
        "file" => {
            tracing::info!(transport = "file", path = %settings.file_path, "Creating file transport");
            Ok(Arc::new(FileTransport::new(&settings.file_path)))
        }
        "log" => {
            tracing::info!(transport = "log", "Creating log transport");
            Ok(Arc::new(LogTransport::new()))
        }
        other => Err(TransportError::UnknownKind(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_transport_defaults_to_log() {
        let transport = create_transport(&TransportConfig::default()).unwrap();
        assert_eq!(transport.name(), "log");
    }

    #[test]
    fn test_unknown_transport_kind_rejected() {
        let settings = TransportConfig {
            kind: "smtp".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_transport(&settings),
            Err(TransportError::UnknownKind(kind)) if kind == "smtp"
        ));
    }

    #[test]
    fn test_create_file_transport() {
        let settings = TransportConfig {
            kind: "file".to_string(),
            file_path: "/tmp/mail".to_string(),
        };
        assert_eq!(create_transport(&settings).unwrap().name(), "file");
    }

    #[test]
    fn test_timeout_message() {
        let err = TransportError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Send timed out after 30s");
    }
}
