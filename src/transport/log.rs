use async_trait::async_trait;

use crate::mail::MailMessage;

use super::{Transport, TransportError};

/// Dry-run transport: logs the envelope and reports success.
#[derive(Debug, Default)]
pub struct LogTransport;

impl LogTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &MailMessage) -> Result<bool, TransportError> {
        message.validate()?;

        let recipients: Vec<&str> = message.recipients().map(|m| m.address.as_str()).collect();
        tracing::info!(
            from = %message.from.address,
            recipients = ?recipients,
            subject = %message.subject,
            "Mail delivered to log transport"
        );

        Ok(true)
    }
}
