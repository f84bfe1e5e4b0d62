use std::sync::Arc;

use mailparse::MailHeaderMap;
use serde::Serialize;

use crate::codec::MessageCodec;
use crate::error::QueueError;
use crate::mail::{MailMessage, MessageError};
use crate::metrics::QueueMetrics;
use crate::queue::{QueueItem, QueueStore};

use super::errors::ErrorMessages;

/// Pending items are scanned in pages of this size
const PAGE_SIZE: usize = 100;

/// Read-only health snapshot of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub total_items: u64,
    pub items_with_attempts: u64,
    /// Unsent items that were decoded and read
    pub pending_checked: u64,
    pub decode_failures: u64,
    pub other_failures: u64,
    #[serde(rename = "distinctErrorMessages")]
    pub errors: ErrorMessages,
}

/// Diagnostic pass over every unsent item. Never writes or sends.
#[derive(Clone)]
pub struct StatsReporter {
    store: Arc<dyn QueueStore>,
    codec: MessageCodec,
    table: String,
}

impl StatsReporter {
    pub fn new(store: Arc<dyn QueueStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            codec: MessageCodec::new(),
            table: table.into(),
        }
    }

    #[tracing::instrument(name = "mailqueue.stats", skip(self), fields(backend = self.store.backend_name()))]
    pub async fn report(&self) -> Result<StatsReport, QueueError> {
        if !self.store.schema_present().await? {
            return Err(QueueError::missing_table(&self.table));
        }

        let mut report = StatsReport {
            total_items: self.store.count().await?,
            items_with_attempts: self.store.count_with_attempts().await?,
            ..Default::default()
        };

        let mut offset = 0u64;
        loop {
            let page = self.store.pending_page(offset, PAGE_SIZE).await?;
            let fetched = page.len();

            for item in &page {
                self.check_item(item, &mut report);
            }

            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched as u64;
        }

        QueueMetrics::set_pending(report.pending_checked);
        tracing::info!(
            total = report.total_items,
            with_attempts = report.items_with_attempts,
            pending = report.pending_checked,
            decode_failures = report.decode_failures,
            other_failures = report.other_failures,
            "Queue stats collected"
        );

        Ok(report)
    }

    fn check_item(&self, item: &QueueItem, report: &mut StatsReport) {
        report.pending_checked += 1;

        let message = match self.codec.decode(&item.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(item_id = %item.id, error = %e, "Unreadable queued mail");
                report.decode_failures += 1;
                report.errors.record(e.to_string());
                return;
            }
        };

        if let Err(e) = read_structure(&message) {
            tracing::debug!(item_id = %item.id, error = %e, "Malformed queued mail");
            report.other_failures += 1;
            report.errors.record(e.to_string());
        }
    }
}

/// Render the message and read the envelope back from the result.
fn read_structure(message: &MailMessage) -> Result<(), MessageError> {
    let rendered = message.render()?;
    check_rendered(rendered.as_bytes())
}

/// Parse raw RFC 5322 bytes and require exactly one readable `From`, `To`
/// and `Subject`, and a decodable body.
fn check_rendered(raw: &[u8]) -> Result<(), MessageError> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| MessageError::Malformed(e.to_string()))?;
    let headers = parsed.get_headers();

    for name in ["From", "To", "Subject"] {
        match headers.get_all_values(name).len() {
            1 => {}
            0 => return Err(MessageError::Malformed(format!("missing {} header", name))),
            n => return Err(MessageError::Malformed(format!("{} {} headers", n, name))),
        }
    }

    let from = headers.get_first_value("From").unwrap_or_default();
    match mailparse::addrparse(&from) {
        Ok(list) if list.len() == 1 => {}
        _ => return Err(MessageError::Malformed(format!("unreadable From \"{}\"", from))),
    }

    let to = headers.get_first_value("To").unwrap_or_default();
    match mailparse::addrparse(&to) {
        Ok(list) if !list.is_empty() => {}
        _ => return Err(MessageError::Malformed(format!("unreadable To \"{}\"", to))),
    }

    parsed.get_body().map_err(|e| MessageError::Malformed(e.to_string()))?;
    Ok(())
}
