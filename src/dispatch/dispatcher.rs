use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::codec::MessageCodec;
use crate::config::Settings;
use crate::error::QueueError;
use crate::mail::MailMessage;
use crate::metrics::{DispatchMetrics, FailureKind};
use crate::queue::{QueueItem, QueueStore};
use crate::transport::{Transport, TransportError};

use super::errors::ErrorMessages;
use super::purger::Purger;

/// Runtime options of the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Table name reported when the schema check fails
    pub table: String,
    /// Upper bound for a single transport send
    pub send_timeout: Duration,
    /// Purge resolved items after every round
    pub auto_purge: bool,
    /// Replaces every `To` address before sending
    pub override_recipient: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            table: "mail_queue".to_string(),
            send_timeout: Duration::from_secs(30),
            auto_purge: true,
            override_recipient: None,
        }
    }
}

impl DispatcherConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            table: settings.mailqueue.table.clone(),
            send_timeout: Duration::from_secs(settings.mailqueue.send_timeout_seconds),
            auto_purge: settings.mailqueue.auto_purge,
            override_recipient: settings.effective_override_recipient(),
        }
    }
}

/// Outcome of one processing round.
///
/// `items_processed == sent + not_sent + decode_failures + other_failures`.
/// Skipped claims and store failures sit outside that sum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    pub items_processed: u64,
    pub sent: u64,
    pub not_sent: u64,
    pub decode_failures: u64,
    pub other_failures: u64,
    pub store_failures: u64,
    /// Items another round claimed first
    pub skipped: u64,
    pub purged: u64,
    #[serde(rename = "distinctErrorMessages")]
    pub errors: ErrorMessages,
}

impl RoundReport {
    /// Decode plus transport failures.
    pub fn failures(&self) -> u64 {
        self.decode_failures + self.other_failures
    }

    pub fn is_balanced(&self) -> bool {
        self.items_processed
            == self.sent + self.not_sent + self.decode_failures + self.other_failures
    }
}

/// Runs processing rounds over a queue store.
pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    codec: MessageCodec,
    transport: Arc<dyn Transport>,
    purger: Purger,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            purger: Purger::new(store.clone()),
            store,
            codec: MessageCodec::new(),
            transport,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one round: select a batch, then claim, decode, send and record
    /// each item in selection order.
    ///
    /// # Errors
    ///
    /// Only a missing table (`QueueError::Config`) or a failed selection
    /// escape. Every per-item failure is counted in the report.
    #[tracing::instrument(
        name = "mailqueue.round",
        skip(self),
        fields(backend = self.store.backend_name(), transport = self.transport.name())
    )]
    pub async fn process(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<RoundReport, QueueError> {
        let started = Instant::now();

        if !self.store.schema_present().await? {
            return Err(QueueError::missing_table(&self.config.table));
        }

        let batch = self.store.select_batch(limit, max_attempts, now).await?;
        tracing::debug!(batch_size = batch.len(), "Batch selected");

        let mut report = RoundReport::default();
        for item in batch {
            self.process_item(item, now, &mut report).await;
        }

        if self.config.auto_purge {
            match self.purger.purge_resolved(max_attempts).await {
                Ok(purged) => report.purged = purged,
                Err(e) => {
                    tracing::warn!(error = %e, "Auto-purge failed");
                    DispatchMetrics::record_failure(FailureKind::Store);
                    report.store_failures += 1;
                    report.errors.record(e.to_string());
                }
            }
        }

        DispatchMetrics::record_round(started.elapsed());
        tracing::info!(
            processed = report.items_processed,
            sent = report.sent,
            not_sent = report.not_sent,
            decode_failures = report.decode_failures,
            other_failures = report.other_failures,
            store_failures = report.store_failures,
            skipped = report.skipped,
            purged = report.purged,
            "Round complete"
        );

        Ok(report)
    }

    async fn process_item(&self, item: QueueItem, now: DateTime<Utc>, report: &mut RoundReport) {
        let attempts = item.attempts + 1;

        match self.store.claim(item.id, item.attempts, now).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(item_id = %item.id, "Item claimed by another round, skipping");
                DispatchMetrics::record_skipped();
                report.skipped += 1;
                return;
            }
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "Failed to claim item");
                DispatchMetrics::record_failure(FailureKind::Store);
                report.store_failures += 1;
                report.errors.record(e.to_string());
                return;
            }
        }

        DispatchMetrics::record_processed();
        report.items_processed += 1;

        let sent_time = match self.codec.decode(&item.payload) {
            Ok(mut message) => {
                if let Some(recipient) = &self.config.override_recipient {
                    message.set_to(recipient.clone());
                }
                self.send(&item, &message, now, report).await
            }
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "Failed to decode queued mail");
                DispatchMetrics::record_failure(FailureKind::Decode);
                report.decode_failures += 1;
                report.errors.record(e.to_string());
                None
            }
        };

        if let Err(e) = self
            .store
            .record_outcome(item.id, attempts, now, sent_time)
            .await
        {
            tracing::warn!(item_id = %item.id, error = %e, "Failed to record attempt outcome");
            DispatchMetrics::record_failure(FailureKind::Store);
            report.store_failures += 1;
            report.errors.record(e.to_string());
        }
    }

    /// Send under the configured timeout. Returns the sent time on success.
    async fn send(
        &self,
        item: &QueueItem,
        message: &MailMessage,
        now: DateTime<Utc>,
        report: &mut RoundReport,
    ) -> Option<DateTime<Utc>> {
        let started = Instant::now();
        let result =
            match tokio::time::timeout(self.config.send_timeout, self.transport.send(message)).await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.config.send_timeout)),
            };

        match result {
            Ok(true) => {
                tracing::debug!(item_id = %item.id, "Mail sent");
                DispatchMetrics::record_sent(started.elapsed());
                report.sent += 1;
                Some(now)
            }
            Ok(false) => {
                tracing::warn!(item_id = %item.id, "Transport declined mail");
                DispatchMetrics::record_not_sent(started.elapsed());
                report.not_sent += 1;
                None
            }
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "Failed to send mail");
                DispatchMetrics::record_failure(FailureKind::Transport);
                report.other_failures += 1;
                report.errors.record(e.to_string());
                None
            }
        }
    }
}
