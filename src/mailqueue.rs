//! Producer and operator entry point.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::codec::MessageCodec;
use crate::config::{MailQueueConfig, Settings};
use crate::dispatch::{Dispatcher, DispatcherConfig, Purger, RoundReport, StatsReport, StatsReporter};
use crate::error::{QueueError, Result};
use crate::mail::MailMessage;
use crate::metrics::QueueMetrics;
use crate::postgres::PostgresPool;
use crate::queue::{create_queue_store, NewQueueItem, QueueItem, QueueStore, StoreError};
use crate::transport::{create_transport, Transport};

/// Width of the diagnostic subject column
const SUBJECT_MAX_CHARS: usize = 255;

/// A mail queue bound to one store and one transport.
pub struct MailQueue {
    store: Arc<dyn QueueStore>,
    codec: MessageCodec,
    dispatcher: Dispatcher,
    purger: Purger,
    stats: StatsReporter,
    config: MailQueueConfig,
}

impl MailQueue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        settings: &Settings,
    ) -> Self {
        let config = settings.mailqueue.clone();
        Self {
            dispatcher: Dispatcher::new(
                store.clone(),
                transport,
                DispatcherConfig::from_settings(settings),
            ),
            purger: Purger::new(store.clone()),
            stats: StatsReporter::new(store.clone(), config.table.clone()),
            codec: MessageCodec::new(),
            store,
            config,
        }
    }

    /// Build the configured store and transport.
    ///
    /// An unknown backend or transport kind, or queue settings that fail
    /// validation, are configuration errors. The returned pool, if any,
    /// should be closed on shutdown.
    pub async fn connect(settings: &Settings) -> Result<(Self, Option<PostgresPool>)> {
        let pool = if settings.mailqueue.backend == "postgres" {
            let pool = PostgresPool::new(&settings.database)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Some(pool)
        } else {
            None
        };

        let store = create_queue_store(&settings.mailqueue, pool.as_ref())
            .map_err(|e| QueueError::Config(e.to_string()))?;
        let transport =
            create_transport(&settings.transport).map_err(|e| QueueError::Config(e.to_string()))?;

        Ok((Self::new(store, transport, settings), pool))
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn config(&self) -> &MailQueueConfig {
        &self.config
    }

    /// Persist a message for later delivery.
    ///
    /// `time_to_send` defaults to now.
    pub async fn enqueue(
        &self,
        message: &MailMessage,
        time_to_send: Option<DateTime<Utc>>,
    ) -> Result<QueueItem> {
        let payload = self.codec.encode(message)?;

        let subject: String = message.subject.chars().take(SUBJECT_MAX_CHARS).collect();
        let mut item = NewQueueItem::new(subject, payload);
        if let Some(at) = time_to_send {
            item = item.send_at(at);
        }

        let item = self.store.insert(item).await?;
        QueueMetrics::record_enqueued();
        tracing::info!(
            item_id = %item.id,
            subject = %item.subject,
            time_to_send = %item.time_to_send,
            "Mail enqueued"
        );

        Ok(item)
    }

    /// Run one round with the configured batch size and attempt limit.
    pub async fn process(&self) -> Result<RoundReport> {
        self.process_at(Utc::now()).await
    }

    pub async fn process_at(&self, now: DateTime<Utc>) -> Result<RoundReport> {
        self.dispatcher
            .process(self.config.mails_per_round, self.config.max_attempts, now)
            .await
    }

    pub async fn stat(&self) -> Result<StatsReport> {
        self.stats.report().await
    }

    /// Delete resolved items now, regardless of `auto_purge`.
    pub async fn purge(&self) -> Result<u64> {
        if !self.store.schema_present().await? {
            return Err(QueueError::missing_table(&self.config.table));
        }
        Ok(self.purger.purge_resolved(self.config.max_attempts).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueueStore;
    use crate::transport::LogTransport;
    use chrono::Duration;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.mailqueue.backend = "memory".to_string();
        settings
    }

    fn message() -> MailMessage {
        MailMessage::builder("noreply@example.com")
            .to("alice@example.com")
            .subject("Welcome")
            .text_body("Hello")
            .build()
    }

    #[tokio::test]
    async fn test_enqueue_creates_fresh_item() {
        let queue = MailQueue::new(
            Arc::new(MemoryQueueStore::new()),
            Arc::new(LogTransport::new()),
            &settings(),
        );

        let item = queue.enqueue(&message(), None).await.unwrap();
        assert_eq!(item.subject, "Welcome");
        assert_eq!(item.attempts, 0);
        assert!(item.sent_time.is_none());
        assert!(item.time_to_send <= Utc::now());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_message() {
        let queue = MailQueue::new(
            Arc::new(MemoryQueueStore::new()),
            Arc::new(LogTransport::new()),
            &settings(),
        );
        let mut invalid = message();
        invalid.to.clear();

        assert!(matches!(
            queue.enqueue(&invalid, None).await,
            Err(QueueError::Encode(_))
        ));
        assert_eq!(queue.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scheduled_mail_waits() {
        let queue = MailQueue::new(
            Arc::new(MemoryQueueStore::new()),
            Arc::new(LogTransport::new()),
            &settings(),
        );
        let later = Utc::now() + Duration::hours(1);
        queue.enqueue(&message(), Some(later)).await.unwrap();

        let report = queue.process().await.unwrap();
        assert_eq!(report.items_processed, 0);

        let report = queue.process_at(later).await.unwrap();
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn test_purge_requires_schema() {
        let queue = MailQueue::new(
            Arc::new(MemoryQueueStore::without_schema()),
            Arc::new(LogTransport::new()),
            &settings(),
        );
        assert!(queue.purge().await.unwrap_err().is_config());
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_transport() {
        let mut settings = settings();
        settings.transport.kind = "smtp".to_string();

        let err = MailQueue::connect(&settings).await.err().unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("Unknown transport kind \"smtp\""));
    }

    #[tokio::test]
    async fn test_connect_rejects_short_claim_lease() {
        let mut settings = settings();
        settings.mailqueue.claim_lease_seconds = 5;
        settings.mailqueue.send_timeout_seconds = 30;

        let err = MailQueue::connect(&settings).await.err().unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let (queue, pool) = MailQueue::connect(&settings()).await.unwrap();
        assert!(pool.is_none());
        assert_eq!(queue.store().backend_name(), "memory");
    }
}
