use std::sync::Arc;

use crate::metrics::QueueMetrics;
use crate::queue::{QueueStore, StoreError};

/// Removes resolved items (sent, or out of attempts).
#[derive(Clone)]
pub struct Purger {
    store: Arc<dyn QueueStore>,
}

impl Purger {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Delete every resolved item in a single store operation.
    ///
    /// Idempotent: a second call with nothing newly resolved removes 0.
    pub async fn purge_resolved(&self, max_attempts: u32) -> Result<u64, StoreError> {
        let purged = self.store.purge_resolved(max_attempts).await?;

        QueueMetrics::record_purged(purged);
        if purged > 0 {
            tracing::info!(purged = purged, max_attempts = max_attempts, "Purged resolved mails");
        }

        Ok(purged)
    }
}
