//! In-memory queue store using DashMap.
//!
//! Items live in memory and are lost on restart. Used for tests, local
//! development and as the reference for the conditional-write semantics the
//! PostgreSQL store implements in SQL.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::item::{NewQueueItem, QueueItem};
use super::store::{QueueStore, StoreError, DEFAULT_CLAIM_LEASE_SECONDS};

/// In-memory queue store.
///
/// Every mutation goes through `DashMap::get_mut`, which holds the shard
/// lock for the entry, so the check-and-set in `claim` and `record_outcome`
/// is atomic per item.
pub struct MemoryQueueStore {
    items: DashMap<Uuid, QueueItem>,
    schema_present: bool,
    claim_lease: Duration,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            schema_present: true,
            claim_lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECONDS as i64),
        }
    }

    /// A store that reports its table as missing.
    pub fn without_schema() -> Self {
        Self {
            schema_present: false,
            ..Self::new()
        }
    }

    /// How long an unfinished claim keeps an item out of selection.
    pub fn with_claim_lease(mut self, lease: std::time::Duration) -> Self {
        self.claim_lease = Duration::from_std(lease).unwrap_or(Duration::MAX);
        self
    }

    /// Overwrite the payload of an item. Test support for corrupted rows.
    pub fn replace_payload(&self, id: Uuid, payload: Vec<u8>) -> bool {
        match self.items.get_mut(&id) {
            Some(mut item) => {
                item.payload = payload;
                true
            }
            None => false,
        }
    }

    fn sorted(
        &self,
        filter: impl Fn(&QueueItem) -> bool,
        order: fn(&QueueItem, &QueueItem) -> Ordering,
    ) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self
            .items
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        items.sort_by(order);
        items
    }
}

/// `created_at, attempts, id`, matching the PostgreSQL selection query
fn selection_order(a: &QueueItem, b: &QueueItem) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then(a.attempts.cmp(&b.attempts))
        .then(a.id.cmp(&b.id))
}

/// `created_at, id`, matching the PostgreSQL pending scan
fn page_order(a: &QueueItem, b: &QueueItem) -> Ordering {
    a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn schema_present(&self) -> Result<bool, StoreError> {
        Ok(self.schema_present)
    }

    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        let item = item.into_item();
        self.items.insert(item.id, item.clone());

        tracing::debug!(item_id = %item.id, queue_size = self.items.len(), "Item enqueued");

        Ok(item)
    }

    async fn select_batch(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let mut batch = self.sorted(
            |item| {
                item.is_dispatchable(max_attempts, now)
                    && !item.is_claim_active(now, self.claim_lease)
            },
            selection_order,
        );
        batch.truncate(limit);
        Ok(batch)
    }

    async fn claim(
        &self,
        id: Uuid,
        observed_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut item) = self.items.get_mut(&id) else {
            return Ok(false);
        };

        if item.sent_time.is_some() || item.attempts != observed_attempts {
            return Ok(false);
        }

        item.attempts += 1;
        item.last_attempt_time = Some(now);
        item.claimed_at = Some(now);
        Ok(true)
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        attempts: u32,
        last_attempt_time: DateTime<Utc>,
        sent_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut item = self.items.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let expected = item.attempts == attempts || item.attempts + 1 == attempts;
        if item.sent_time.is_some() || !expected {
            return Err(StoreError::Conflict(id));
        }

        item.attempts = attempts;
        item.last_attempt_time = Some(last_attempt_time);
        item.claimed_at = None;
        if sent_time.is_some() {
            item.sent_time = sent_time;
        }
        Ok(())
    }

    async fn purge_resolved(&self, max_attempts: u32) -> Result<u64, StoreError> {
        let before = self.items.len();
        self.items.retain(|_, item| !item.is_resolved(max_attempts));
        let removed = before.saturating_sub(self.items.len()) as u64;

        if removed > 0 {
            tracing::debug!(removed = removed, remaining = self.items.len(), "Purged resolved items");
        }

        Ok(removed)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.items.len() as u64)
    }

    async fn count_with_attempts(&self) -> Result<u64, StoreError> {
        Ok(self.items.iter().filter(|entry| entry.attempts > 0).count() as u64)
    }

    async fn pending_page(&self, offset: u64, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        Ok(self
            .sorted(|item| item.sent_time.is_none(), page_order)
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        Ok(self.items.get(&id).map(|item| item.clone()))
    }
}
