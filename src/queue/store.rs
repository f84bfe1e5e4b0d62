//! Storage trait for the mail queue.
//!
//! This module defines the persistence boundary of the queue, allowing
//! different storage implementations (memory, PostgreSQL) to be used
//! interchangeably by the dispatcher, purger and stats reporter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::item::{NewQueueItem, QueueItem};

/// Default time an unfinished claim keeps an item out of selection
pub const DEFAULT_CLAIM_LEASE_SECONDS: u64 = 600;

/// Errors that can occur during queue store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The item no longer exists (purged or never written)
    #[error("Queue item {0} not found")]
    NotFound(Uuid),

    /// A conditional write lost against another writer
    #[error("Queue item {0} was modified concurrently")]
    Conflict(Uuid),

    /// The configured table name is not a plain SQL identifier
    #[error("Invalid table name \"{0}\"")]
    InvalidTable(String),

    /// Backend is not usable with the given configuration
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Queue settings would break delivery guarantees
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// A value does not fit the storage column
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
}

/// Durable persistence of queue items.
///
/// # Concurrency
///
/// Rounds may overlap. Implementations must make [`claim`](QueueStore::claim)
/// and [`record_outcome`](QueueStore::record_outcome) conditional writes so
/// that two rounds can never both claim the same attempt of an item, and an
/// outcome never blindly overwrites a newer state.
///
/// A claim also marks the item as in flight until its outcome is recorded.
/// [`select_batch`](QueueStore::select_batch) skips in-flight items unless
/// the claim is older than the store's claim lease, which returns items
/// abandoned by a crashed round to the queue.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (`Send + Sync`) as they are shared
/// across rounds, the scheduler and the HTTP handlers.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Backend identifier used in logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Whether the backing table exists.
    async fn schema_present(&self) -> Result<bool, StoreError>;

    /// Write a new item with `attempts = 0` and no sent time.
    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, StoreError>;

    /// Items eligible for dispatch at `now` and not in flight.
    ///
    /// Ordered by `created_at` ascending, ties broken by `attempts`
    /// ascending, and truncated to `limit`.
    async fn select_batch(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, StoreError>;

    /// Atomically take the next attempt of an item.
    ///
    /// Increments `attempts` and sets `last_attempt_time` and `claimed_at` to
    /// `now` only if the item still has `attempts == observed_attempts` and no
    /// sent time.
    ///
    /// # Returns
    ///
    /// `true` if this caller owns the attempt, `false` if another writer got
    /// there first or the item is gone.
    async fn claim(
        &self,
        id: Uuid,
        observed_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Persist the outcome of an attempt.
    ///
    /// `attempts` is the post-attempt count. The write only applies while the
    /// item is unsent and its stored count is `attempts` (already claimed) or
    /// `attempts - 1` (unclaimed). Releases the claim.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the item vanished and
    /// `StoreError::Conflict` if another writer changed it.
    async fn record_outcome(
        &self,
        id: Uuid,
        attempts: u32,
        last_attempt_time: DateTime<Utc>,
        sent_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Delete every sent or exhausted item in one operation.
    ///
    /// # Returns
    ///
    /// The number of items removed.
    async fn purge_resolved(&self, max_attempts: u32) -> Result<u64, StoreError>;

    /// Total number of items.
    async fn count(&self) -> Result<u64, StoreError>;

    /// Number of items attempted at least once.
    async fn count_with_attempts(&self) -> Result<u64, StoreError>;

    /// Unsent items ordered by `created_at` then `id`, for diagnostic scans.
    async fn pending_page(&self, offset: u64, limit: usize) -> Result<Vec<QueueItem>, StoreError>;

    /// Look up a single item.
    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError>;
}
