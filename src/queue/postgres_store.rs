//! PostgreSQL-based queue store.
//!
//! Items live in a single table (see `sql/mail_queue.sql`). Attempt
//! bookkeeping uses conditional `UPDATE`s so that overlapping rounds on
//! different processes cannot claim the same attempt twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::item::{NewQueueItem, QueueItem};
use super::store::{QueueStore, StoreError, DEFAULT_CLAIM_LEASE_SECONDS};

const COLUMNS: &str = "id, subject, payload, created_at, time_to_send, attempts, last_attempt_time, sent_time, claimed_at";

type QueueRow = (
    Uuid,
    Option<String>,
    Vec<u8>,
    DateTime<Utc>,
    DateTime<Utc>,
    i32,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

fn into_item(row: QueueRow) -> QueueItem {
    let (
        id,
        subject,
        payload,
        created_at,
        time_to_send,
        attempts,
        last_attempt_time,
        sent_time,
        claimed_at,
    ) = row;
    QueueItem {
        id,
        subject: subject.unwrap_or_default(),
        payload,
        created_at,
        time_to_send,
        attempts: attempts.max(0) as u32,
        last_attempt_time,
        sent_time,
        claimed_at,
    }
}

/// Convert an attempt count for an `INTEGER` column without wrapping.
fn attempts_param(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::OutOfRange(format!("{} {} exceeds INTEGER", what, value)))
}

/// Row counts are clamped; a limit or offset past `i64::MAX` cannot match more rows.
fn count_param<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

/// Accepts `table` or `schema.table`, each part a plain SQL identifier.
pub(crate) fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let parts: Vec<&str> = name.split('.').collect();
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                part.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    };

    if parts.len() > 2 || !parts.iter().all(|part| valid_part(part)) {
        return Err(StoreError::InvalidTable(name.to_string()));
    }
    Ok(())
}

/// PostgreSQL-based queue store.
pub struct PostgresQueueStore {
    /// PostgreSQL connection pool
    pool: PgPool,

    /// Validated table name
    table: String,

    /// Age after which an unfinished claim no longer blocks selection
    claim_lease: chrono::Duration,
}

impl PostgresQueueStore {
    /// Create a store over `table`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTable` if `table` is not a plain identifier;
    /// the name is interpolated into SQL.
    pub fn new(pool: PgPool, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            claim_lease: chrono::Duration::seconds(DEFAULT_CLAIM_LEASE_SECONDS as i64),
        })
    }

    pub fn with_claim_lease(mut self, lease: std::time::Duration) -> Self {
        self.claim_lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn schema_present(&self) -> Result<bool, StoreError> {
        let present: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(&self.table)
            .fetch_one(&self.pool)
            .await?;
        Ok(present)
    }

    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        let row: QueueRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO {} (id, subject, payload, created_at, time_to_send, attempts)
            VALUES ($1, $2, $3, $4, $5, 0)
            RETURNING {}
            "#,
            self.table, COLUMNS
        ))
        .bind(item.id)
        .bind(&item.subject)
        .bind(&item.payload)
        .bind(item.created_at)
        .bind(item.time_to_send)
        .fetch_one(&self.pool)
        .await?;

        tracing::trace!(item_id = %item.id, table = %self.table, "Item written to PostgreSQL");

        Ok(into_item(row))
    }

    async fn select_batch(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let max_attempts = attempts_param(max_attempts, "max_attempts")?;
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM {}
            WHERE sent_time IS NULL AND attempts < $1 AND time_to_send <= $2
              AND (claimed_at IS NULL OR claimed_at <= $4)
            ORDER BY created_at ASC, attempts ASC, id ASC
            LIMIT $3
            "#,
            COLUMNS, self.table
        ))
        .bind(max_attempts)
        .bind(now)
        .bind(count_param(limit))
        .bind(now.checked_sub_signed(self.claim_lease).unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_item).collect())
    }

    async fn claim(
        &self,
        id: Uuid,
        observed_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let observed_attempts = attempts_param(observed_attempts, "attempts")?;
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET attempts = attempts + 1, last_attempt_time = $3, claimed_at = $3
            WHERE id = $1 AND attempts = $2 AND sent_time IS NULL
            "#,
            self.table
        ))
        .bind(id)
        .bind(observed_attempts)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        attempts: u32,
        last_attempt_time: DateTime<Utc>,
        sent_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let attempts = attempts_param(attempts, "attempts")?;
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET attempts = $2, last_attempt_time = $3, sent_time = $4, claimed_at = NULL
            WHERE id = $1 AND sent_time IS NULL AND attempts IN ($2, $2 - 1)
            "#,
            self.table
        ))
        .bind(id)
        .bind(attempts)
        .bind(last_attempt_time)
        .bind(sent_time)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            self.table
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            Err(StoreError::Conflict(id))
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    async fn purge_resolved(&self, max_attempts: u32) -> Result<u64, StoreError> {
        let max_attempts = attempts_param(max_attempts, "max_attempts")?;
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE sent_time IS NOT NULL OR attempts >= $1",
            self.table
        ))
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::debug!(table = %self.table, purged = count, "Purged resolved items from PostgreSQL");
        }

        Ok(count)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_with_attempts(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE attempts > 0",
            self.table
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn pending_page(&self, offset: u64, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM {}
            WHERE sent_time IS NULL
            ORDER BY created_at ASC, id ASC
            OFFSET $1
            LIMIT $2
            "#,
            COLUMNS, self.table
        ))
        .bind(count_param(offset))
        .bind(count_param(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_item).collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            COLUMNS, self.table
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(into_item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_table_names() {
        for name in ["mail_queue", "public.mail_queue", "_queue2"] {
            assert!(validate_table_name(name).is_ok(), "{} should be accepted", name);
        }
    }

    #[test]
    fn test_invalid_table_names() {
        for name in [
            "",
            "2queue",
            "mail-queue",
            "mail_queue; DROP TABLE users",
            "a.b.c",
            "{{%mail_queue}}",
        ] {
            assert!(
                matches!(validate_table_name(name), Err(StoreError::InvalidTable(_))),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_attempt_params_do_not_wrap() {
        assert_eq!(attempts_param(3, "max_attempts").unwrap(), 3);
        assert_eq!(attempts_param(i32::MAX as u32, "attempts").unwrap(), i32::MAX);
        assert!(matches!(
            attempts_param(u32::MAX, "max_attempts"),
            Err(StoreError::OutOfRange(_))
        ));
        assert_eq!(count_param(u64::MAX), i64::MAX);
        assert_eq!(count_param(100usize), 100);
    }

    #[test]
    fn test_row_conversion() {
        let now = Utc::now();
        let row: QueueRow = (Uuid::nil(), None, vec![1, 2], now, now, 2, Some(now), None, Some(now));
        let item = into_item(row);
        assert_eq!(item.subject, "");
        assert_eq!(item.claimed_at, Some(now));
        assert_eq!(item.attempts, 2);
        assert_eq!(item.payload, vec![1, 2]);
        assert!(!item.is_sent());
    }
}
