//! Queue store factory

use std::sync::Arc;
use std::time::Duration;

use crate::config::MailQueueConfig;
use crate::postgres::PostgresPool;

use super::memory_store::MemoryQueueStore;
use super::postgres_store::PostgresQueueStore;
use super::store::{QueueStore, StoreError};

/// Create a queue store based on configuration.
///
/// Returns the appropriate store implementation based on the `backend` setting:
/// - `"postgres"` (default): Returns a `PostgresQueueStore` over `table`
/// - `"memory"`: Returns a `MemoryQueueStore`
///
/// A PostgreSQL backend without a pool is an error; there is no memory fallback.
/// Settings that fail [`MailQueueConfig::validate`] are rejected before any
/// store is built.
///
/// # Example
///
/// ```rust,ignore
/// let store = create_queue_store(&settings.mailqueue, Some(&pg_pool))?;
/// ```
pub fn create_queue_store(
    settings: &MailQueueConfig,
    postgres_pool: Option<&PostgresPool>,
) -> Result<Arc<dyn QueueStore>, StoreError> {
    settings.validate().map_err(StoreError::InvalidConfig)?;
    let claim_lease = Duration::from_secs(settings.claim_lease_seconds);

    match settings.backend.as_str() {
        "postgres" => {
            let pool = postgres_pool.ok_or_else(|| {
                StoreError::Unavailable(
                    "PostgreSQL backend requested but no pool provided".to_string(),
                )
            })?;
            tracing::info!(
                backend = "postgres",
                table = %settings.table,
                "Creating PostgreSQL queue store"
            );
            Ok(Arc::new(
                PostgresQueueStore::new(pool.pool().clone(), &settings.table)?
                    .with_claim_lease(claim_lease),
            ))
        }
        "memory" => {
            tracing::warn!(
                backend = "memory",
                "Creating memory queue store; queued mail is lost on restart"
            );
            Ok(Arc::new(MemoryQueueStore::new().with_claim_lease(claim_lease)))
        }
        other => Err(StoreError::Unavailable(format!(
            "Unknown queue backend \"{}\"",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend() {
        let settings = MailQueueConfig {
            backend: "memory".to_string(),
            ..Default::default()
        };
        let store = create_queue_store(&settings, None).unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[test]
    fn test_postgres_without_pool() {
        let settings = MailQueueConfig::default();
        assert!(matches!(
            create_queue_store(&settings, None),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_short_claim_lease_rejected() {
        let settings = MailQueueConfig {
            backend: "memory".to_string(),
            claim_lease_seconds: 5,
            send_timeout_seconds: 30,
            ..Default::default()
        };
        assert!(matches!(
            create_queue_store(&settings, None),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unknown_backend() {
        let settings = MailQueueConfig {
            backend: "redis".to_string(),
            ..Default::default()
        };
        assert!(create_queue_store(&settings, None).is_err());
    }
}
