//! Durable mail queue storage.
//!
//! The queue system uses a store abstraction to support different storage
//! implementations:
//!
//! - `MemoryQueueStore`: In-memory storage using DashMap
//! - `PostgresQueueStore`: Persistent storage using PostgreSQL (default)
//!
//! Use `create_queue_store()` to create the appropriate store based on configuration.

mod factory;
mod item;
pub mod memory_store;
pub mod postgres_store;
pub mod store;

pub use factory::create_queue_store;
pub use item::{NewQueueItem, QueueItem};
pub use memory_store::MemoryQueueStore;
pub use postgres_store::PostgresQueueStore;
pub use store::{QueueStore, StoreError};
