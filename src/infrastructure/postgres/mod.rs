//! PostgreSQL persistence module.
//!
//! Provides connection pooling for the PostgreSQL queue store.

pub mod pool;

pub use pool::{PostgresPool, PostgresPoolError};
