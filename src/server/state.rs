use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::mailqueue::MailQueue;
use crate::postgres::PostgresPool;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub queue: Arc<MailQueue>,
    pub postgres_pool: Option<PostgresPool>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, queue: Arc<MailQueue>, postgres_pool: Option<PostgresPool>) -> Self {
        Self {
            settings: Arc::new(settings),
            queue,
            postgres_pool,
            start_time: Instant::now(),
        }
    }
}
