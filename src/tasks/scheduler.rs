use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::mailqueue::MailQueue;

/// Background task that runs a processing round on a fixed interval.
pub struct RoundScheduler {
    queue: Arc<MailQueue>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl RoundScheduler {
    pub fn new(queue: Arc<MailQueue>, interval: Duration, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            queue,
            interval,
            shutdown,
        }
    }

    /// Run rounds until shutdown. Returns the number of rounds started.
    pub async fn run(mut self) -> u64 {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "Round scheduler started");

        let mut rounds = 0u64;
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Round scheduler received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    rounds += 1;
                    // Outcomes recorded so far stand; the rest stay queued.
                    tokio::select! {
                        _ = self.shutdown.recv() => {
                            tracing::info!(round = rounds, "Shutdown during round, remaining items left queued");
                            break;
                        }
                        result = self.queue.process() => {
                            if let Err(e) = result {
                                tracing::error!(round = rounds, error = %e, "Processing round failed");
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(rounds = rounds, "Round scheduler stopped");
        rounds
    }
}
