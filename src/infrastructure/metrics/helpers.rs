//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    CLAIMS_SKIPPED_TOTAL, ENQUEUED_TOTAL, FAILURES_TOTAL, ITEMS_PROCESSED_TOTAL,
    MAILS_NOT_SENT_TOTAL, MAILS_SENT_TOTAL, PENDING_ITEMS, PURGED_TOTAL, ROUNDS_TOTAL,
    ROUND_DURATION, SEND_LATENCY,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Per-item failure classes, used as the `kind` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Decode,
    Transport,
    Store,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Decode => "decode",
            FailureKind::Transport => "transport",
            FailureKind::Store => "store",
        }
    }
}

/// Helper struct for recording dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a finished round
    pub fn record_round(duration: Duration) {
        ROUNDS_TOTAL.inc();
        ROUND_DURATION.observe(duration.as_secs_f64());
    }

    /// Record an item whose attempt was claimed
    pub fn record_processed() {
        ITEMS_PROCESSED_TOTAL.inc();
    }

    /// Record a mail accepted by the transport
    pub fn record_sent(latency: Duration) {
        MAILS_SENT_TOTAL.inc();
        SEND_LATENCY.observe(latency.as_secs_f64());
    }

    /// Record a mail the transport declined
    pub fn record_not_sent(latency: Duration) {
        MAILS_NOT_SENT_TOTAL.inc();
        SEND_LATENCY.observe(latency.as_secs_f64());
    }

    /// Record a per-item failure
    pub fn record_failure(kind: FailureKind) {
        FAILURES_TOTAL.with_label_values(&[kind.as_str()]).inc();
    }

    /// Record an item lost to a concurrent round
    pub fn record_skipped() {
        CLAIMS_SKIPPED_TOTAL.inc();
    }
}

/// Helper struct for recording queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn record_enqueued() {
        ENQUEUED_TOTAL.inc();
    }

    pub fn record_purged(count: u64) {
        PURGED_TOTAL.inc_by(count);
    }

    /// Set pending item count (updated by the stats pass)
    pub fn set_pending(count: u64) {
        PENDING_ITEMS.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}
