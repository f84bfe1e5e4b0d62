//! Prometheus metrics for the mail queue.
//!
//! This module provides metrics for monitoring queue processing:
//! - Round metrics (rounds run, round duration)
//! - Item metrics (processed, sent, not sent, failures by kind, skipped claims)
//! - Queue metrics (enqueued, purged, pending)
//! - Transport latency

mod helpers;

pub use helpers::{encode_metrics, DispatchMetrics, FailureKind, QueueMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "mailqueue";

lazy_static! {
    // ============================================================================
    // Round Metrics
    // ============================================================================

    /// Total processing rounds completed
    pub static ref ROUNDS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_rounds_total", METRIC_PREFIX),
        "Total processing rounds completed"
    ).unwrap();

    /// Round duration
    pub static ref ROUND_DURATION: Histogram = register_histogram!(
        format!("{}_round_duration_seconds", METRIC_PREFIX),
        "Processing round duration in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // ============================================================================
    // Item Metrics
    // ============================================================================

    /// Items whose attempt was taken by a round
    pub static ref ITEMS_PROCESSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_items_processed_total", METRIC_PREFIX),
        "Total queue items processed"
    ).unwrap();

    /// Mails accepted by the transport
    pub static ref MAILS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_mails_sent_total", METRIC_PREFIX),
        "Total mails accepted by the transport"
    ).unwrap();

    /// Mails declined by the transport without an error
    pub static ref MAILS_NOT_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_mails_not_sent_total", METRIC_PREFIX),
        "Total mails declined by the transport"
    ).unwrap();

    /// Per-item failures by kind (decode, transport, store)
    pub static ref FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_failures_total", METRIC_PREFIX),
        "Total per-item failures",
        &["kind"]
    ).unwrap();

    /// Items another round claimed first
    pub static ref CLAIMS_SKIPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_claims_skipped_total", METRIC_PREFIX),
        "Total items skipped because another round claimed them"
    ).unwrap();

    /// Transport send latency
    pub static ref SEND_LATENCY: Histogram = register_histogram!(
        format!("{}_send_latency_seconds", METRIC_PREFIX),
        "Transport send latency in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Items written by the enqueue path
    pub static ref ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_enqueued_total", METRIC_PREFIX),
        "Total mails enqueued"
    ).unwrap();

    /// Resolved items removed by the purger
    pub static ref PURGED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_purged_total", METRIC_PREFIX),
        "Total resolved items purged"
    ).unwrap();

    /// Unsent items seen by the last stats pass
    pub static ref PENDING_ITEMS: IntGauge = register_int_gauge!(
        format!("{}_pending_items", METRIC_PREFIX),
        "Unsent items in the queue at the last stats pass"
    ).unwrap();
}
