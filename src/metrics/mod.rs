//! Prometheus metrics for the delivery pipeline.
//!
//! Covers the hot paths of the service:
//! - Queue metrics (enqueued, claimed, sent, failed, requeued)
//! - Credit metrics (units deducted per pool)
//! - Backend health metrics (probe outcomes, active server count)
//! - Delivery latency

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "nexa";

lazy_static! {
    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Total messages accepted into the queue
    pub static ref QUEUE_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_enqueued_total", METRIC_PREFIX),
        "Total messages accepted into the outbound queue"
    ).unwrap();

    /// Total messages claimed by processor cycles
    pub static ref QUEUE_CLAIMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_claimed_total", METRIC_PREFIX),
        "Total messages claimed for processing"
    ).unwrap();

    /// Total messages delivered successfully
    pub static ref MESSAGES_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total messages successfully delivered to a backend gateway"
    ).unwrap();

    /// Total message failures by classification
    pub static ref MESSAGES_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total message failures",
        &["reason"]
    ).unwrap();

    /// Total explicit requeues
    pub static ref QUEUE_REQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_requeued_total", METRIC_PREFIX),
        "Total messages manually requeued"
    ).unwrap();

    /// Messages currently pending (updated each processor cycle)
    pub static ref QUEUE_PENDING: IntGauge = register_int_gauge!(
        format!("{}_queue_pending", METRIC_PREFIX),
        "Messages currently in PENDING state"
    ).unwrap();

    // ============================================================================
    // Credit Metrics
    // ============================================================================

    /// Credit units deducted by pool
    pub static ref CREDIT_DEDUCTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_credit_deducted_total", METRIC_PREFIX),
        "Credit units deducted",
        &["pool"]
    ).unwrap();

    // ============================================================================
    // Backend Health Metrics
    // ============================================================================

    /// Health probe outcomes
    pub static ref HEALTH_PROBES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_health_probes_total", METRIC_PREFIX),
        "Health probe outcomes",
        &["outcome"]
    ).unwrap();

    /// Number of backend servers currently ACTIVE
    pub static ref BACKENDS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_backends_active", METRIC_PREFIX),
        "Backend servers currently in ACTIVE status"
    ).unwrap();

    // ============================================================================
    // Latency Metrics
    // ============================================================================

    /// Delivery call duration in seconds
    pub static ref DELIVERY_DURATION_SECONDS: Histogram = register_histogram!(
        format!("{}_delivery_duration_seconds", METRIC_PREFIX),
        "Duration of delivery calls to backend gateways",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Processor cycle duration in seconds
    pub static ref CYCLE_DURATION_SECONDS: Histogram = register_histogram!(
        format!("{}_cycle_duration_seconds", METRIC_PREFIX),
        "Duration of queue processor cycles",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]
    ).unwrap();
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        QUEUE_ENQUEUED_TOTAL.inc();
        let output = encode_metrics().unwrap();
        assert!(output.contains("nexa_queue_enqueued_total"));
    }
}
