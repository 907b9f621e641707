//! Metrics Module for the Earnings Ledger
//!
//! Provides Prometheus-compatible metrics for monitoring:
//! - API request metrics (latency, count, in flight)
//! - Referral bonuses awarded per chain level
//! - Earnings credited per source
//! - Payouts settled or held back by the gate
//! - Database query latency

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Instant;

/// Metric names as constants for consistency
pub mod names {
    // API Metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";

    // Referral Metrics
    pub const REFERRAL_BONUSES_TOTAL: &str = "referral_bonuses_total";
    pub const REFERRAL_BONUS_AMOUNT_USD: &str = "referral_bonus_amount_usd";

    // Earnings Metrics
    pub const EARNINGS_CREDITED_TOTAL: &str = "earnings_credited_total";
    pub const EARNINGS_CREDITED_USD: &str = "earnings_credited_usd";

    // Payout Metrics
    pub const PAYOUTS_PROCESSED_TOTAL: &str = "payouts_processed_total";
    pub const PAYOUTS_BLOCKED_TOTAL: &str = "payouts_blocked_total";
    pub const PAYOUT_AMOUNT_USD: &str = "payout_amount_usd";
    pub const PAYOUT_SWEEP_DURATION_SECONDS: &str = "payout_sweep_duration_seconds";

    // Fraud Metrics
    pub const FRAUD_DETECTIONS_TOTAL: &str = "fraud_detections_total";

    // Database Metrics
    pub const DB_QUERY_DURATION_SECONDS: &str = "db_query_duration_seconds";
}

/// Label keys
pub mod labels {
    pub const METHOD: &str = "method";
    pub const ENDPOINT: &str = "endpoint";
    pub const STATUS: &str = "status";
    pub const LEVEL: &str = "level";
    pub const SOURCE: &str = "source";
    pub const KIND: &str = "kind";
    pub const REASON: &str = "reason";
    pub const FRAUD_TYPE: &str = "fraud_type";
    pub const QUERY_TYPE: &str = "query_type";
}

/// Initialize Prometheus metrics exporter
///
/// Returns a handle that can be used to render metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        // HTTP request duration buckets (in seconds)
        .set_buckets_for_metric(
            Matcher::Full(names::HTTP_REQUEST_DURATION_SECONDS.to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )?
        .set_buckets_for_metric(
            Matcher::Full(names::PAYOUT_SWEEP_DURATION_SECONDS.to_string()),
            &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0],
        )?
        .set_buckets_for_metric(
            Matcher::Full(names::DB_QUERY_DURATION_SECONDS.to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0],
        )?
        .install_recorder()
}

fn usd(amount: Decimal) -> f64 {
    amount.to_f64().unwrap_or(0.0)
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request
pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    counter!(
        names::HTTP_REQUESTS_TOTAL,
        labels::METHOD => method.to_string(),
        labels::ENDPOINT => endpoint.to_string(),
        labels::STATUS => status_str.clone()
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        labels::METHOD => method.to_string(),
        labels::ENDPOINT => endpoint.to_string(),
        labels::STATUS => status_str
    )
    .record(duration_secs);
}

pub fn request_started() {
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
}

pub fn request_finished() {
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);
}

// ============================================================================
// Ledger Metrics
// ============================================================================

/// Record one level of a referral bonus award
pub fn record_referral_bonus(level: i32, amount: Decimal) {
    counter!(names::REFERRAL_BONUSES_TOTAL, labels::LEVEL => level.to_string()).increment(1);
    histogram!(names::REFERRAL_BONUS_AMOUNT_USD, labels::LEVEL => level.to_string()).record(usd(amount));
}

/// Record an earnings credit
pub fn record_earnings_credit(source: &str, amount: Decimal) {
    counter!(names::EARNINGS_CREDITED_TOTAL, labels::SOURCE => source.to_string()).increment(1);
    histogram!(names::EARNINGS_CREDITED_USD, labels::SOURCE => source.to_string()).record(usd(amount));
}

/// Record a settled payout; `kind` is "sweep", "scheduled" or "manual"
pub fn record_payout_processed(kind: &str, amount: Decimal) {
    counter!(names::PAYOUTS_PROCESSED_TOTAL, labels::KIND => kind.to_string()).increment(1);
    histogram!(names::PAYOUT_AMOUNT_USD, labels::KIND => kind.to_string()).record(usd(amount));
}

/// Record a payout held back by the gate
pub fn record_payout_blocked(reason: &str) {
    counter!(names::PAYOUTS_BLOCKED_TOTAL, labels::REASON => reason.to_string()).increment(1);
}

pub fn record_payout_sweep(kind: &str, duration_secs: f64) {
    histogram!(names::PAYOUT_SWEEP_DURATION_SECONDS, labels::KIND => kind.to_string()).record(duration_secs);
}

pub fn record_fraud_detection(fraud_type: &str) {
    counter!(names::FRAUD_DETECTIONS_TOTAL, labels::FRAUD_TYPE => fraud_type.to_string()).increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query duration
pub fn record_db_query(query_type: &str, duration_secs: f64) {
    histogram!(
        names::DB_QUERY_DURATION_SECONDS,
        labels::QUERY_TYPE => query_type.to_string()
    )
    .record(duration_secs);
}

// ============================================================================
// Timer Helper
// ============================================================================

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_secs();
        assert!(elapsed >= 0.01);
        assert!(elapsed < 0.5);
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(names::HTTP_REQUESTS_TOTAL, "http_requests_total");
        assert_eq!(names::REFERRAL_BONUSES_TOTAL, "referral_bonuses_total");
        assert_eq!(names::PAYOUTS_BLOCKED_TOTAL, "payouts_blocked_total");
    }

    #[test]
    fn test_label_keys() {
        assert_eq!(labels::METHOD, "method");
        assert_eq!(labels::LEVEL, "level");
        assert_eq!(labels::SOURCE, "source");
    }

    #[test]
    fn test_recording_without_recorder_is_a_noop() {
        record_referral_bonus(2, dec!(7.50));
        record_earnings_credit("content", dec!(65));
        record_payout_blocked("refund_hold");
    }

    #[test]
    fn test_usd_conversion() {
        assert_eq!(usd(dec!(12.34)), 12.34);
    }
}
