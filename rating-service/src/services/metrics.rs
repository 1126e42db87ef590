//! Prometheus metrics for rating-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for rated reports by outcome.
pub static RATINGS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rating_reports_total",
        "Total number of usage reports rated",
        &["status"]
    )
    .expect("Failed to register RATINGS")
});

/// Histogram for rating duration.
pub static RATING_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rating_duration_seconds",
        "Time spent rating one usage report",
        &["status"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register RATING_DURATION")
});

/// Counter for plan fallbacks to the default plan.
pub static PLAN_FALLBACKS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rating_plan_fallbacks_total",
        "Number of times rating fell back to the default plan",
        &["reason"]
    )
    .expect("Failed to register PLAN_FALLBACKS")
});

/// Counter for catalog cache lookups.
pub static CATALOG_LOOKUPS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rating_catalog_lookups_total",
        "Catalog cache lookups by kind and result",
        &["kind", "result"]
    )
    .expect("Failed to register CATALOG_LOOKUPS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rating_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for messages forwarded to the credit ledger.
pub static LEDGER_MESSAGES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rating_ledger_messages_total",
        "Messages forwarded to the credit ledger",
        &["kind", "status"]
    )
    .expect("Failed to register LEDGER_MESSAGES")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&RATINGS);
    Lazy::force(&RATING_DURATION);
    Lazy::force(&PLAN_FALLBACKS);
    Lazy::force(&CATALOG_LOOKUPS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&LEDGER_MESSAGES);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a rated report.
pub fn record_rating(status: &str, duration_secs: f64) {
    RATINGS.with_label_values(&[status]).inc();
    RATING_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record a fall back to the default plan.
pub fn record_plan_fallback(reason: &str) {
    PLAN_FALLBACKS.with_label_values(&[reason]).inc();
}

/// Record a catalog cache lookup.
pub fn record_catalog_lookup(kind: &str, result: &str) {
    CATALOG_LOOKUPS.with_label_values(&[kind, result]).inc();
}

/// Record a ledger message.
pub fn record_ledger_message(kind: &str, status: &str) {
    LEDGER_MESSAGES.with_label_values(&[kind, status]).inc();
}
