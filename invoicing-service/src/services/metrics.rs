//! Prometheus metrics for invoicing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Gauge, HistogramVec,
    TextEncoder,
};

/// Bill runs by trigger and outcome of creation.
pub static BILL_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_bill_runs_total",
        "Total number of bill runs requested",
        &["trigger", "outcome"] // targeted|periodic, queued|already_in_progress
    )
    .expect("Failed to register bill_runs_total")
});

/// Worker results by status.
pub static INVOICE_JOBS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_invoice_jobs_total",
        "Invoice jobs by result status",
        &["status"]
    )
    .expect("Failed to register invoice_jobs_total")
});

/// Time spent pricing one invoice.
pub static INVOICE_JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoicing_invoice_job_duration_seconds",
        "Invoice job duration in seconds",
        &["status"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register invoice_job_duration")
});

/// Jobs reserved in the worker pool and not yet aggregated.
pub static POOL_PENDING_JOBS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "invoicing_pool_pending_jobs",
        "Jobs reserved in the current pool generation"
    )
    .expect("Failed to register pool_pending_jobs")
});

/// Re-run requests by outcome.
pub static RERUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_reruns_total",
        "Bill run re-run requests by outcome",
        &["status"]
    )
    .expect("Failed to register reruns_total")
});

/// Database query duration histogram by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoicing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    rating_service::services::init_metrics();
    Lazy::force(&BILL_RUNS_TOTAL);
    Lazy::force(&INVOICE_JOBS_TOTAL);
    Lazy::force(&INVOICE_JOB_DURATION);
    Lazy::force(&POOL_PENDING_JOBS);
    Lazy::force(&RERUNS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_bill_run(trigger: &str, outcome: &str) {
    BILL_RUNS_TOTAL.with_label_values(&[trigger, outcome]).inc();
}

pub fn record_invoice_job(status: &str, duration_secs: f64) {
    INVOICE_JOBS_TOTAL.with_label_values(&[status]).inc();
    INVOICE_JOB_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

pub fn record_rerun(status: &str) {
    RERUNS_TOTAL.with_label_values(&[status]).inc();
}

pub fn set_pending_jobs(pending: usize) {
    POOL_PENDING_JOBS.set(pending as f64);
}

/// Jobs settled before reaching a worker.
pub fn record_rejected_job() {
    INVOICE_JOBS_TOTAL.with_label_values(&["rejected"]).inc();
}
