//! Prometheus metrics for recon-service.

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, HistogramVec, TextEncoder, register_counter_vec, register_histogram_vec,
};

/// Histogram for store query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "recon_db_query_duration_seconds",
        "Store query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for sync steps by source and outcome.
pub static SYNC_RUNS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "recon_sync_runs_total",
        "Total number of sync steps",
        &["source", "status"]
    )
    .expect("Failed to register SYNC_RUNS")
});

/// Counter for reconciliation upserts by leg.
pub static LEG_UPSERTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "recon_leg_upserts_total",
        "Total number of leg upserts applied to reconciliation records",
        &["leg"]
    )
    .expect("Failed to register LEG_UPSERTS")
});

/// Counter for lump-sum matcher outcomes.
pub static LUMP_SUM_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "recon_lump_sum_outcomes_total",
        "Lump-sum matcher outcomes",
        &["outcome"]
    )
    .expect("Failed to register LUMP_SUM_OUTCOMES")
});

/// Counter for skipped/malformed source records.
pub static PARSE_FAILURES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "recon_parse_failures_total",
        "Records skipped because their payload could not be decoded",
        &["source"]
    )
    .expect("Failed to register PARSE_FAILURES")
});

/// Counter for source errors surfaced to sync state.
pub static SOURCE_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "recon_source_errors_total",
        "Source adapter failures by source",
        &["source"]
    )
    .expect("Failed to register SOURCE_ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&SYNC_RUNS);
    Lazy::force(&LEG_UPSERTS);
    Lazy::force(&LUMP_SUM_OUTCOMES);
    Lazy::force(&PARSE_FAILURES);
    Lazy::force(&SOURCE_ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

pub fn record_sync_run(source: &str, status: &str) {
    SYNC_RUNS.with_label_values(&[source, status]).inc();
}

pub fn record_leg_upsert(leg: &str) {
    LEG_UPSERTS.with_label_values(&[leg]).inc();
}

pub fn record_lump_sum_outcome(outcome: &str) {
    LUMP_SUM_OUTCOMES.with_label_values(&[outcome]).inc();
}

pub fn record_parse_failure(source: &str) {
    PARSE_FAILURES.with_label_values(&[source]).inc();
}

pub fn record_source_error(source: &str) {
    SOURCE_ERRORS.with_label_values(&[source]).inc();
}
