//! Prometheus metrics for the pipeline.
#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all CityPulse metrics
const PREFIX: &str = "citypulse";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Ingestion
    pub static ref INGEST_CYCLES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_ingest_cycles_total"),
        "Completed ingestion cycles"
    ).expect("Failed to create ingest_cycles_total metric");

    pub static ref INGEST_CYCLE_LAG_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_ingest_cycle_lag_total"),
        "Cycles that overran the poll interval"
    ).expect("Failed to create ingest_cycle_lag_total metric");

    pub static ref INGEST_SAMPLES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ingest_samples_total"), "Samples emitted per location"),
        &["location"]
    ).expect("Failed to create ingest_samples_total metric");

    pub static ref INGEST_LOCATION_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_ingest_location_failures_total"),
            "Cycles where a location produced no sample"
        ),
        &["location"]
    ).expect("Failed to create ingest_location_failures_total metric");

    // Upstream feeds
    pub static ref UPSTREAM_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_upstream_request_duration_seconds"),
            "Upstream feed request duration in seconds"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["feed"]
    ).expect("Failed to create upstream_request_duration_seconds metric");

    pub static ref UPSTREAM_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_upstream_errors_total"), "Upstream feed errors"),
        &["feed", "kind"]
    ).expect("Failed to create upstream_errors_total metric");

    // Bus
    pub static ref BUS_PUBLISH_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_bus_publish_failures_total"), "Bus publish failures"),
        &["kind"]
    ).expect("Failed to create bus_publish_failures_total metric");

    // Speed layer
    pub static ref SPEED_RECORDS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_speed_records_total"), "Records handled by the speed layer"),
        &["result"]
    ).expect("Failed to create speed_records_total metric");

    pub static ref REALTIME_EVICTED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_realtime_evicted_total"),
        "Realtime rows deactivated by eviction"
    ).expect("Failed to create realtime_evicted_total metric");

    // Batch layer
    pub static ref BATCH_JOB_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_batch_job_runs_total"), "Batch job executions"),
        &["job", "status"]
    ).expect("Failed to create batch_job_runs_total metric");

    pub static ref BATCH_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_batch_job_duration_seconds"),
            "Batch job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        &["job"]
    ).expect("Failed to create batch_job_duration_seconds metric");

    // Serving layer
    pub static ref SERVING_QUERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_serving_queries_total"), "Serving layer queries by tier"),
        &["tier"]
    ).expect("Failed to create serving_queries_total metric");

    pub static ref UP: IntGauge = IntGauge::new(
        format!("{PREFIX}_up"),
        "Set to 1 while the process is running"
    ).expect("Failed to create up metric");
}

/// Register all metrics with the global registry. Call once at startup;
/// double registration is ignored so tests can call it freely.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(INGEST_CYCLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INGEST_CYCLE_LAG_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INGEST_SAMPLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INGEST_LOCATION_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BUS_PUBLISH_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SPEED_RECORDS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REALTIME_EVICTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_JOB_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(SERVING_QUERIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UP.clone()));
    UP.set(1);
}

pub fn record_upstream_request(feed: &str, duration: Duration) {
    UPSTREAM_REQUEST_DURATION_SECONDS
        .with_label_values(&[feed])
        .observe(duration.as_secs_f64());
}

pub fn record_upstream_error(feed: &str, kind: &str) {
    UPSTREAM_ERRORS_TOTAL.with_label_values(&[feed, kind]).inc();
}

pub fn record_publish_failure(kind: &str) {
    BUS_PUBLISH_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_speed_record(result: &str) {
    SPEED_RECORDS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_batch_job(job: &str, status: &str, duration: Duration) {
    BATCH_JOB_RUNS_TOTAL.with_label_values(&[job, status]).inc();
    BATCH_JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

pub fn record_serving_query(tier: &str) {
    SERVING_QUERIES_TOTAL.with_label_values(&[tier]).inc();
}

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        INGEST_CYCLES_TOTAL.inc();
        let rendered = render();
        assert!(rendered.contains("citypulse_ingest_cycles_total"));
        assert!(rendered.contains("citypulse_up 1"));
    }

    #[test]
    fn test_labelled_counters() {
        init_metrics();
        record_upstream_error("aqi", "status");
        record_speed_record("stored");
        record_batch_job("hourly_rollup", "completed", Duration::from_millis(12));
        let rendered = render();
        assert!(rendered.contains("citypulse_upstream_errors_total"));
        assert!(rendered.contains("citypulse_batch_job_runs_total"));
    }
}
