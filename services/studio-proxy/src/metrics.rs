//! Prometheus metrics exposition
//!
//! - `studio_requests_total` (counter): labels `route`, `outcome`
//! - `studio_request_duration_seconds` (histogram): label `route`
//!
//! The failover counters (`credit_failover_total`, `credit_quota_remaining`)
//! are emitted by `credit-pool` and land in the same recorder.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Generation calls can wait out the whole poll window, so buckets run past
/// two minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 180.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("studio_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(builder()?.install_recorder()?)
}

/// Record a finished request.
pub fn record_request(route: &'static str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("studio_requests_total", "route" => route, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("studio_request_duration_seconds", "route" => route)
        .record(duration_secs);
}
