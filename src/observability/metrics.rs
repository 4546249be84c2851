//! Metrics collection for `capsule-arena`.
//!
//! Prometheus-compatible metrics with label cardinality protection and
//! typed convenience functions for recording measurements. The exporter is
//! installed without its own listener; `GET /metrics` renders the handle.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{ArenaError, UpstreamTarget};
use crate::model::RunStatus;

/// Process-wide recorder handle; the recorder can only be installed once.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Route templates used as the `endpoint` label.
///
/// Anything else is bucketed as `"__other__"` so clients cannot inflate
/// label cardinality by requesting arbitrary paths.
const KNOWN_ENDPOINTS: [&str; 12] = [
    "/health",
    "/metrics",
    "/capsules",
    "/capsules/{id}",
    "/battle/start",
    "/battle/start_multi",
    "/battle/list",
    "/battle/stop/{run_id}",
    "/battle/status/{run_id}",
    "/battle/get/{run_id}",
    "/evolve/status/{run_id}",
    "/evolve/{run_id}",
];

/// Collapses a request path to its route template.
///
/// `/battle/status/abc123` becomes `/battle/status/{run_id}`.
#[must_use]
pub fn endpoint_label(path: &str) -> &'static str {
    const TEMPLATED: [(&str, &str); 6] = [
        ("/battle/status/", "/battle/status/{run_id}"),
        ("/battle/get/", "/battle/get/{run_id}"),
        ("/battle/stop/", "/battle/stop/{run_id}"),
        ("/evolve/status/", "/evolve/status/{run_id}"),
        ("/evolve/", "/evolve/{run_id}"),
        ("/capsules/", "/capsules/{id}"),
    ];

    if let Some(known) = KNOWN_ENDPOINTS.iter().find(|known| **known == path) {
        return known;
    }
    for (prefix, template) in TEMPLATED {
        if let Some(rest) = path.strip_prefix(prefix) {
            if !rest.is_empty() && !rest.contains('/') {
                return template;
            }
        }
    }
    "__other__"
}

/// Installs the global Prometheus recorder and returns its handle.
///
/// Safe to call more than once; later calls return the first handle.
///
/// # Errors
///
/// Returns `ArenaError::Io` if the recorder cannot be installed (another
/// global recorder is already set).
pub fn init_metrics() -> Result<PrometheusHandle, ArenaError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        tracing::debug!("metrics already initialized, reusing handle");
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ArenaError::Io(std::io::Error::other(e.to_string())))?;
    describe_metrics();
    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!("arena_rounds_total", "Rounds appended across all runs");
    describe_counter!("arena_breaches_total", "Rounds judged as a breach");
    describe_counter!(
        "arena_degraded_rounds_total",
        "Rounds recorded after an upstream failure"
    );
    describe_counter!(
        "arena_upstream_failures_total",
        "Upstream calls that failed after all attempts, by target"
    );
    describe_counter!(
        "arena_runs_finished_total",
        "Runs that reached a terminal state, by status"
    );
    describe_counter!("arena_mutations_total", "Capsule mutations, by strategy");
    describe_counter!("arena_errors_total", "Errors surfaced to callers, by kind");
    describe_counter!(
        "arena_http_requests_total",
        "HTTP requests by method, endpoint and status code"
    );
    describe_gauge!("arena_active_runs", "Runs currently in the running state");
    describe_gauge!("arena_breach_rate", "Breach rate of the most recently updated run");
    describe_histogram!("arena_round_duration_ms", "Round execution time in milliseconds");
    describe_histogram!("arena_run_duration_seconds", "Run wall-clock time in seconds");
    describe_histogram!(
        "arena_http_request_duration_ms",
        "HTTP request latency in milliseconds"
    );
}

/// Records an appended round.
pub fn record_round(breach: bool, degraded: bool, duration: Duration) {
    counter!("arena_rounds_total").increment(1);
    if breach {
        counter!("arena_breaches_total").increment(1);
    }
    if degraded {
        counter!("arena_degraded_rounds_total").increment(1);
    }
    histogram!("arena_round_duration_ms").record(duration.as_secs_f64() * 1000.0);
}

/// Sets the last-updated breach rate gauge.
pub fn set_breach_rate(rate: f64) {
    gauge!("arena_breach_rate").set(rate);
}

/// Records an upstream call that exhausted its attempts.
pub fn record_upstream_failure(target: UpstreamTarget) {
    counter!("arena_upstream_failures_total", "target" => target.as_str()).increment(1);
}

/// Marks a run as entering the running state.
pub fn run_started() {
    gauge!("arena_active_runs").increment(1.0);
}

/// Marks a run as leaving the running state.
pub fn run_finished(status: RunStatus, duration: Duration) {
    gauge!("arena_active_runs").decrement(1.0);
    counter!("arena_runs_finished_total", "status" => status.as_str()).increment(1);
    histogram!("arena_run_duration_seconds").record(duration.as_secs_f64());
}

/// Records a capsule mutation.
///
/// Strategy names are caller-supplied, so unknown ones share a bucket.
pub fn record_mutation(strategy: &str) {
    let label = match strategy {
        "defense_harden" | "attack_explore" => strategy.to_owned(),
        _ => "__custom__".to_owned(),
    };
    counter!("arena_mutations_total", "strategy" => label).increment(1);
}

/// Records an error surfaced to a caller.
pub fn record_error(err: &ArenaError) {
    counter!("arena_errors_total", "kind" => err.kind()).increment(1);
}

/// Records a served HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let endpoint = endpoint_label(path);
    counter!(
        "arena_http_requests_total",
        "method" => method_label(method),
        "endpoint" => endpoint,
        "code" => status.to_string(),
    )
    .increment(1);
    histogram!("arena_http_request_duration_ms", "endpoint" => endpoint)
        .record(duration.as_secs_f64() * 1000.0);
}

/// Bounds the method label to the verbs the router serves.
fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "POST" => "POST",
        "HEAD" => "HEAD",
        "OPTIONS" => "OPTIONS",
        _ => "__other__",
    }
}
