//! Prometheus metrics for the skycat daemon.
//!
//! Counters cover solve requests, admission denials, workflow transitions,
//! monitor polls, reaping and catalog matching.
//!
//! The `/metrics` endpoint is unauthenticated; restrict it to the scraper's
//! network when the daemon is reachable from outside.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static SOLVE_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "skycat_solve_requests_total",
            "Solve requests by outcome (submitted, queued, already_started, error)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static ADMISSION_DENIED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "skycat_admission_denied_total",
            "Submissions turned away by the admission gate",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static WORKFLOW_TRANSITIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "skycat_workflow_transitions_total",
            "Astrometry status transitions by target status",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

pub static MONITOR_POLLS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "skycat_monitor_polls_total",
        "Monitor steps executed against the solver",
    )
    .expect("metric creation failed")
});

pub static IMAGES_REAPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "skycat_images_reaped_total",
        "In-flight images forced to FAILED by the reaper",
    )
    .expect("metric creation failed")
});

pub static MATCHES_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "skycat_matches_written_total",
        "Automatic catalog matches written",
    )
    .expect("metric creation failed")
});

pub static CATALOG_QUERY_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "skycat_catalog_query_failures_total",
            "Catalog radius queries that failed during matching",
        ),
        &["catalog"],
    )
    .expect("metric creation failed")
});

pub static TASKS_PANICKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "skycat_tasks_panicked_total",
        "Workflow task steps that panicked",
    )
    .expect("metric creation failed")
});

pub static MATCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "skycat_match_duration_seconds",
            "Time taken to match one image against the catalogs",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static WORKERS_BUSY: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "skycat_workers_busy",
        "Worker slots currently executing a task step",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(SOLVE_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ADMISSION_DENIED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(WORKFLOW_TRANSITIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MONITOR_POLLS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(IMAGES_REAPED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MATCHES_WRITTEN.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CATALOG_QUERY_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TASKS_PANICKED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MATCH_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(WORKERS_BUSY.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a status transition.
pub fn record_transition(status: skycat_core::AstrometryStatus) {
    WORKFLOW_TRANSITIONS
        .with_label_values(&[status.as_str()])
        .inc();
}
