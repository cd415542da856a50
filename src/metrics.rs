//! Prometheus metrics: initialization, the dedicated metrics server, and the
//! recording helpers the services and actions call into.
//!
//! Grounded in `init_metrics`/`start_metrics_server` (`metrics.rs`): a
//! `PrometheusBuilder` with explicit histogram buckets installed as the
//! global recorder, served on its own port separate from the request port.
//! The `pprof`-backed profiling handlers and `/proc/self/status` memory
//! gauges found alongside that pattern depend on crates this crate doesn't
//! carry, so they're dropped here; the always-visible zero-init pattern for
//! counters survives.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::cache::CacheOutcome;

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Installs the global Prometheus recorder with histogram buckets tuned for
/// request and compute durations, and returns the handle `/metrics` renders
/// from. Call once at startup before any `metrics::counter!`/`histogram!`
/// call; hand the returned handle to [`start_metrics_server`].
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http.request.duration_ms".to_string()),
            DURATION_BUCKETS,
        )
        .context("failed to set http.request.duration_ms buckets")?
        .set_buckets_for_metric(
            Matcher::Full("compute.duration_ms".to_string()),
            DURATION_BUCKETS,
        )
        .context("failed to set compute.duration_ms buckets")?
        .install_recorder()
        .context("failed to install prometheus recorder")?;

    initialize_endpoint_metrics();
    Ok(handle)
}

/// Touches every endpoint's request/success/error counters at zero so they
/// appear in `/metrics` scrapes before the first request, matching
/// `metrics.rs`'s zero-init pattern for always-visible series.
fn initialize_endpoint_metrics() {
    for endpoint in ["vector", "streamlines", "volume", "prewarm", "volume_stats"] {
        metrics::counter!("endpoint.requests_total", "endpoint" => endpoint).increment(0);
        metrics::counter!("endpoint.success_total", "endpoint" => endpoint).increment(0);
        metrics::counter!("endpoint.errors_total", "endpoint" => endpoint).increment(0);
    }
    for outcome in ["fresh", "stale", "computed"] {
        metrics::counter!("cache.outcome_total", "outcome" => outcome).increment(0);
    }
}

/// Serves `/metrics` on its own port, separate from the application router so
/// scraping never competes with request traffic for the same listener.
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) -> Result<()> {
    use axum::{Router, routing::get};

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    tracing::info!(%addr, "metrics server listening");
    axum::serve(listener, app)
        .await
        .context("metrics server exited")?;
    Ok(())
}

/// Records a per-endpoint request outcome: one `requests_total` increment,
/// plus `success_total` or `errors_total` depending on whether the handler
/// returned `Ok`.
pub fn record_endpoint_outcome(endpoint: &'static str, success: bool) {
    metrics::counter!("endpoint.requests_total", "endpoint" => endpoint).increment(1);
    if success {
        metrics::counter!("endpoint.success_total", "endpoint" => endpoint).increment(1);
    } else {
        metrics::counter!("endpoint.errors_total", "endpoint" => endpoint).increment(1);
    }
}

/// Records which tier of the cache state machine satisfied a request.
pub fn record_cache_outcome(outcome: CacheOutcome) {
    metrics::counter!("cache.outcome_total", "outcome" => outcome.as_str()).increment(1);
}

/// Records end-to-end compute/cache-lookup latency for one service call.
pub fn record_compute_duration(service: &'static str, duration_ms: f64) {
    metrics::histogram!("compute.duration_ms", "service" => service).record(duration_ms);
}

/// Records HTTP-layer request latency, independent of which service handled
/// it (used by the request-timing middleware, not the service layer).
pub fn record_http_duration(route: &'static str, duration_ms: f64) {
    metrics::histogram!("http.request.duration_ms", "route" => route).record(duration_ms);
}
