//! Tracing subscriber and Sentry initialization.
//!
//! Grounded in the `sentry::configure_scope`/`capture_message` usage in
//! `web.rs` (error capture at the HTTP boundary) and its
//! `tracing_subscriber` setup conventions; `telemetry.rs` there is an
//! OpenTelemetry scaffold gated behind a crate this project doesn't carry,
//! so it isn't reused directly.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a global `tracing` subscriber: `RUST_LOG`-controlled filtering
/// (defaulting to `info` with this crate at `debug`), formatted output, and
/// a Sentry layer so `tracing::error!` spans also reach Sentry breadcrumbs.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nimbus=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();
}

/// Initializes the Sentry client when `SENTRY_DSN` is set, returning the
/// guard the caller must hold for the process lifetime (dropping it flushes
/// pending events). Returns `None` when no DSN is configured, which is the
/// expected case in development.
pub fn init_sentry(env: &str) -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok()?;
    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            environment: Some(env.to_string().into()),
            release: sentry::release_name!(),
            traces_sample_rate: 0.1,
            ..Default::default()
        },
    ));
    tracing::info!(env, "sentry initialized");
    Some(guard)
}
