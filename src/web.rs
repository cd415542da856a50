//! HTTP surface: `AppState`, router assembly, and the middleware stack.
//!
//! Grounded in `start_web_server`/`AppState` (`web.rs`): a CORS layer plus
//! two `middleware::from_fn` layers (error capture to Sentry, then request
//! logging). The `request_logging_middleware` shape is carried forward as
//! [`crate::observability::audit_middleware`], which logs the same
//! started/completed fields plus cache-outcome and bbox popularity. Static
//! asset embedding (`include_dir`/`mime_guess`) is a map-client concern this
//! crate never serves, so it's dropped rather than carried forward unused.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::actions;
use crate::catalog_repo::PgPool;
use crate::config::NimbusConfig;
use crate::observability::{self, BboxStatsCounter};
use crate::services::streamline::StreamlineService;
use crate::services::vector::WindVectorService;
use crate::services::volume::VolumePackService;

/// Per-source compute services: each of `ecmwf`/`cldas`/`town_forecast` gets
/// its own [`crate::asset_resolver::AssetResolver`] (and therefore its own
/// data root), but all sources share one catalog pool and one cache.
#[derive(Clone)]
pub struct SourceServices {
    pub vector: Arc<WindVectorService>,
    pub streamline: Arc<StreamlineService>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<NimbusConfig>,
    pub pool: PgPool,
    pub sources: Arc<HashMap<String, SourceServices>>,
    pub volume: Arc<VolumePackService>,
    pub bbox_stats: Arc<BboxStatsCounter>,
}

impl AppState {
    pub fn source(&self, name: &str) -> Option<&SourceServices> {
        self.sources.get(name)
    }
}

/// Captures HTTP 5xx responses to Sentry, tagging the method/path/status the
/// way `web.rs`'s `sentry_error_middleware` does.
async fn sentry_error_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    if response.status().is_server_error() {
        let status = response.status();
        tracing::error!("HTTP {} error on {} {}", status.as_u16(), method, uri);

        sentry::configure_scope(|scope| {
            scope.set_tag("http.method", method.as_str());
            scope.set_tag("http.url", uri.to_string());
            scope.set_tag("http.status_code", status.as_u16().to_string());
        });

        sentry::capture_message(
            &format!("HTTP {} error on {} {}", status.as_u16(), method, uri),
            sentry::Level::Error,
        );
    }

    response
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

fn build_router(state: AppState) -> Router {
    let vector_router = Router::new()
        .route(
            "/{source}/{run}/wind/{level}/{time}",
            axum::routing::get(actions::vector::get_wind_vectors),
        )
        .route(
            "/{source}/{run}/wind/{level}/{time}/prewarm",
            axum::routing::post(actions::vector::prewarm_wind_vectors),
        )
        .route(
            "/{source}/{run}/wind/{level}/{time}/streamlines",
            axum::routing::get(actions::vector::get_streamlines),
        );

    let volume_router = Router::new()
        .route("/", axum::routing::get(actions::volume::get_volume))
        .route("/stats", axum::routing::get(actions::volume::get_volume_stats));

    Router::new()
        .nest("/vector", vector_router)
        .nest("/volume", volume_router)
        .fallback(not_found)
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            observability::audit_middleware,
        ))
        .layer(middleware::from_fn(sentry_error_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Binds and serves the application router until the process is signaled to
/// shut down.
pub async fn start_web_server(state: AppState) -> Result<()> {
    let server_config = state.config.server();
    let app = build_router(state);

    let addr = format!("{}:{}", server_config.interface, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "web server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
