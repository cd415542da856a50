//! Wind vector point-cloud, streamline, and prewarm handlers.
//!
//! Grounded in `get_coverage_hexes` (`actions/coverage.rs`): `Query`/`Path`/
//! `State` extraction, a `metrics::counter!` per outcome, and a plain `impl
//! IntoResponse` return rather than a generic response wrapper.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::EditorCapability;
use crate::bbox::BBox2D;
use crate::errors::CoreError;
use crate::metrics as nimbus_metrics;
use crate::observability::CacheHitMarker;
use crate::services::streamline::StreamlineRequest;
use crate::services::vector::{self, WindVectorRequest};
use crate::time_keys::{self, LevelKey};
use crate::web::AppState;

/// Common path segments for every route under `/vector/{source}/{run}/wind/{level}/{time}`.
#[derive(Debug, Deserialize)]
pub struct WindPathParams {
    pub source: String,
    pub run: String,
    pub level: String,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct VectorQuery {
    pub bbox: Option<String>,
    pub stride: Option<usize>,
}

/// Body for `POST .../prewarm`: up to 50 bboxes to warm independently.
#[derive(Debug, Deserialize)]
pub struct PrewarmRequest {
    pub bboxes: Vec<String>,
    pub stride: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PrewarmResult {
    bbox: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct PrewarmResponse {
    results: Vec<PrewarmResult>,
}

const MAX_PREWARM_BBOXES: usize = 50;

#[derive(Debug, Deserialize)]
pub struct StreamlineQuery {
    pub bbox: String,
    pub stride: Option<usize>,
    pub step_km: Option<f64>,
    pub max_steps: Option<usize>,
    pub min_speed: Option<f64>,
}

fn parse_wind_path(params: &WindPathParams) -> Result<(chrono::DateTime<chrono::Utc>, LevelKey, chrono::DateTime<chrono::Utc>), CoreError> {
    let run = time_keys::parse_time(&params.run, "run").map_err(CoreError::InvalidRequest)?;
    let level = LevelKey::parse(&params.level).map_err(CoreError::InvalidRequest)?;
    let time = time_keys::parse_time(&params.time, "time").map_err(CoreError::InvalidRequest)?;
    Ok((run, level, time))
}

fn lookup_source<'a>(state: &'a AppState, source: &str) -> Result<&'a crate::web::SourceServices, CoreError> {
    state
        .source(source)
        .ok_or_else(|| CoreError::NotFound(format!("unknown data source: {source}")))
}

/// `GET /vector/{source}/{run}/wind/{level}/{time}`
pub async fn get_wind_vectors(
    Path(params): Path<WindPathParams>,
    Query(query): Query<VectorQuery>,
    State(state): State<AppState>,
) -> Response {
    let outcome = handle_wind_vectors(&params, &query, &state).await;
    respond(outcome, "vector")
}

async fn handle_wind_vectors(
    params: &WindPathParams,
    query: &VectorQuery,
    state: &AppState,
) -> Result<(Vec<u8>, crate::cache::CacheOutcome), CoreError> {
    let (run, level, time) = parse_wind_path(params)?;
    let bbox = query
        .bbox
        .as_deref()
        .map(BBox2D::parse)
        .transpose()?;

    let req = WindVectorRequest {
        source: params.source.clone(),
        run,
        level,
        time,
        bbox,
        stride: query.stride.unwrap_or(1),
    };

    let services = lookup_source(state, &params.source)?;
    let started = Instant::now();
    let result = services.vector.get_wind_vectors(req).await;
    nimbus_metrics::record_compute_duration("vector", started.elapsed().as_secs_f64() * 1000.0);
    result
}

/// `POST /vector/{source}/{run}/wind/{level}/{time}/prewarm`
///
/// Accepts up to 50 bboxes and warms each independently, returning a
/// per-bbox cache status rather than a single aggregate result.
pub async fn prewarm_wind_vectors(
    _editor: EditorCapability,
    Path(params): Path<WindPathParams>,
    State(state): State<AppState>,
    Json(body): Json<PrewarmRequest>,
) -> Response {
    let outcome = handle_prewarm(&params, &body, &state).await;
    match outcome {
        Ok(results) => {
            nimbus_metrics::record_endpoint_outcome("prewarm", true);
            Json(PrewarmResponse { results }).into_response()
        }
        Err(err) => {
            nimbus_metrics::record_endpoint_outcome("prewarm", false);
            err.into_response()
        }
    }
}

async fn handle_prewarm(
    params: &WindPathParams,
    body: &PrewarmRequest,
    state: &AppState,
) -> Result<Vec<PrewarmResult>, CoreError> {
    if body.bboxes.is_empty() {
        return Err(CoreError::InvalidRequest("bboxes must not be empty".to_string()));
    }
    if body.bboxes.len() > MAX_PREWARM_BBOXES {
        return Err(CoreError::InvalidRequest(format!(
            "at most {MAX_PREWARM_BBOXES} bboxes per prewarm request"
        )));
    }

    let (run, level, time) = parse_wind_path(params)?;
    let services = lookup_source(state, &params.source)?;
    let stride = body.stride.unwrap_or(1);

    let mut results = Vec::with_capacity(body.bboxes.len());
    for raw_bbox in &body.bboxes {
        let bbox = Some(BBox2D::parse(raw_bbox)?);
        let req = WindVectorRequest {
            source: params.source.clone(),
            run,
            level,
            time,
            bbox,
            stride,
        };
        let cache_outcome = services.vector.prewarm(req).await?;
        nimbus_metrics::record_cache_outcome(cache_outcome);
        results.push(PrewarmResult {
            bbox: raw_bbox.clone(),
            status: cache_outcome.as_str(),
        });
    }

    Ok(results)
}

/// `GET /vector/{source}/{run}/wind/{level}/{time}/streamlines`
pub async fn get_streamlines(
    Path(params): Path<WindPathParams>,
    Query(query): Query<StreamlineQuery>,
    State(state): State<AppState>,
) -> Response {
    let outcome = handle_streamlines(&params, &query, &state).await;
    respond(outcome, "streamlines")
}

async fn handle_streamlines(
    params: &WindPathParams,
    query: &StreamlineQuery,
    state: &AppState,
) -> Result<(Vec<u8>, crate::cache::CacheOutcome), CoreError> {
    let (run, level, time) = parse_wind_path(params)?;
    let bbox = BBox2D::parse(&query.bbox)?;

    let req = StreamlineRequest {
        source: params.source.clone(),
        run,
        level,
        time,
        bbox,
        stride: query.stride.unwrap_or(4),
        step_km: query.step_km.unwrap_or(10.0),
        max_steps: query.max_steps.unwrap_or(200),
        min_speed: query.min_speed.unwrap_or(0.5),
    };

    let services = lookup_source(state, &params.source)?;
    let started = Instant::now();
    let outcome = services.streamline.get_streamlines(req).await;
    nimbus_metrics::record_compute_duration("streamlines", started.elapsed().as_secs_f64() * 1000.0);
    outcome
}

/// Shared success/error -> `Response` translation for the GET endpoints:
/// sets `etag`/`cache-control`/`content-type`, stamps the cache-outcome
/// marker for the audit middleware, and records per-endpoint metrics.
fn respond(
    result: Result<(Vec<u8>, crate::cache::CacheOutcome), CoreError>,
    endpoint: &'static str,
) -> Response {
    match result {
        Ok((body, cache_outcome)) => {
            nimbus_metrics::record_endpoint_outcome(endpoint, true);
            nimbus_metrics::record_cache_outcome(cache_outcome);

            let etag = vector::etag_for(&body);
            let mut headers = HeaderMap::new();
            headers.insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            headers.insert(
                axum::http::header::ETAG,
                HeaderValue::from_str(&etag).unwrap_or(HeaderValue::from_static("")),
            );
            headers.insert(
                axum::http::header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=60"),
            );

            let mut response = (StatusCode::OK, headers, body).into_response();
            response.extensions_mut().insert(CacheHitMarker(cache_outcome));
            response
        }
        Err(err) => {
            nimbus_metrics::record_endpoint_outcome(endpoint, false);
            err.into_response()
        }
    }
}
