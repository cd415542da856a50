//! Cloud-density volume-pack and popularity-stats handlers.

use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::bbox::BBox3D;
use crate::errors::CoreError;
use crate::metrics as nimbus_metrics;
use crate::observability::CacheHitMarker;
use crate::services::vector;
use crate::services::volume::{VolumePackService, VolumeRequest};
use crate::time_keys;
use crate::web::AppState;

const DEFAULT_LAYER: &str = "cldas";

#[derive(Debug, Deserialize)]
pub struct VolumeQuery {
    pub layer: Option<String>,
    pub bbox: String,
    pub levels: String,
    pub res_m: f64,
    pub valid_time: Option<String>,
}

/// `GET /volume`
pub async fn get_volume(Query(query): Query<VolumeQuery>, State(state): State<AppState>) -> Response {
    let result = handle_volume(&query, &state).await;
    match result {
        Ok((body, cache_outcome)) => {
            nimbus_metrics::record_endpoint_outcome("volume", true);
            nimbus_metrics::record_cache_outcome(cache_outcome);

            let etag = vector::etag_for(&body);
            let mut headers = HeaderMap::new();
            headers.insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            headers.insert(
                axum::http::header::ETAG,
                HeaderValue::from_str(&etag).unwrap_or(HeaderValue::from_static("")),
            );
            let cache_control = if VolumePackService::exceeds_cacheable_size(&body) {
                "no-store"
            } else {
                "public, max-age=60, stale-while-revalidate=600"
            };
            headers.insert(
                axum::http::header::CACHE_CONTROL,
                HeaderValue::from_static(cache_control),
            );

            let mut response = (StatusCode::OK, headers, body).into_response();
            response.extensions_mut().insert(CacheHitMarker(cache_outcome));
            response
        }
        Err(err) => {
            nimbus_metrics::record_endpoint_outcome("volume", false);
            err.into_response()
        }
    }
}

/// Rejects non-numeric level tokens and normalizes integral ones so a
/// token like `"300.0"` resolves to the same asset as `"300"`.
fn parse_level_token(raw: &str) -> Result<String, CoreError> {
    let value: f64 = raw
        .parse()
        .map_err(|_| CoreError::InvalidRequest(format!("level {raw:?} is not numeric")))?;
    if !value.is_finite() {
        return Err(CoreError::InvalidRequest(format!("level {raw:?} is not numeric")));
    }
    if value.fract() == 0.0 {
        Ok((value as i64).to_string())
    } else {
        Ok(value.to_string())
    }
}

async fn handle_volume(
    query: &VolumeQuery,
    state: &AppState,
) -> Result<(Vec<u8>, crate::cache::CacheOutcome), CoreError> {
    let bbox = BBox3D::parse(&query.bbox)?;
    let levels: Vec<String> = query
        .levels
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_level_token)
        .collect::<Result<Vec<_>, _>>()?;
    let valid_time = query
        .valid_time
        .as_deref()
        .map(|raw| time_keys::parse_time(raw, "valid_time"))
        .transpose()
        .map_err(CoreError::InvalidRequest)?;

    let req = VolumeRequest {
        layer: query.layer.clone().unwrap_or_else(|| DEFAULT_LAYER.to_string()),
        bbox,
        levels,
        res_m: query.res_m,
        valid_time,
    };

    let started = Instant::now();
    let result = state.volume.get_volume(req).await;
    nimbus_metrics::record_compute_duration("volume", started.elapsed().as_secs_f64() * 1000.0);
    result
}

/// `GET /volume/stats`: the bbox buckets with the most requests in the
/// process's lifetime, used to pick prewarm candidates.
pub async fn get_volume_stats(State(state): State<AppState>) -> Response {
    nimbus_metrics::record_endpoint_outcome("volume_stats", true);
    let top = state.bbox_stats.top_k(20);
    axum::Json(serde_json::json!({
        "top": top.into_iter().map(|(bbox, count)| serde_json::json!({
            "bbox_bucket": bbox,
            "count": count,
        })).collect::<Vec<_>>(),
    }))
    .into_response()
}
