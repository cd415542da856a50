//! WindVectorService: bbox+stride point clouds over a wind-component pair.
//!
//! Grounded in `get_ecmwf_wind_vectors` (`routers/vector.py`): same pipeline
//! shape (parse -> fingerprint -> cache.get_or_compute -> encode), the same
//! accepted component-name pairs, and the same point-count ceiling.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::asset_resolver::AssetResolver;
use crate::bbox::BBox2D;
use crate::cache::{CacheBytes, CacheOutcome};
use crate::dataset;
use crate::errors::CoreError;
use crate::fingerprint;
use crate::grid::{GridAxis, LongitudeConvention};
use crate::grid_sampler::{select_lat_indices, select_lon_indices};
use crate::time_keys::{self, LevelKey};

use super::MAX_VECTOR_POINTS;

#[derive(Debug, Clone)]
pub struct WindVectorRequest {
    pub source: String,
    pub run: DateTime<Utc>,
    pub level: LevelKey,
    pub time: DateTime<Utc>,
    pub bbox: Option<BBox2D>,
    pub stride: usize,
}

impl WindVectorRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(1..=256).contains(&self.stride) {
            return Err(CoreError::InvalidRequest(
                "stride must be in 1..=256".to_string(),
            ));
        }
        Ok(())
    }

    fn fingerprint_value(&self) -> serde_json::Value {
        json!({
            "source": self.source,
            "run": time_keys::iso_z(self.run),
            "time": time_keys::iso_z(self.time),
            "level": self.level.as_str(),
            "bbox": self.bbox.map(|b| json!([b.min_lon, b.min_lat, b.max_lon, b.max_lat])),
            "stride": self.stride,
        })
    }
}

#[derive(Serialize)]
struct WindVectorResponse {
    u: Vec<Option<f64>>,
    v: Vec<Option<f64>>,
    lat: Vec<f64>,
    lon: Vec<f64>,
}

pub struct WindVectorService {
    resolver: Arc<AssetResolver>,
    cache: Arc<CacheBytes>,
}

impl WindVectorService {
    pub fn new(resolver: Arc<AssetResolver>, cache: Arc<CacheBytes>) -> Self {
        WindVectorService { resolver, cache }
    }

    pub async fn get_wind_vectors(
        &self,
        req: WindVectorRequest,
    ) -> Result<(Vec<u8>, CacheOutcome), CoreError> {
        req.validate()?;
        let key_prefix = key_prefix_for(&req);

        let resolver = self.resolver.clone();
        self.cache
            .get_or_compute(&key_prefix, move || async move {
                let req = req;
                tokio::task::spawn_blocking(move || compute_wind_vectors(&resolver, &req))
                    .await
                    .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?
            })
            .await
    }

    /// Forces a recompute: drops the existing fresh/stale bodies, then runs
    /// the normal `get_or_compute` path so the cache ends up holding a fresh
    /// entry. Used by the editor-gated prewarm endpoint.
    pub async fn prewarm(&self, req: WindVectorRequest) -> Result<CacheOutcome, CoreError> {
        req.validate()?;
        let key_prefix = key_prefix_for(&req);
        if let Err(err) = self.cache.invalidate(&key_prefix).await {
            tracing::warn!(error = %err, key_prefix, "prewarm invalidate failed, recomputing anyway");
        }
        let (_, outcome) = self.get_wind_vectors(req).await?;
        Ok(outcome)
    }
}

fn key_prefix_for(req: &WindVectorRequest) -> String {
    let fp = fingerprint::fingerprint(&req.fingerprint_value());
    format!(
        "vector:{}:wind:run={}:{}",
        req.source,
        time_keys::time_key(req.run),
        fp
    )
}

fn compute_wind_vectors(
    resolver: &AssetResolver,
    req: &WindVectorRequest,
) -> Result<Vec<u8>, CoreError> {
    let asset = resolver.resolve(
        &req.source,
        req.run,
        req.time,
        "wind",
        req.level.as_str(),
    )?;

    let handle = dataset::open(asset.as_path())?;
    let axes = handle.axes()?;
    let variable_names = handle.variable_names()?;
    let (u_name, v_name) = dataset::resolve_wind_components(&variable_names)
        .ok_or_else(|| CoreError::NotFound("no accepted wind component pair present".to_string()))?;

    let time_index = dataset::resolve_time_index(&axes.time, req.time)?;
    let level_index = match &req.level {
        LevelKey::Surface => dataset::resolve_surface_level_index(&axes.level, &axes.level_attrs)?,
        LevelKey::Numeric { value, .. } => dataset::resolve_level_index(&axes.level, *value)?,
    };

    let mut u_plane = handle.read_plane(u_name, time_index, level_index)?;
    let mut v_plane = handle.read_plane(v_name, time_index, level_index)?;

    let (lat_axis, lat_order) =
        GridAxis::normalize(&axes.lat).map_err(CoreError::InvalidRequest)?;
    let (lon_axis, lon_order) =
        GridAxis::normalize(&axes.lon).map_err(CoreError::InvalidRequest)?;
    u_plane.permute_axis(0, &lat_order);
    u_plane.permute_axis(1, &lon_order);
    v_plane.permute_axis(0, &lat_order);
    v_plane.permute_axis(1, &lon_order);

    let convention = LongitudeConvention::detect(lon_axis.values());
    let (min_lat, max_lat, min_lon, max_lon) = match req.bbox {
        Some(bbox) => (bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon),
        None => (
            lat_axis.min().unwrap_or(-90.0),
            lat_axis.max().unwrap_or(90.0),
            0.0,
            360.0,
        ),
    };

    let lat_sel = select_lat_indices(&lat_axis, min_lat, max_lat, req.stride);
    let lon_sel = select_lon_indices(&lon_axis, convention, min_lon, max_lon, req.stride);

    let point_count = lat_sel.indices.len() * lon_sel.indices.len();
    if point_count > MAX_VECTOR_POINTS {
        return Err(CoreError::InvalidRequest(
            "reduce bbox or increase stride".to_string(),
        ));
    }

    let mut u = Vec::with_capacity(point_count);
    let mut v = Vec::with_capacity(point_count);
    let mut lat = Vec::with_capacity(point_count);
    let mut lon = Vec::with_capacity(point_count);

    for &i in &lat_sel.indices {
        for &j in &lon_sel.indices {
            u.push(flatten_nan(*u_plane.get(i, j)));
            v.push(flatten_nan(*v_plane.get(i, j)));
            lat.push(lat_axis.values()[i]);
            lon.push(lon_axis.values()[j]);
        }
    }

    let response = WindVectorResponse { u, v, lat, lon };
    serde_json::to_vec(&response).map_err(|err| CoreError::internal(anyhow::anyhow!(err)))
}

fn flatten_nan(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

/// SHA-256 ETag over the body, per the `"sha256-<hex>"` convention.
pub fn etag_for(body: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("\"sha256-{:x}\"", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_is_stable_for_identical_bodies() {
        assert_eq!(etag_for(b"hello"), etag_for(b"hello"));
        assert_ne!(etag_for(b"hello"), etag_for(b"world"));
    }

    #[test]
    fn validate_rejects_out_of_range_stride() {
        let req = WindVectorRequest {
            source: "ecmwf".to_string(),
            run: Utc::now(),
            level: LevelKey::Surface,
            time: Utc::now(),
            bbox: None,
            stride: 0,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn fingerprint_is_stable_across_clones() {
        let req = WindVectorRequest {
            source: "ecmwf".to_string(),
            run: time_keys::parse_time("20260101T000000Z", "run").unwrap(),
            level: LevelKey::Surface,
            time: time_keys::parse_time("20260101T000000Z", "time").unwrap(),
            bbox: None,
            stride: 1,
        };
        let a = fingerprint::fingerprint(&req.fingerprint_value());
        let b = fingerprint::fingerprint(&req.clone().fingerprint_value());
        assert_eq!(a, b);
    }
}
