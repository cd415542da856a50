//! StreamlineService: RK4 integration of wind streamlines through a (u, v)
//! field, seeded on the bbox+stride grid.
//!
//! Grounded in the same `routers/vector.py` dataset-access path as
//! [`super::vector`], with integration logic specified directly (the
//! original does not have a streamline endpoint; this is a supplemented
//! feature built the way the vector endpoint reads its data).

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
use crate::grid::{GridAxis, GridSlab, LongitudeConvention};
use crate::grid_sampler::{bilinear_sample, select_lat_indices, select_lon_indices};
use crate::time_keys::{self, LevelKey};

use super::METERS_PER_DEG_LAT;

const POLAR_EPSILON_DEG: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct StreamlineRequest {
    pub source: String,
    pub run: DateTime<Utc>,
    pub level: LevelKey,
    pub time: DateTime<Utc>,
    pub bbox: BBox2D,
    pub stride: usize,
    pub step_km: f64,
    pub max_steps: usize,
    pub min_speed: f64,
}

impl StreamlineRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(1..=256).contains(&self.stride) {
            return Err(CoreError::InvalidRequest("stride must be in 1..=256".to_string()));
        }
        if self.step_km <= 0.0 || !self.step_km.is_finite() {
            return Err(CoreError::InvalidRequest("step_km must be positive".to_string()));
        }
        if self.max_steps == 0 {
            return Err(CoreError::InvalidRequest("max_steps must be positive".to_string()));
        }
        Ok(())
    }

    fn fingerprint_value(&self) -> serde_json::Value {
        json!({
            "source": self.source,
            "run": time_keys::iso_z(self.run),
            "time": time_keys::iso_z(self.time),
            "level": self.level.as_str(),
            "bbox": [self.bbox.min_lon, self.bbox.min_lat, self.bbox.max_lon, self.bbox.max_lat],
            "stride": self.stride,
            "step_km": self.step_km,
            "max_steps": self.max_steps,
            "min_speed": self.min_speed,
        })
    }
}

#[derive(Serialize)]
struct Polyline {
    lat: Vec<f64>,
    lon: Vec<f64>,
}

#[derive(Serialize)]
struct StreamlineResponse {
    streamlines: Vec<Polyline>,
}

pub struct StreamlineService {
    resolver: Arc<AssetResolver>,
    cache: Arc<CacheBytes>,
}

impl StreamlineService {
    pub fn new(resolver: Arc<AssetResolver>, cache: Arc<CacheBytes>) -> Self {
        StreamlineService { resolver, cache }
    }

    pub async fn get_streamlines(
        &self,
        req: StreamlineRequest,
    ) -> Result<(Vec<u8>, CacheOutcome), CoreError> {
        req.validate()?;

        let fp = fingerprint::fingerprint(&req.fingerprint_value());
        let key_prefix = format!(
            "streamlines:{}:wind:run={}:{}",
            req.source,
            time_keys::time_key(req.run),
            fp
        );

        let resolver = self.resolver.clone();
        self.cache
            .get_or_compute(&key_prefix, move || async move {
                let req = req;
                tokio::task::spawn_blocking(move || compute_streamlines(&resolver, &req))
                    .await
                    .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?
            })
            .await
    }
}

fn compute_streamlines(
    resolver: &AssetResolver,
    req: &StreamlineRequest,
) -> Result<Vec<u8>, CoreError> {
    let asset = resolver.resolve(&req.source, req.run, req.time, "wind", req.level.as_str())?;

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

    let (lat_axis, lat_order) = GridAxis::normalize(&axes.lat).map_err(CoreError::InvalidRequest)?;
    let (lon_axis, lon_order) = GridAxis::normalize(&axes.lon).map_err(CoreError::InvalidRequest)?;
    u_plane.permute_axis(0, &lat_order);
    u_plane.permute_axis(1, &lon_order);
    v_plane.permute_axis(0, &lat_order);
    v_plane.permute_axis(1, &lon_order);

    let u_slab = GridSlab::new(lat_axis.clone(), lon_axis.clone(), u_plane.data.clone())
        .map_err(CoreError::InvalidRequest)?;
    let v_slab = GridSlab::new(lat_axis.clone(), lon_axis.clone(), v_plane.data.clone())
        .map_err(CoreError::InvalidRequest)?;

    let convention = LongitudeConvention::detect(lon_axis.values());
    let lat_sel = select_lat_indices(&lat_axis, req.bbox.min_lat, req.bbox.max_lat, req.stride);
    let lon_sel = select_lon_indices(&lon_axis, convention, req.bbox.min_lon, req.bbox.max_lon, req.stride);

    let mut streamlines = Vec::new();
    for &i in &lat_sel.indices {
        for &j in &lon_sel.indices {
            let seed_lat = lat_axis.values()[i];
            let seed_lon = lon_axis.values()[j];
            if let Some(polyline) = integrate_streamline(
                &u_slab,
                &v_slab,
                convention,
                &req.bbox,
                seed_lat,
                seed_lon,
                req.step_km,
                req.max_steps,
                req.min_speed,
            ) {
                streamlines.push(polyline);
            }
        }
    }

    let response = StreamlineResponse { streamlines };
    serde_json::to_vec(&response).map_err(|err| CoreError::internal(anyhow::anyhow!(err)))
}

#[allow(clippy::too_many_arguments)]
fn integrate_streamline(
    u_slab: &GridSlab,
    v_slab: &GridSlab,
    convention: LongitudeConvention,
    bbox: &BBox2D,
    seed_lat: f64,
    seed_lon: f64,
    step_km: f64,
    max_steps: usize,
    min_speed: f64,
) -> Option<Polyline> {
    let step_m = step_km * 1000.0;
    let mut lat = seed_lat;
    let mut lon = seed_lon;
    let mut lats = vec![lat];
    let mut lons = vec![lon];

    for _ in 0..max_steps {
        let Some((dlat, dlon)) = rk4_step(u_slab, v_slab, lat, lon, step_m, min_speed) else {
            break;
        };

        lat += dlat;
        lon += dlon;

        if lat.abs() >= 90.0 - POLAR_EPSILON_DEG {
            break;
        }
        if !point_in_bbox(convention, bbox, lat, lon) {
            break;
        }

        lats.push(lat);
        lons.push(lon);
    }

    if lats.len() >= 2 {
        Some(Polyline { lat: lats, lon: lons })
    } else {
        None
    }
}

/// One classical RK4 stage set, sampling `(u, v)` bilinearly at each stage
/// and converting the resulting velocity to a lat/lon delta for this step.
fn rk4_step(
    u_slab: &GridSlab,
    v_slab: &GridSlab,
    lat: f64,
    lon: f64,
    step_m: f64,
    min_speed: f64,
) -> Option<(f64, f64)> {
    let sample = |lat: f64, lon: f64| -> Option<(f64, f64)> {
        let u = bilinear_sample(u_slab, lat, lon);
        let v = bilinear_sample(v_slab, lat, lon);
        if u.is_nan() || v.is_nan() {
            return None;
        }
        let speed = (u * u + v * v).sqrt();
        if speed < min_speed {
            return None;
        }
        if lat.abs() >= 90.0 - POLAR_EPSILON_DEG {
            return None;
        }
        Some(velocity_to_degrees_per_step(u, v, lat, step_m))
    };

    let k1 = sample(lat, lon)?;
    let k2 = sample(lat + k1.0 / 2.0, lon + k1.1 / 2.0)?;
    let k3 = sample(lat + k2.0 / 2.0, lon + k2.1 / 2.0)?;
    let k4 = sample(lat + k3.0, lon + k3.1)?;

    let dlat = (k1.0 + 2.0 * k2.0 + 2.0 * k3.0 + k4.0) / 6.0;
    let dlon = (k1.1 + 2.0 * k2.1 + 2.0 * k3.1 + k4.1) / 6.0;
    Some((dlat, dlon))
}

fn velocity_to_degrees_per_step(u: f64, v: f64, lat: f64, step_m: f64) -> (f64, f64) {
    let lat_rad = lat.to_radians();
    let dlat = (v * step_m) / METERS_PER_DEG_LAT;
    let dlon = (u * step_m) / (METERS_PER_DEG_LAT * lat_rad.cos().max(1e-6));
    (dlat, dlon)
}

fn point_in_bbox(convention: LongitudeConvention, bbox: &BBox2D, lat: f64, lon: f64) -> bool {
    if lat < bbox.min_lat - 1e-6 || lat > bbox.max_lat + 1e-6 {
        return false;
    }
    let norm_lon = convention.normalize(lon);
    let lo = convention.normalize(bbox.min_lon);
    let hi = convention.normalize(bbox.max_lon);
    if lo <= hi {
        norm_lon >= lo - 1e-6 && norm_lon <= hi + 1e-6
    } else {
        norm_lon >= lo - 1e-6 || norm_lon <= hi + 1e-6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridAxis;

    fn uniform_eastward_field(n: usize) -> (GridSlab, GridSlab) {
        let lat: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let lon: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let lat_axis = GridAxis::from_ascending(lat).unwrap();
        let lon_axis = GridAxis::from_ascending(lon).unwrap();
        let u = vec![10.0; n * n];
        let v = vec![0.0; n * n];
        (
            GridSlab::new(lat_axis.clone(), lon_axis.clone(), u).unwrap(),
            GridSlab::new(lat_axis, lon_axis, v).unwrap(),
        )
    }

    #[test]
    fn eastward_flow_produces_strictly_increasing_longitude() {
        let (u_slab, v_slab) = uniform_eastward_field(3);
        let bbox = BBox2D {
            min_lon: 0.0,
            min_lat: 0.0,
            max_lon: 2.0,
            max_lat: 2.0,
        };
        let polyline = integrate_streamline(
            &u_slab,
            &v_slab,
            LongitudeConvention::SignedDegrees,
            &bbox,
            1.0,
            0.0,
            10.0,
            25,
            0.1,
        )
        .unwrap();
        for w in polyline.lon.windows(2) {
            assert!(w[1] > w[0]);
        }
        for &lat in &polyline.lat {
            assert!((0.0..=2.0).contains(&lat) || (lat - 0.0).abs() < 1e-6);
        }
    }

    #[test]
    fn stationary_field_yields_no_polyline() {
        let lat_axis = GridAxis::from_ascending(vec![0.0, 1.0]).unwrap();
        let lon_axis = GridAxis::from_ascending(vec![0.0, 1.0]).unwrap();
        let u_slab = GridSlab::new(lat_axis.clone(), lon_axis.clone(), vec![0.0; 4]).unwrap();
        let v_slab = GridSlab::new(lat_axis, lon_axis, vec![0.0; 4]).unwrap();
        let bbox = BBox2D {
            min_lon: 0.0,
            min_lat: 0.0,
            max_lon: 1.0,
            max_lat: 1.0,
        };
        let result = integrate_streamline(
            &u_slab,
            &v_slab,
            LongitudeConvention::SignedDegrees,
            &bbox,
            0.0,
            0.0,
            10.0,
            5,
            0.1,
        );
        assert!(result.is_none());
    }
}
