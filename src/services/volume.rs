//! VolumePackService: per-level slice resampling onto a common target grid,
//! stacked and encoded as a VOLP binary payload.
//!
//! Grounded in `get_volume` (`routes/volume.py`): `_target_grid`'s
//! ceil+cos(mean_lat) sizing, `_interp2d`'s lon-then-lat separated 1-D
//! interpolation, and the `"VOLP"` magic + JSON header + compressed cube
//! wire format.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::bbox::{BBox2D, BBox3D};
use crate::cache::{CacheBytes, CacheOutcome};
use crate::dataset;
use crate::errors::CoreError;
use crate::fingerprint;
use crate::grid::{GridAxis, LongitudeConvention};
use crate::grid_sampler::{bounding_slice_indices, interp_1d};
use crate::time_keys;

use super::{MAX_BBOX_AREA_DEG2, MAX_CACHEABLE_BYTES, MAX_OUTPUT_BYTES, METERS_PER_DEG_LAT, MIN_RES_M};

const VOLP_MAGIC: &[u8; 4] = b"VOLP";

#[derive(Debug, Clone)]
pub struct VolumeRequest {
    pub layer: String,
    pub bbox: BBox3D,
    pub levels: Vec<String>,
    pub res_m: f64,
    pub valid_time: Option<DateTime<Utc>>,
}

impl VolumeRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.levels.is_empty() {
            return Err(CoreError::InvalidRequest("levels must not be empty".to_string()));
        }
        if self.res_m < MIN_RES_M {
            return Err(CoreError::InvalidRequest(format!(
                "res must be >= {MIN_RES_M} m"
            )));
        }
        let area = self.bbox.horizontal.width_degrees() * self.bbox.horizontal.height_degrees();
        if area > MAX_BBOX_AREA_DEG2 {
            return Err(CoreError::InvalidRequest(format!(
                "bbox area {area} exceeds {MAX_BBOX_AREA_DEG2} deg2"
            )));
        }
        Ok(())
    }

    fn dedup_levels(&self) -> Vec<String> {
        fingerprint::dedupe_preserve_order(&self.levels)
    }

    fn fingerprint_value(&self, time_key: &str) -> serde_json::Value {
        let b = self.bbox.horizontal;
        json!({
            "layer": self.layer,
            "bbox": [b.min_lon, b.min_lat, b.max_lon, b.max_lat, self.bbox.bottom_m, self.bbox.top_m],
            "levels": self.dedup_levels(),
            "res_m": self.res_m,
            "time_key": time_key,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolpHeader {
    pub bbox: [f64; 4],
    pub levels: Vec<serde_json::Number>,
    pub variable: String,
    pub valid_time: String,
    pub res_m: f64,
    pub layer: String,
    pub scale: f64,
    pub offset: f64,
    pub dtype: String,
    pub shape: [usize; 3],
}

pub struct VolumePackService {
    data_root: PathBuf,
    cache: Arc<CacheBytes>,
}

impl VolumePackService {
    pub fn new(data_root: PathBuf, cache: Arc<CacheBytes>) -> Self {
        VolumePackService { data_root, cache }
    }

    pub async fn get_volume(&self, req: VolumeRequest) -> Result<(Vec<u8>, CacheOutcome), CoreError> {
        req.validate()?;

        let time_dir = resolve_time_dir(&self.data_root, &req.layer, req.valid_time)?;
        let time_key = time_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let fp = fingerprint::fingerprint(&req.fingerprint_value(&time_key));
        let key_prefix = format!("volume:{}:run={}:{}", req.layer, time_key, fp);
        let levels = req.dedup_levels();

        self.cache
            .get_or_compute(&key_prefix, move || async move {
                let req = req;
                let time_dir = time_dir;
                let time_key = time_key;
                let levels = levels;
                tokio::task::spawn_blocking(move || compute_volume(&time_dir, &req, &levels, &time_key))
                    .await
                    .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?
            })
            .await
    }

    /// Whether a computed payload should bypass the cache write, per the
    /// documented cacheable-size ceiling.
    pub fn exceeds_cacheable_size(bytes: &[u8]) -> bool {
        bytes.len() > MAX_CACHEABLE_BYTES
    }
}

fn resolve_time_dir(
    data_root: &Path,
    layer: &str,
    valid_time: Option<DateTime<Utc>>,
) -> Result<PathBuf, CoreError> {
    let layer_dir = data_root.join(layer);
    if !layer_dir.is_dir() {
        return Err(CoreError::NotFound(format!("unknown layer {layer}")));
    }

    if let Some(valid_time) = valid_time {
        let key = time_keys::time_key(valid_time);
        let dir = layer_dir.join(&key);
        if !dir.is_dir() {
            return Err(CoreError::NotFound(format!(
                "no volume directory for valid_time {key}"
            )));
        }
        return Ok(dir);
    }

    let mut candidates: Vec<String> = std::fs::read_dir(&layer_dir)
        .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| time_keys::parse_time_key(name).is_some())
        .collect();
    candidates.sort();

    candidates
        .pop()
        .map(|name| layer_dir.join(name))
        .ok_or_else(|| CoreError::NotFound(format!("no volume directories present under {layer}")))
}

fn compute_volume(
    time_dir: &Path,
    req: &VolumeRequest,
    levels: &[String],
    time_key: &str,
) -> Result<Vec<u8>, CoreError> {
    let bbox = req.bbox.horizontal;
    let (target_lat, target_lon) = target_grid(&bbox, req.res_m);
    let n_lat = target_lat.len();
    let n_lon = target_lon.len();

    let mut cube = Vec::with_capacity(levels.len() * n_lat * n_lon);
    let mut subgrid_point_count: Option<usize> = None;

    for level in levels {
        let slice_path = resolve_slice_path(time_dir, level)?;
        let handle = dataset::open(&slice_path)?;
        let axes = handle.axes()?;
        let mut plane = handle.read_plane("cloud_density", 0, 0)?;

        let (lat_axis, lat_order) = GridAxis::normalize(&axes.lat).map_err(CoreError::InvalidRequest)?;
        let (lon_axis, lon_order) = GridAxis::normalize(&axes.lon).map_err(CoreError::InvalidRequest)?;
        plane.permute_axis(0, &lat_order);
        plane.permute_axis(1, &lon_order);

        let convention = LongitudeConvention::detect(lon_axis.values());
        let norm_west = convention.normalize(bbox.min_lon);
        let norm_east = convention.normalize(bbox.max_lon);
        if norm_east <= norm_west {
            return Err(CoreError::InvalidRequest(
                "bbox crosses longitude seam".to_string(),
            ));
        }

        // A plain within-bounds selection would leave the target grid's own
        // endpoints (= bbox bounds) with no neighbor beyond them whenever the
        // bbox doesn't land exactly on source grid points; bracket instead so
        // `interp_1d`'s clamp at the far ends of the sub-axis is a no-op.
        let (lat_lo, lat_hi) = bounding_slice_indices(lat_axis.values(), bbox.min_lat, bbox.max_lat)
            .ok_or_else(|| CoreError::NotFound(format!("level {level} bbox selects no grid points")))?;
        let (lon_lo, lon_hi) = bounding_slice_indices(lon_axis.values(), norm_west, norm_east)
            .ok_or_else(|| CoreError::NotFound(format!("level {level} bbox selects no grid points")))?;

        let point_count = (lat_hi - lat_lo + 1) * (lon_hi - lon_lo + 1);
        if let Some(expected) = subgrid_point_count {
            if expected != point_count {
                return Err(CoreError::internal(anyhow::anyhow!(
                    "level {level} bounding-box subgrid point count {} disagrees with {}",
                    point_count,
                    expected
                )));
            }
        } else {
            subgrid_point_count = Some(point_count);
        }

        let lat_indices: Vec<usize> = (lat_lo..=lat_hi).collect();
        let lon_indices: Vec<usize> = (lon_lo..=lon_hi).collect();
        let sub_lat: Vec<f64> = lat_indices.iter().map(|&i| lat_axis.values()[i]).collect();
        let sub_lon: Vec<f64> = lon_indices.iter().map(|&i| lon_axis.values()[i]).collect();

        // Separated 1-D interpolation: longitude first, then latitude.
        let mut lon_interp = vec![0.0f64; sub_lat.len() * n_lon];
        for (row_idx, &lat_i) in lat_indices.iter().enumerate() {
            let row: Vec<f64> = lon_indices.iter().map(|&lon_i| *plane.get(lat_i, lon_i)).collect();
            let interpolated = interp_1d(&sub_lon, &row, &target_lon);
            lon_interp[row_idx * n_lon..(row_idx + 1) * n_lon].copy_from_slice(&interpolated);
        }

        let mut level_plane = vec![0.0f64; n_lat * n_lon];
        for col in 0..n_lon {
            let column: Vec<f64> = (0..sub_lat.len())
                .map(|row_idx| lon_interp[row_idx * n_lon + col])
                .collect();
            let interpolated = interp_1d(&sub_lat, &column, &target_lat);
            for row in 0..n_lat {
                level_plane[row * n_lon + col] = interpolated[row];
            }
        }

        cube.extend(level_plane.into_iter().map(|v| v as f32));
    }

    let estimated_bytes = cube.len() * std::mem::size_of::<f32>();
    if estimated_bytes > MAX_OUTPUT_BYTES {
        return Err(CoreError::InvalidRequest(
            "decoded output size exceeds limit".to_string(),
        ));
    }

    let levels_numeric = levels
        .iter()
        .map(|level| level_json_number(level))
        .collect::<Result<Vec<_>, _>>()?;

    let header = VolpHeader {
        bbox: [bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat],
        levels: levels_numeric,
        variable: "cloud_density".to_string(),
        valid_time: time_keys::parse_time_key(time_key)
            .map(time_keys::iso_z)
            .unwrap_or_default(),
        res_m: req.res_m,
        layer: req.layer.clone(),
        scale: 1.0,
        offset: 0.0,
        dtype: "float32".to_string(),
        shape: [levels.len(), n_lat, n_lon],
    };

    encode_volume_pack(&cube, &header)
}

/// `n_lat = max(2, ceil((north-south)*METERS_PER_DEG_LAT / res_m) + 1)`;
/// `n_lon` additionally scales by `cos(mean_lat)`. Both axes are linspaces.
fn target_grid(bbox: &BBox2D, res_m: f64) -> (Vec<f64>, Vec<f64>) {
    let n_lat = ((bbox.height_degrees() * METERS_PER_DEG_LAT / res_m).ceil() as usize + 1).max(2);
    let mean_lat_rad = bbox.center_lat().to_radians();
    let n_lon = ((bbox.width_degrees() * METERS_PER_DEG_LAT * mean_lat_rad.cos().abs() / res_m)
        .ceil() as usize
        + 1)
        .max(2);

    (
        linspace(bbox.min_lat, bbox.max_lat, n_lat),
        linspace(bbox.min_lon, bbox.max_lon, n_lon),
    )
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Renders a (already-normalized, numeric) level token as a JSON number:
/// an integer token like `"300"` becomes `300`, a fractional one like
/// `"300.5"` becomes `300.5` — matching `int(level) if level.isdigit() else
/// float(level)` in `routes/volume.py`.
fn level_json_number(level: &str) -> Result<serde_json::Number, CoreError> {
    if let Ok(i) = level.parse::<i64>() {
        return Ok(serde_json::Number::from(i));
    }
    let f: f64 = level
        .parse()
        .map_err(|_| CoreError::internal(anyhow::anyhow!("non-numeric level {level} reached header encoding")))?;
    serde_json::Number::from_f64(f)
        .ok_or_else(|| CoreError::internal(anyhow::anyhow!("non-finite level {level}")))
}

fn resolve_slice_path(time_dir: &Path, level: &str) -> Result<PathBuf, CoreError> {
    let nc_path = time_dir.join(format!("{level}.nc"));
    if nc_path.exists() {
        return Ok(nc_path);
    }
    let zarr_path = time_dir.join(format!("{level}.zarr"));
    if zarr_path.exists() {
        return Ok(zarr_path);
    }
    Err(CoreError::NotFound(format!(
        "no slice for level {level} under {}",
        time_dir.display()
    )))
}

/// Encodes `cube` (row-major `[L, ny, nx]` float32 values) with `header` into
/// the VOLP wire format: magic, little-endian u32 header length, UTF-8 JSON
/// header, then zlib-compressed cube bytes.
pub fn encode_volume_pack(cube: &[f32], header: &VolpHeader) -> Result<Vec<u8>, CoreError> {
    let header_json =
        serde_json::to_vec(header).map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?;

    let mut raw = Vec::with_capacity(cube.len() * 4);
    for value in cube {
        raw.extend_from_slice(&value.to_le_bytes());
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(3));
    encoder
        .write_all(&raw)
        .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?;
    let compressed = encoder
        .finish()
        .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?;

    let mut out = Vec::with_capacity(8 + header_json.len() + compressed.len());
    out.extend_from_slice(VOLP_MAGIC);
    out.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_json);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decodes a VOLP payload back into its header and float32 cube.
pub fn decode_volume_pack(bytes: &[u8]) -> Result<(VolpHeader, Vec<f32>), CoreError> {
    if bytes.len() < 8 || &bytes[0..4] != VOLP_MAGIC {
        return Err(CoreError::InvalidRequest("not a VOLP payload".to_string()));
    }
    let header_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    if bytes.len() < 8 + header_len {
        return Err(CoreError::InvalidRequest("truncated VOLP header".to_string()));
    }
    let header: VolpHeader = serde_json::from_slice(&bytes[8..8 + header_len])
        .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?;

    let mut decoder = flate2::read::ZlibDecoder::new(&bytes[8 + header_len..]);
    let mut raw = Vec::new();
    std::io::Read::read_to_end(&mut decoder, &mut raw)
        .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?;

    let expected_len = header.shape.iter().product::<usize>() * 4;
    if raw.len() != expected_len {
        return Err(CoreError::internal(anyhow::anyhow!(
            "decoded cube length {} does not match header shape {:?}",
            raw.len(),
            header.shape
        )));
    }

    let cube = raw
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    Ok((header, cube))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volp_round_trips() {
        let header = VolpHeader {
            bbox: [0.0, 0.0, 1.0, 1.0],
            levels: vec![serde_json::Number::from(300), serde_json::Number::from(500)],
            variable: "cloud_density".to_string(),
            valid_time: "2026-01-01T00:00:00Z".to_string(),
            res_m: 11132.0,
            layer: "cldas".to_string(),
            scale: 1.0,
            offset: 0.0,
            dtype: "float32".to_string(),
            shape: [2, 3, 3],
        };
        let cube: Vec<f32> = (0..18).map(|i| i as f32 * 0.5).collect();
        let encoded = encode_volume_pack(&cube, &header).unwrap();
        assert_eq!(&encoded[0..4], VOLP_MAGIC);

        let (decoded_header, decoded_cube) = decode_volume_pack(&encoded).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(decoded_cube, cube);
    }

    #[test]
    fn target_grid_respects_minimum_size() {
        let bbox = BBox2D {
            min_lon: 0.0,
            min_lat: 0.0,
            max_lon: 0.01,
            max_lat: 0.01,
        };
        let (lat, lon) = target_grid(&bbox, 1_000_000.0);
        assert!(lat.len() >= 2);
        assert!(lon.len() >= 2);
    }

    #[test]
    fn rejects_truncated_payload() {
        assert!(decode_volume_pack(b"VOLP").is_err());
    }

    #[test]
    fn level_json_number_renders_integers_without_a_decimal_point() {
        let n = level_json_number("300").unwrap();
        assert_eq!(n.to_string(), "300");
    }

    #[test]
    fn level_json_number_keeps_fractional_levels() {
        let n = level_json_number("300.5").unwrap();
        assert_eq!(n.as_f64().unwrap(), 300.5);
    }
}
