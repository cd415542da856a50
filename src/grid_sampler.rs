//! BBox-to-index selection and bilinear/nearest sampling over a [`GridSlab`].
//!
//! Grounded in the bounding-slice and separated 1-D interpolation logic of
//! `routes/volume.py` (`_bounding_slice`, `_interp_1d`, `_interp2d`) and the
//! bbox-selection path in `routers/vector.py`; `sampling.rs` in the wider
//! example pack shows the same decompose-into-axis-then-tensor-product shape
//! for a Rust renderer.

use crate::bbox::BBox2D;
use crate::grid::{GridAxis, GridSlab, LongitudeConvention};

const EPSILON: f64 = 1e-9;

/// Indices selected along one axis, plus whether they wrap (for longitude).
#[derive(Debug, Clone)]
pub struct AxisSelection {
    pub indices: Vec<usize>,
}

/// Selects latitude indices within `[min(min_lat,max_lat), max(...)]`, then
/// applies `stride`.
pub fn select_lat_indices(axis: &GridAxis, min_lat: f64, max_lat: f64, stride: usize) -> AxisSelection {
    let (lo, hi) = (min_lat.min(max_lat), min_lat.max(max_lat));
    let indices: Vec<usize> = axis
        .values()
        .iter()
        .enumerate()
        .filter(|(_, &v)| v >= lo && v <= hi)
        .map(|(i, _)| i)
        .step_by(stride.max(1))
        .collect();
    AxisSelection { indices }
}

/// Selects longitude indices. If the request spans >= 360 degrees, every
/// index is selected (then strided). Otherwise both bounds are normalized
/// into the axis's convention; `lo <= hi` selects the contiguous range,
/// `lo > hi` selects the dateline-crossing union.
pub fn select_lon_indices(
    axis: &GridAxis,
    convention: LongitudeConvention,
    min_lon: f64,
    max_lon: f64,
    stride: usize,
) -> AxisSelection {
    let span = (max_lon - min_lon).abs();
    if span >= 360.0 {
        let indices: Vec<usize> = (0..axis.len()).step_by(stride.max(1)).collect();
        return AxisSelection { indices };
    }

    let lo = convention.normalize(min_lon);
    let hi = convention.normalize(max_lon);

    let indices: Vec<usize> = if lo <= hi {
        axis.values()
            .iter()
            .enumerate()
            .filter(|(_, &v)| v >= lo && v <= hi)
            .map(|(i, _)| i)
            .collect()
    } else {
        axis.values()
            .iter()
            .enumerate()
            .filter(|(_, &v)| v >= lo || v <= hi)
            .map(|(i, _)| i)
            .collect()
    };

    AxisSelection {
        indices: indices.into_iter().step_by(stride.max(1)).collect(),
    }
}

/// Resolves a bbox (already parsed, possibly dateline-crossing) to lat/lon
/// index selections against a slab's axes.
pub fn bbox_to_indices(
    slab: &GridSlab,
    bbox: &BBox2D,
    stride: usize,
) -> (AxisSelection, AxisSelection) {
    let lon_convention = LongitudeConvention::detect(slab.lon_axis.values());
    let lat_sel = select_lat_indices(&slab.lat_axis, bbox.min_lat, bbox.max_lat, stride);
    let lon_sel = select_lon_indices(
        &slab.lon_axis,
        lon_convention,
        bbox.min_lon,
        bbox.max_lon,
        stride,
    );
    (lat_sel, lon_sel)
}

/// Fractional-index lookup result for one query value on one axis.
#[derive(Debug, Clone, Copy)]
struct AxisFrac {
    left: usize,
    right: usize,
    frac: f64,
    valid: bool,
}

/// `searchsorted(axis, q, side='right')`-based fractional position.
fn axis_frac(axis: &[f64], q: f64) -> AxisFrac {
    let n = axis.len();
    if n == 0 {
        return AxisFrac {
            left: 0,
            right: 0,
            frac: 0.0,
            valid: false,
        };
    }
    if n == 1 {
        let valid = (q - axis[0]).abs() <= EPSILON;
        return AxisFrac {
            left: 0,
            right: 0,
            frac: 0.0,
            valid,
        };
    }

    let right = axis.partition_point(|&v| v <= q);
    let left = right.saturating_sub(1);
    let valid = right < n && left < n && right > 0;
    if !valid {
        return AxisFrac {
            left: left.min(n - 1),
            right: right.min(n - 1),
            frac: 0.0,
            valid: false,
        };
    }

    let denom = axis[right] - axis[left];
    let frac = if denom.abs() <= EPSILON {
        0.0
    } else {
        ((q - axis[left]) / denom).clamp(0.0, 1.0)
    };
    AxisFrac {
        left,
        right,
        frac,
        valid: true,
    }
}

/// Bilinearly samples `slab` at `(lat_q, lon_q)`. Out-of-axis queries yield
/// `NaN`. `lon_q` should already be unwrapped into the slab's longitude
/// convention by the caller.
pub fn bilinear_sample(slab: &GridSlab, lat_q: f64, lon_q: f64) -> f64 {
    let lat_f = axis_frac(slab.lat_axis.values(), lat_q);
    let lon_f = axis_frac(slab.lon_axis.values(), lon_q);
    if !lat_f.valid || !lon_f.valid {
        return f64::NAN;
    }

    let v00 = slab.at(lat_f.left, lon_f.left);
    let v01 = slab.at(lat_f.left, lon_f.right);
    let v10 = slab.at(lat_f.right, lon_f.left);
    let v11 = slab.at(lat_f.right, lon_f.right);

    let top = v00 * (1.0 - lon_f.frac) + v01 * lon_f.frac;
    let bottom = v10 * (1.0 - lon_f.frac) + v11 * lon_f.frac;
    top * (1.0 - lat_f.frac) + bottom * lat_f.frac
}

/// Nearest-neighbor sample: picks the axis side with `round(frac)`.
pub fn nearest_sample(slab: &GridSlab, lat_q: f64, lon_q: f64) -> f64 {
    let lat_f = axis_frac(slab.lat_axis.values(), lat_q);
    let lon_f = axis_frac(slab.lon_axis.values(), lon_q);
    if !lat_f.valid || !lon_f.valid {
        return f64::NAN;
    }
    let lat_idx = if lat_f.frac.round() >= 1.0 { lat_f.right } else { lat_f.left };
    let lon_idx = if lon_f.frac.round() >= 1.0 { lon_f.right } else { lon_f.left };
    slab.at(lat_idx, lon_idx)
}

/// Selects an inclusive index range on an ascending axis that *brackets*
/// `[lo, hi]`: the left neighbor at or below `lo`, the right neighbor at or
/// above `hi`, each clamped to the axis's own extent when the bound falls
/// outside it. Mirrors `_bounding_slice` in `routes/volume.py` — unlike
/// [`select_lat_indices`]/[`select_lon_indices`], which select only points
/// strictly inside `[lo, hi]`, this guarantees the target grid's own
/// endpoints (which equal the bbox bounds) always have a real neighbor on
/// each side to interpolate against rather than falling off the sub-axis.
pub fn bounding_slice_indices(axis: &[f64], lo: f64, hi: f64) -> Option<(usize, usize)> {
    let n = axis.len();
    if n == 0 {
        return None;
    }
    let start = axis.iter().rposition(|&v| v <= lo).unwrap_or(0);
    let end = axis.iter().position(|&v| v >= hi).unwrap_or(n - 1);
    if start > end {
        return None;
    }
    Some((start, end))
}

/// Separated 1-D linear interpolation of a single axis: given source axis
/// values and data, returns interpolated values at `targets`. Used by the
/// volume pipeline's lon-then-lat resampling, paired with
/// [`bounding_slice_indices`] so the source axis always brackets the target
/// range. Queries that still fall outside the source axis (axis too short
/// to bracket, or floating-point edge slop) clamp to the nearest edge value,
/// matching `np.interp`'s clamp-outside-range behavior — distinct from
/// [`bilinear_sample`]/[`nearest_sample`], which deliberately return `NaN`
/// outside the source axis.
pub fn interp_1d(axis: &[f64], data: &[f64], targets: &[f64]) -> Vec<f64> {
    let n = axis.len();
    targets
        .iter()
        .map(|&q| {
            if n == 0 {
                return f64::NAN;
            }
            if q <= axis[0] {
                return data[0];
            }
            if q >= axis[n - 1] {
                return data[n - 1];
            }
            let f = axis_frac(axis, q);
            if !f.valid {
                f64::NAN
            } else {
                data[f.left] * (1.0 - f.frac) + data[f.right] * f.frac
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridAxis;

    fn test_slab() -> GridSlab {
        let lat = GridAxis::from_ascending(vec![-10.0, 0.0, 10.0]).unwrap();
        let lon = GridAxis::from_ascending(vec![0.0, 10.0, 20.0]).unwrap();
        // values[lat][lon] = lat_idx*10 + lon_idx
        GridSlab::new(lat, lon, vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0, 20.0, 21.0, 22.0]).unwrap()
    }

    #[test]
    fn bilinear_sample_at_grid_point_is_exact() {
        let slab = test_slab();
        assert_eq!(bilinear_sample(&slab, 0.0, 10.0), 11.0);
    }

    #[test]
    fn bilinear_sample_midpoint_interpolates() {
        let slab = test_slab();
        let v = bilinear_sample(&slab, 5.0, 5.0);
        assert!((v - 5.5).abs() < 1e-9);
    }

    #[test]
    fn out_of_axis_query_is_nan() {
        let slab = test_slab();
        assert!(bilinear_sample(&slab, 50.0, 10.0).is_nan());
    }

    #[test]
    fn select_lat_handles_inverted_bounds() {
        let axis = GridAxis::from_ascending(vec![-10.0, 0.0, 10.0, 20.0]).unwrap();
        let sel = select_lat_indices(&axis, 10.0, -10.0, 1);
        assert_eq!(sel.indices, vec![0, 1, 2]);
    }

    #[test]
    fn select_lon_dateline_union() {
        let axis = GridAxis::from_ascending(vec![170.0, 175.0, 180.0, 185.0, 190.0]).unwrap();
        let conv = LongitudeConvention::UnsignedDegrees;
        // request spans [170, -170] i.e. crossing dateline in signed terms;
        // min_lon=170 (normalizes to 170), max_lon=-170 (normalizes to 190)
        let sel = select_lon_indices(&axis, conv, 170.0, -170.0, 1);
        assert_eq!(sel.indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn select_lon_full_span_selects_all() {
        let axis = GridAxis::from_ascending(vec![0.0, 90.0, 180.0, 270.0]).unwrap();
        let sel = select_lon_indices(&axis, LongitudeConvention::UnsignedDegrees, 0.0, 360.0, 1);
        assert_eq!(sel.indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn stride_applies_after_selection() {
        let axis = GridAxis::from_ascending(vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
        let sel = select_lat_indices(&axis, 0.0, 4.0, 2);
        assert_eq!(sel.indices, vec![0, 2, 4]);
    }

    #[test]
    fn bounding_slice_adds_margin_for_unaligned_bounds() {
        let axis = vec![0.0, 0.1, 0.2, 0.3, 0.4];
        // [0.05, 0.25] sits strictly inside points 1..=2; the bracket must
        // reach one point past each side so interpolation at 0.05/0.25 has
        // real neighbors rather than falling off the sub-axis.
        assert_eq!(bounding_slice_indices(&axis, 0.05, 0.25), Some((0, 3)));
    }

    #[test]
    fn bounding_slice_is_exact_for_grid_aligned_bounds() {
        let axis = vec![0.0, 0.1, 0.2, 0.3, 0.4];
        assert_eq!(bounding_slice_indices(&axis, 0.1, 0.3), Some((0, 3)));
    }

    #[test]
    fn bounding_slice_clamps_when_bounds_exceed_axis() {
        let axis = vec![0.0, 0.1, 0.2];
        assert_eq!(bounding_slice_indices(&axis, -5.0, 5.0), Some((0, 2)));
    }

    #[test]
    fn interp_1d_clamps_outside_source_axis() {
        let axis = vec![0.0, 1.0, 2.0];
        let data = vec![10.0, 20.0, 30.0];
        let out = interp_1d(&axis, &data, &[-1.0, 0.0, 1.5, 2.0, 7.0]);
        assert_eq!(out, vec![10.0, 10.0, 25.0, 30.0, 30.0]);
    }
}
