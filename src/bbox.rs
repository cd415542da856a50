//! Bounding-box parsing.
//!
//! Two shapes, two validation rules, both preserved from the originals:
//! the vector/streamline endpoints impose no min/max ordering at all —
//! either order is accepted and reordered internally, with `min_lon >
//! max_lon` after normalization meaning a dateline-crossing request
//! (`routers/vector.py::_parse_bbox`) — while the volume endpoint requires
//! strict `west < east` and `south < north` (`routes/volume.py::_parse_bbox`,
//! `ValueError("bbox east must be > west")`).

use crate::errors::CoreError;

/// A lat/lon bounding box. `min_lon > max_lon` is valid and means the box
/// straddles the antimeridian; callers that can't support that (volume
/// requests) must reject it themselves via [`BBox2D::require_strict_order`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox2D {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox2D {
    /// Parses `min_lon,min_lat,max_lon,max_lat`. No ordering constraint is
    /// imposed: latitude is reordered internally so `min_lat <= max_lat`;
    /// longitude is left as given, since its order carries dateline-crossing
    /// meaning.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(CoreError::InvalidRequest(
                "bbox must have 4 comma-separated values: min_lon,min_lat,max_lon,max_lat"
                    .to_string(),
            ));
        }
        let values: Result<Vec<f64>, _> = parts.iter().map(|p| p.parse::<f64>()).collect();
        let values = values.map_err(|_| {
            CoreError::InvalidRequest("bbox values must be numeric".to_string())
        })?;
        for v in &values {
            if !v.is_finite() {
                return Err(CoreError::InvalidRequest(
                    "bbox values must be finite".to_string(),
                ));
            }
        }

        let (min_lat, max_lat) = (values[1].min(values[3]), values[1].max(values[3]));
        let bbox = BBox2D {
            min_lon: values[0],
            min_lat,
            max_lon: values[2],
            max_lat,
        };
        bbox.validate_ranges()?;
        Ok(bbox)
    }

    fn validate_ranges(&self) -> Result<(), CoreError> {
        for lon in [self.min_lon, self.max_lon] {
            if !(-360.0..=360.0).contains(&lon) {
                return Err(CoreError::InvalidRequest(format!(
                    "bbox longitude {lon} out of range [-360, 360]"
                )));
            }
        }
        for lat in [self.min_lat, self.max_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(CoreError::InvalidRequest(format!(
                    "bbox latitude {lat} out of range [-90, 90]"
                )));
            }
        }
        Ok(())
    }

    pub fn crosses_dateline(&self) -> bool {
        self.min_lon > self.max_lon
    }

    /// Volume requests require strict `west < east` / `south < north`;
    /// reprojection beyond EPSG:4326 + simple wrap is out of scope there.
    pub fn require_strict_order(self) -> Result<Self, CoreError> {
        if self.min_lon >= self.max_lon {
            return Err(CoreError::InvalidRequest(
                "bbox east must be > west".to_string(),
            ));
        }
        if self.min_lat >= self.max_lat {
            return Err(CoreError::InvalidRequest(
                "bbox north must be > south".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn width_degrees(&self) -> f64 {
        if self.crosses_dateline() {
            (self.max_lon + 360.0) - self.min_lon
        } else {
            self.max_lon - self.min_lon
        }
    }

    pub fn height_degrees(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn center_lat(&self) -> f64 {
        (self.min_lat + self.max_lat) / 2.0
    }
}

/// A bbox plus a vertical range, used by volume-pack requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox3D {
    pub horizontal: BBox2D,
    pub bottom_m: f64,
    pub top_m: f64,
}

impl BBox3D {
    /// Parses `min_lon,min_lat,max_lon,max_lat,bottom_m,top_m`. Strict:
    /// rejects dateline crossing/inverted latitude and requires
    /// `top_m > bottom_m`.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() != 6 {
            return Err(CoreError::InvalidRequest(
                "bbox must have 6 comma-separated values: min_lon,min_lat,max_lon,max_lat,bottom_m,top_m"
                    .to_string(),
            ));
        }
        let values: Result<Vec<f64>, _> = parts.iter().map(|p| p.parse::<f64>()).collect();
        let values = values.map_err(|_| {
            CoreError::InvalidRequest("bbox values must be numeric".to_string())
        })?;
        for v in &values {
            if !v.is_finite() {
                return Err(CoreError::InvalidRequest(
                    "bbox values must be finite".to_string(),
                ));
            }
        }
        let horizontal = BBox2D {
            min_lon: values[0],
            min_lat: values[1],
            max_lon: values[2],
            max_lat: values[3],
        }
        .require_strict_order()?;
        horizontal.validate_ranges()?;

        let bottom_m = values[4];
        let top_m = values[5];
        if top_m <= bottom_m {
            return Err(CoreError::InvalidRequest(
                "bbox top_m must be > bottom_m".to_string(),
            ));
        }

        Ok(BBox3D {
            horizontal,
            bottom_m,
            top_m,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_bbox_allows_dateline_crossing() {
        let bbox = BBox2D::parse("170,-10,-170,10").unwrap();
        assert!(bbox.crosses_dateline());
        assert_eq!(bbox.width_degrees(), 20.0);
    }

    #[test]
    fn vector_bbox_reorders_inverted_latitude() {
        let bbox = BBox2D::parse("-10,10,10,-10").unwrap();
        assert_eq!(bbox.min_lat, -10.0);
        assert_eq!(bbox.max_lat, 10.0);
    }

    #[test]
    fn volume_bbox_rejects_dateline_crossing() {
        let bbox = BBox2D::parse("170,-10,-170,10").unwrap();
        assert!(bbox.require_strict_order().is_err());
    }

    #[test]
    fn bbox3d_requires_ordered_vertical_range() {
        assert!(BBox3D::parse("-10,-10,10,10,1000,500").is_err());
        let ok = BBox3D::parse("-10,-10,10,10,500,1000").unwrap();
        assert_eq!(ok.bottom_m, 500.0);
        assert_eq!(ok.top_m, 1000.0);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(BBox2D::parse("1,2,3").is_err());
        assert!(BBox3D::parse("1,2,3,4,5").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(BBox2D::parse("0,-95,10,10").is_err());
        assert!(BBox2D::parse("500,-10,10,10").is_err());
    }

    #[test]
    fn bbox3d_rejects_non_finite_horizontal_values() {
        assert!(BBox3D::parse("NaN,-10,10,10,500,1000").is_err());
        assert!(BBox3D::parse("-10,-10,inf,10,500,1000").is_err());
    }

    #[test]
    fn bbox3d_rejects_out_of_range_horizontal_values() {
        assert!(BBox3D::parse("0,-95,10,10,500,1000").is_err());
    }
}
