//! The three request-serving services: wind vectors, streamlines, and
//! cloud-density volume packs. Each owns its request type, its fingerprint
//! shape, and its compute closure; all three sit behind the same
//! [`crate::cache::CacheBytes`].

pub mod streamline;
pub mod vector;
pub mod volume;

/// Point-count / output-size ceilings shared across services.
pub const MAX_VECTOR_POINTS: usize = 10_000;
pub const MAX_BBOX_AREA_DEG2: f64 = 100.0;
pub const MIN_RES_M: f64 = 100.0;
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024 * 1024;
pub const MAX_CACHEABLE_BYTES: usize = 16 * 1024 * 1024;

/// Earth radius approximation used throughout the compute path, matching
/// the original's constant.
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;
