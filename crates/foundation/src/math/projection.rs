//! Equirectangular mapping between geographic coordinates and texture UV.
//!
//! `u = 0` is longitude -180 and `u = 1` is +180. `v = 0` is the north pole
//! and `v = 1` the south pole, matching image row order (rows grow southward).

use super::GeoCoordinate;

/// Normalized texture coordinates, both axes in [0, 1].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct UvCoordinate {
    pub u: f64,
    pub v: f64,
}

impl UvCoordinate {
    /// Clamps both axes into [0, 1].
    pub fn new(u: f64, v: f64) -> Self {
        Self {
            u: u.clamp(0.0, 1.0),
            v: v.clamp(0.0, 1.0),
        }
    }
}

pub fn geo_to_uv(coord: GeoCoordinate) -> UvCoordinate {
    UvCoordinate {
        u: (coord.longitude() + 180.0) / 360.0,
        v: (90.0 - coord.latitude()) / 180.0,
    }
}

pub fn uv_to_geo(uv: UvCoordinate) -> GeoCoordinate {
    GeoCoordinate::new(90.0 - uv.v * 180.0, uv.u * 360.0 - 180.0)
}
