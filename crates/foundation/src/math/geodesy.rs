use thiserror::Error;

/// Earth's mean radius (kilometers), used for great-circle distances.
pub const EARTH_MEAN_RADIUS_KM: f64 = 6_371.0;

pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

#[derive(Debug, Copy, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} outside [-180, 180]")]
    Longitude(f64),
}

/// Geographic coordinates in degrees.
///
/// Latitude is always within [-90, 90] and longitude within [-180, 180].
/// Constructors clamp or wrap instead of producing out-of-range values.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GeoCoordinate {
    latitude: f64,
    longitude: f64,
}

impl GeoCoordinate {
    /// Clamp latitude to the poles and wrap longitude into [-180, 180).
    ///
    /// Exactly +180 is kept as-is so `uv_to_geo(u = 1)` round-trips.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        let longitude = if longitude == MAX_LONGITUDE {
            longitude
        } else {
            normalize_longitude(longitude)
        };
        Self {
            latitude: latitude.clamp(MIN_LATITUDE, MAX_LATITUDE),
            longitude,
        }
    }

    /// Strict constructor for boundary validation.
    pub fn try_new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !(MIN_LATITUDE..=MAX_LATITUDE).contains(&latitude) {
            return Err(CoordinateError::Latitude(latitude));
        }
        if !longitude.is_finite() || !(MIN_LONGITUDE..=MAX_LONGITUDE).contains(&longitude) {
            return Err(CoordinateError::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Wrap any longitude in degrees into [-180, 180).
pub fn normalize_longitude(longitude: f64) -> f64 {
    if !longitude.is_finite() {
        return 0.0;
    }
    (longitude + 180.0).rem_euclid(360.0) - 180.0
}

/// Great-circle distance in kilometers (haversine, spherical Earth).
pub fn haversine_km(a: GeoCoordinate, b: GeoCoordinate) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = lat_b - lat_a;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_MEAN_RADIUS_KM * h.sqrt().min(1.0).asin()
}
