use crate::math::{GeoCoordinate, MAX_LATITUDE, MAX_LONGITUDE, MIN_LATITUDE, normalize_longitude};

/// Geographic rectangle in degrees.
///
/// Latitudes are ordered and clamped to the poles. Longitudes are normalized
/// into [-180, 180]; `long_min > long_max` means the rectangle crosses the
/// antimeridian. The full longitude span is stored as `[-180, 180]`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GeoBounds {
    lat_min: f64,
    lat_max: f64,
    long_min: f64,
    long_max: f64,
}

impl GeoBounds {
    pub fn new(lat_min: f64, lat_max: f64, long_min: f64, long_max: f64) -> Self {
        let lat_a = lat_min.clamp(MIN_LATITUDE, MAX_LATITUDE);
        let lat_b = lat_max.clamp(MIN_LATITUDE, MAX_LATITUDE);
        // An eastern edge of exactly +180 stays put so full-width rectangles
        // do not collapse to zero width.
        let long_max = if long_max == MAX_LONGITUDE {
            long_max
        } else {
            normalize_longitude(long_max)
        };

        Self {
            lat_min: lat_a.min(lat_b),
            lat_max: lat_a.max(lat_b),
            long_min: normalize_longitude(long_min),
            long_max,
        }
    }

    /// Every longitude between two latitudes.
    pub fn latitude_band(lat_min: f64, lat_max: f64) -> Self {
        Self::new(lat_min, lat_max, -180.0, 180.0)
    }

    pub fn world() -> Self {
        Self::latitude_band(MIN_LATITUDE, MAX_LATITUDE)
    }

    pub fn lat_min(&self) -> f64 {
        self.lat_min
    }

    pub fn lat_max(&self) -> f64 {
        self.lat_max
    }

    pub fn long_min(&self) -> f64 {
        self.long_min
    }

    pub fn long_max(&self) -> f64 {
        self.long_max
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.long_min > self.long_max
    }

    pub fn lat_span(&self) -> f64 {
        self.lat_max - self.lat_min
    }

    /// Eastward extent from `long_min` to `long_max`, in [0, 360].
    pub fn long_span(&self) -> f64 {
        if self.crosses_antimeridian() {
            self.long_max + 360.0 - self.long_min
        } else {
            self.long_max - self.long_min
        }
    }

    /// North-west corner, the origin of the rectangle in texture space.
    pub fn north_west(&self) -> GeoCoordinate {
        GeoCoordinate::new(self.lat_max, self.long_min)
    }

    pub fn south_east(&self) -> GeoCoordinate {
        GeoCoordinate::new(self.lat_min, self.long_max)
    }

    pub fn contains(&self, coord: GeoCoordinate) -> bool {
        let lat = coord.latitude();
        if lat < self.lat_min || lat > self.lat_max {
            return false;
        }
        let lon = coord.longitude();
        if self.crosses_antimeridian() {
            lon >= self.long_min || lon <= self.long_max
        } else {
            lon >= self.long_min && lon <= self.long_max
        }
    }

    /// Split into non-wrapping rectangles (one, or two when crossing).
    pub fn split_at_antimeridian(&self) -> (GeoBounds, Option<GeoBounds>) {
        if !self.crosses_antimeridian() {
            return (*self, None);
        }
        let east = Self {
            long_max: MAX_LONGITUDE,
            ..*self
        };
        let west = Self {
            long_min: -MAX_LONGITUDE,
            ..*self
        };
        (east, Some(west))
    }
}

/// Parameters of the drawing-region calculation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RegionConfig {
    /// Angular span (degrees) covered at zoom 1.
    pub base_span_deg: f64,
    /// Zoom values below this are raised to it; zoom 1 is the widest view.
    pub min_zoom: f64,
    /// Floor for `cos(latitude)` when widening longitude near the poles.
    pub min_cos_lat: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            base_span_deg: 30.0,
            min_zoom: 1.0,
            min_cos_lat: 0.01,
        }
    }
}

impl RegionConfig {
    /// Geographic rectangle covered by a drawing centred on `center`.
    ///
    /// Never fails: zoom is raised to `min_zoom`, latitude is clamped at the
    /// poles, and a longitude span of 360 degrees or more becomes the full band.
    pub fn drawing_bounds(&self, center: GeoCoordinate, zoom: f64) -> GeoBounds {
        let zoom = if zoom.is_finite() {
            zoom.max(self.min_zoom)
        } else {
            self.min_zoom
        };
        let span = self.base_span_deg / zoom;

        let half_lat = span / 2.0;
        let lat_min = center.latitude() - half_lat;
        let lat_max = center.latitude() + half_lat;

        let cos_lat = center
            .latitude()
            .to_radians()
            .cos()
            .abs()
            .max(self.min_cos_lat);
        let long_span = span / cos_lat;
        if long_span >= 360.0 {
            return GeoBounds::latitude_band(lat_min, lat_max);
        }

        let half_long = long_span / 2.0;
        GeoBounds::new(
            lat_min,
            lat_max,
            center.longitude() - half_long,
            center.longitude() + half_long,
        )
    }
}

/// [`RegionConfig::drawing_bounds`] with the default configuration.
pub fn calculate_drawing_bounds(center: GeoCoordinate, zoom: f64) -> GeoBounds {
    RegionConfig::default().drawing_bounds(center, zoom)
}

#[cfg(test)]
mod tests {
    use super::{GeoBounds, RegionConfig, calculate_drawing_bounds};
    use crate::math::GeoCoordinate;

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    #[test]
    fn zoom_one_is_ten_times_zoom_ten() {
        let origin = GeoCoordinate::new(0.0, 0.0);
        let wide = calculate_drawing_bounds(origin, 1.0);
        let tight = calculate_drawing_bounds(origin, 10.0);

        assert_close(wide.lat_span(), 30.0, 1e-9);
        assert_close(tight.lat_span(), 3.0, 1e-9);
        assert_close(wide.long_span() / tight.long_span(), 10.0, 1e-9);
        assert_close(wide.long_min(), -15.0, 1e-9);
        assert_close(wide.long_max(), 15.0, 1e-9);
    }

    #[test]
    fn latitude_is_clamped_not_wrapped() {
        let b = calculate_drawing_bounds(GeoCoordinate::new(85.0, 10.0), 1.0);
        assert_eq!(b.lat_max(), 90.0);
        assert_close(b.lat_min(), 70.0, 1e-9);
    }

    #[test]
    fn longitude_widens_with_latitude() {
        let equator = calculate_drawing_bounds(GeoCoordinate::new(0.0, 0.0), 5.0);
        let sixty = calculate_drawing_bounds(GeoCoordinate::new(60.0, 0.0), 5.0);
        assert_close(sixty.long_span(), equator.long_span() * 2.0, 1e-9);
    }

    #[test]
    fn pole_center_widens_to_full_band() {
        let b = calculate_drawing_bounds(GeoCoordinate::new(90.0, 45.0), 1.0);
        assert_eq!(b.long_min(), -180.0);
        assert_eq!(b.long_max(), 180.0);
        assert_close(b.long_span(), 360.0, 1e-12);
        assert!(!b.crosses_antimeridian());
    }

    #[test]
    fn antimeridian_center_produces_crossing_bounds() {
        let b = calculate_drawing_bounds(GeoCoordinate::new(0.0, 175.0), 1.0);
        assert!(b.crosses_antimeridian());
        assert_close(b.long_min(), 160.0, 1e-9);
        assert_close(b.long_max(), -170.0, 1e-9);
        assert_close(b.long_span(), 30.0, 1e-9);
    }

    #[test]
    fn degenerate_zoom_is_raised_to_minimum() {
        let cfg = RegionConfig::default();
        let origin = GeoCoordinate::new(0.0, 0.0);
        assert_eq!(cfg.drawing_bounds(origin, 0.0), cfg.drawing_bounds(origin, 1.0));
        assert_eq!(
            cfg.drawing_bounds(origin, f64::NAN),
            cfg.drawing_bounds(origin, 1.0)
        );
    }

    #[test]
    fn contains_and_split_handle_crossing() {
        let b = GeoBounds::new(-10.0, 10.0, 170.0, -170.0);
        assert!(b.contains(GeoCoordinate::new(0.0, 175.0)));
        assert!(b.contains(GeoCoordinate::new(0.0, -175.0)));
        assert!(!b.contains(GeoCoordinate::new(0.0, 0.0)));
        assert!(!b.contains(GeoCoordinate::new(20.0, 175.0)));

        let (east, west) = b.split_at_antimeridian();
        let west = west.expect("crossing bounds split in two");
        assert_eq!((east.long_min(), east.long_max()), (170.0, 180.0));
        assert_eq!((west.long_min(), west.long_max()), (-180.0, -170.0));
    }

    #[test]
    fn new_orders_latitudes() {
        let b = GeoBounds::new(20.0, -20.0, 0.0, 10.0);
        assert_eq!(b.lat_min(), -20.0);
        assert_eq!(b.lat_max(), 20.0);
    }
}
