use super::GeoCoordinate;

/// Cartesian point on a sphere centred at the origin.
///
/// Convention: `+y` is the north pole, `x`/`z` span the equatorial plane and
/// (lat 0, long 0) maps to `+z`. Longitude +90 maps to `+x`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SpherePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SpherePoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn as_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

pub fn geo_to_sphere(coord: GeoCoordinate, radius: f64) -> SpherePoint {
    let lat = coord.latitude().to_radians();
    let lon = coord.longitude().to_radians();
    let cos_lat = lat.cos();

    SpherePoint::new(
        radius * cos_lat * lon.sin(),
        radius * lat.sin(),
        radius * cos_lat * lon.cos(),
    )
}

/// Inverse of [`geo_to_sphere`].
///
/// The normalized polar component is clamped to [-1, 1] before `asin` so
/// points drifting slightly off the surface stay in the domain.
pub fn sphere_to_geo(point: SpherePoint, radius: f64) -> GeoCoordinate {
    let ny = (point.y / radius).clamp(-1.0, 1.0);
    let lat = ny.asin();
    let lon = (point.x / radius).atan2(point.z / radius);

    GeoCoordinate::new(lat.to_degrees(), lon.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::{SpherePoint, geo_to_sphere, sphere_to_geo};
    use crate::math::GeoCoordinate;

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    /// Deterministic xorshift so the property run is reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next_unit(&mut self) -> f64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }

        fn range(&mut self, lo: f64, hi: f64) -> f64 {
            lo + (hi - lo) * self.next_unit()
        }
    }

    #[test]
    fn equator_prime_meridian_is_plus_z() {
        let p = geo_to_sphere(GeoCoordinate::new(0.0, 0.0), 1.0);
        assert_close(p.x, 0.0, 1e-12);
        assert_close(p.y, 0.0, 1e-12);
        assert_close(p.z, 1.0, 1e-12);

        let back = sphere_to_geo(p, 1.0);
        assert_close(back.latitude(), 0.0, 1e-12);
        assert_close(back.longitude(), 0.0, 1e-12);
    }

    #[test]
    fn north_pole_is_plus_y() {
        let p = geo_to_sphere(GeoCoordinate::new(90.0, 0.0), 2.0);
        assert_close(p.y, 2.0, 1e-12);
        assert_close(p.length(), 2.0, 1e-12);
        assert_close(sphere_to_geo(p, 2.0).latitude(), 90.0, 1e-9);
    }

    #[test]
    fn east_longitude_is_plus_x() {
        let p = geo_to_sphere(GeoCoordinate::new(0.0, 90.0), 1.0);
        assert_close(p.x, 1.0, 1e-12);
        assert_close(p.z, 0.0, 1e-12);
    }

    #[test]
    fn overshoot_is_clamped_before_asin() {
        let geo = sphere_to_geo(SpherePoint::new(0.0, 1.0 + 1e-12, 0.0), 1.0);
        assert_eq!(geo.latitude(), 90.0);
        assert!(geo.longitude().is_finite());
    }

    #[test]
    fn random_round_trip_many_radii() {
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        for i in 0..10_000 {
            // Longitude is undefined at the exact poles; stay just inside them.
            let lat = rng.range(-89.999, 89.999);
            let lon = rng.range(-179.999, 179.999);
            let radius = [1.0, 6_371.0, 0.5, 1e3][i % 4];
            let coord = GeoCoordinate::new(lat, lon);

            let back = sphere_to_geo(geo_to_sphere(coord, radius), radius);
            assert_close(back.latitude(), lat, 1e-9 * lat.abs().max(1.0));
            assert_close(back.longitude(), lon, 1e-9 * lon.abs().max(1.0));
        }
    }
}
