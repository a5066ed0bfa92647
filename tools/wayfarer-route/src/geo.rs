//! Coordinate math shared by the locator, matcher and tile encoder

use geo::{HaversineBearing, HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use wayfarer_common::{Error, Result};

/// Fixed-point scale for stored coordinates (1e-6 degrees)
pub const COORDINATE_PRECISION: f64 = 1e6;

/// Latitude bound of the Web Mercator projection
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Sphere radius used by Web Mercator
pub(crate) const MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// A WGS84 (longitude, latitude) pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn from_fixed(lon: i32, lat: i32) -> Self {
        Self {
            lon: lon as f64 / COORDINATE_PRECISION,
            lat: lat as f64 / COORDINATE_PRECISION,
        }
    }

    pub fn to_fixed(self) -> (i32, i32) {
        (
            (self.lon * COORDINATE_PRECISION).round() as i32,
            (self.lat * COORDINATE_PRECISION).round() as i32,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-MAX_LATITUDE..=MAX_LATITUDE).contains(&self.lat)
    }

    pub fn validate(&self, field: &str) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::validation(
                field,
                format!(
                    "({}, {}) outside lon [-180, 180], lat [-{MAX_LATITUDE:.6}, {MAX_LATITUDE:.6}]",
                    self.lon, self.lat
                ),
            ))
        }
    }

    fn point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// Great-circle distance in meters
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    a.point().haversine_distance(&b.point())
}

/// Initial bearing from `a` to `b`, normalized to [0, 360)
pub fn bearing_deg(a: Coordinate, b: Coordinate) -> f64 {
    let bearing = a.point().haversine_bearing(b.point());
    bearing.rem_euclid(360.0)
}

/// Smallest absolute difference between two headings, in [0, 180]
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Web Mercator projection in meters
pub fn to_mercator(c: Coordinate) -> [f64; 2] {
    let x = c.lon.to_radians() * MERCATOR_RADIUS_M;
    let lat = c.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln() * MERCATOR_RADIUS_M;
    [x, y]
}

pub fn from_mercator(p: [f64; 2]) -> Coordinate {
    let lon = (p[0] / MERCATOR_RADIUS_M).to_degrees();
    let lat = (2.0 * (p[1] / MERCATOR_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    Coordinate { lon, lat }
}

/// Ground meters per projected meter at a latitude
pub fn mercator_scale(lat: f64) -> f64 {
    lat.to_radians().cos()
}

/// Project `p` onto segment `a`-`b` in the plane.
///
/// Returns the clamped ratio along the segment (0 at `a`, 1 at `b`) and the
/// projected point.
pub fn project_onto_segment(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> (f64, [f64; 2]) {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let len2 = dx * dx + dy * dy;
    if len2 < 1e-18 {
        return (0.0, a);
    }
    let t = (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len2).clamp(0.0, 1.0);
    (t, [a[0] + t * dx, a[1] + t * dy])
}

/// Sign of the cross product (b - a) x (p - a): positive when `p` lies left
/// of the direction a -> b.
pub fn side_of(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Linear interpolation between two coordinates
pub fn interpolate(a: Coordinate, b: Coordinate, t: f64) -> Coordinate {
    Coordinate {
        lon: a.lon + (b.lon - a.lon) * t,
        lat: a.lat + (b.lat - a.lat) * t,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_m(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let o = Coordinate::new(0.0, 0.0);
        assert!(bearing_deg(o, Coordinate::new(0.0, 0.01)).abs() < 0.01);
        assert!((bearing_deg(o, Coordinate::new(0.01, 0.0)) - 90.0).abs() < 0.01);
        assert!((bearing_deg(o, Coordinate::new(-0.01, 0.0)) - 270.0).abs() < 0.01);
    }

    #[test]
    fn test_angle_diff_wraps() {
        assert_eq!(angle_diff(350.0, 10.0), 20.0);
        assert_eq!(angle_diff(10.0, 350.0), 20.0);
        assert_eq!(angle_diff(0.0, 180.0), 180.0);
    }

    #[test]
    fn test_mercator_roundtrip() {
        let c = Coordinate::new(4.3517, 50.8503);
        let back = from_mercator(to_mercator(c));
        assert!((back.lon - c.lon).abs() < 1e-9);
        assert!((back.lat - c.lat).abs() < 1e-9);
    }

    #[test]
    fn test_projection_clamps_to_segment() {
        let (t, p) = project_onto_segment([5.0, 3.0], [0.0, 0.0], [10.0, 0.0]);
        assert_eq!(t, 0.5);
        assert_eq!(p, [5.0, 0.0]);
        let (t, _) = project_onto_segment([-4.0, 1.0], [0.0, 0.0], [10.0, 0.0]);
        assert_eq!(t, 0.0);
        assert!(side_of([5.0, 3.0], [0.0, 0.0], [10.0, 0.0]) > 0.0);
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        assert!(Coordinate::new(181.0, 0.0).validate("coordinates").is_err());
        assert!(Coordinate::new(0.0, 89.0).validate("coordinates").is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).validate("coordinates").is_err());
        assert!(Coordinate::new(-180.0, 85.0).validate("coordinates").is_ok());
    }

    #[test]
    fn test_fixed_point_roundtrip() {
        let c = Coordinate::new(4.351_721, 50.850_346);
        let (lon, lat) = c.to_fixed();
        assert_eq!((lon, lat), (4_351_721, 50_850_346));
        assert_eq!(Coordinate::from_fixed(lon, lat), c);
    }
}
