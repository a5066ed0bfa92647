//! Geometry output: encoded polylines, GeoJSON and overview simplification

use geo::{Coord, LineString, Simplify};
use serde_json::{json, Value};

use super::params::{Geometries, Overview};
use crate::geo::Coordinate;

/// Douglas-Peucker tolerance of the simplified overview, degrees
const SIMPLIFY_EPSILON_DEG: f64 = 1e-5;

/// Google polyline encoding of (lat, lon) pairs at `precision` decimals
pub fn encode_polyline(coordinates: &[Coordinate], precision: u32) -> String {
    let factor = 10f64.powi(precision as i32);
    let mut out = String::with_capacity(coordinates.len() * 8);
    let (mut prev_lat, mut prev_lon) = (0i64, 0i64);
    for c in coordinates {
        let lat = (c.lat * factor).round() as i64;
        let lon = (c.lon * factor).round() as i64;
        encode_value(lat - prev_lat, &mut out);
        encode_value(lon - prev_lon, &mut out);
        prev_lat = lat;
        prev_lon = lon;
    }
    out
}

fn encode_value(delta: i64, out: &mut String) {
    let mut v = ((delta << 1) ^ (delta >> 63)) as u64;
    while v >= 0x20 {
        out.push(char::from((((v & 0x1f) | 0x20) + 63) as u8));
        v >>= 5;
    }
    out.push(char::from((v + 63) as u8));
}

/// Inverse of [`encode_polyline`]; `None` on malformed input
#[cfg(test)]
pub(crate) fn decode_polyline(encoded: &str, precision: u32) -> Option<Vec<Coordinate>> {
    let factor = 10f64.powi(precision as i32);
    let bytes = encoded.as_bytes();
    let mut i = 0;
    let (mut lat, mut lon) = (0i64, 0i64);
    let mut out = Vec::new();
    let next = |i: &mut usize| -> Option<i64> {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let b = u64::from(*bytes.get(*i)?).checked_sub(63)?;
            *i += 1;
            result |= (b & 0x1f) << shift;
            shift += 5;
            if b < 0x20 {
                break;
            }
            if shift > 60 {
                return None;
            }
        }
        let v = (result >> 1) as i64;
        Some(if result & 1 == 1 { !v } else { v })
    };
    while i < bytes.len() {
        lat += next(&mut i)?;
        lon += next(&mut i)?;
        out.push(Coordinate::new(lon as f64 / factor, lat as f64 / factor));
    }
    Some(out)
}

/// Overview line of a route: all points, a simplified line, or none
pub fn overview(coordinates: &[Coordinate], overview: Overview) -> Option<Vec<Coordinate>> {
    match overview {
        Overview::False => None,
        Overview::Full => Some(coordinates.to_vec()),
        Overview::Simplified => Some(simplify(coordinates)),
    }
}

fn simplify(coordinates: &[Coordinate]) -> Vec<Coordinate> {
    if coordinates.len() <= 2 {
        return coordinates.to_vec();
    }
    let line: LineString<f64> = coordinates
        .iter()
        .map(|c| Coord { x: c.lon, y: c.lat })
        .collect();
    line.simplify(&SIMPLIFY_EPSILON_DEG)
        .0
        .into_iter()
        .map(|c| Coordinate::new(c.x, c.y))
        .collect()
}

/// Render coordinates in the requested format
pub fn format(coordinates: &[Coordinate], geometries: Geometries) -> Value {
    match geometries {
        Geometries::Polyline => Value::String(encode_polyline(coordinates, 5)),
        Geometries::Polyline6 => Value::String(encode_polyline(coordinates, 6)),
        Geometries::GeoJson => json!({
            "type": "LineString",
            "coordinates": coordinates.iter().map(|c| [c.lon, c.lat]).collect::<Vec<_>>(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_polyline() {
        // the example of Google's format description
        let points = [
            Coordinate::new(-120.2, 38.5),
            Coordinate::new(-120.95, 40.7),
            Coordinate::new(-126.453, 43.252),
        ];
        assert_eq!(encode_polyline(&points, 5), "_p~iF~ps|U_ulLnnqC_mqNvxq`@");
    }

    #[test]
    fn test_polyline6_decodes_back() {
        let points = vec![Coordinate::new(4.351_721, 50.850_341), Coordinate::new(4.401_702, 50.860_299)];
        let decoded = decode_polyline(&encode_polyline(&points, 6), 6).unwrap();
        assert_eq!(decoded.len(), 2);
        for (a, b) in decoded.iter().zip(&points) {
            assert!((a.lon - b.lon).abs() < 1e-9 && (a.lat - b.lat).abs() < 1e-9);
        }
        assert!(decode_polyline("_p~iF~ps|U_", 5).is_none());
    }

    #[test]
    fn test_simplified_overview_drops_collinear_points() {
        let line: Vec<Coordinate> = (0..10).map(|i| Coordinate::new(4.0 + i as f64 * 0.001, 50.0)).collect();
        let simplified = overview(&line, Overview::Simplified).unwrap();
        assert_eq!(simplified, vec![line[0], line[9]]);
        assert_eq!(overview(&line, Overview::Full).unwrap().len(), 10);
        assert!(overview(&line, Overview::False).is_none());
    }

    #[test]
    fn test_geojson() {
        let v = format(&[Coordinate::new(4.0, 50.0)], Geometries::GeoJson);
        assert_eq!(v["type"], "LineString");
        assert_eq!(v["coordinates"][0][1], 50.0);
    }
}
