//! JSON rendering of query results.
//!
//! Durations and weights are reported in seconds and distances in meters,
//! converted from the deciseconds and decimeters used internally.

use serde_json::{json, Map, Value};

use super::geometry;
use super::params::{Annotations, Geometries, Overview};
use crate::graph::GraphStore;
use crate::locate::PhantomNode;
use crate::search::leg::Leg;

/// Name of the metric searches minimise
pub const WEIGHT_NAME: &str = "duration";

/// How route objects are rendered
#[derive(Debug, Clone, Copy)]
pub(crate) struct RouteFormat {
    pub annotations: Annotations,
    pub geometries: Geometries,
    pub overview: Overview,
}

pub(crate) fn seconds(ds: u32) -> f64 {
    f64::from(ds) / 10.0
}

pub(crate) fn meters(dm: u32) -> f64 {
    f64::from(dm) / 10.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub(crate) fn location(phantom: &PhantomNode) -> Value {
    json!([phantom.location.lon, phantom.location.lat])
}

pub(crate) fn waypoint(phantom: &PhantomNode) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("distance".into(), json!(phantom.distance));
    out.insert("name".into(), json!(""));
    out.insert("location".into(), location(phantom));
    out
}

pub(crate) fn nearest_waypoint(store: &GraphStore, phantom: &PhantomNode) -> Value {
    let mut out = Map::new();
    out.insert("nodes".into(), json!(phantom.node_ids(store)));
    out.extend(waypoint(phantom));
    Value::Object(out)
}

fn annotation(leg: &Leg, annotations: Annotations) -> Value {
    let mut out = Map::new();
    if annotations.duration {
        out.insert(
            "duration".into(),
            json!(leg.pieces.iter().map(|p| seconds(p.weight)).collect::<Vec<_>>()),
        );
    }
    if annotations.distance {
        out.insert(
            "distance".into(),
            json!(leg.pieces.iter().map(|p| meters(p.distance)).collect::<Vec<_>>()),
        );
    }
    if annotations.weight {
        out.insert(
            "weight".into(),
            json!(leg.pieces.iter().map(|p| seconds(p.weight)).collect::<Vec<_>>()),
        );
    }
    if annotations.speed {
        let speeds: Vec<f64> = leg
            .pieces
            .iter()
            .map(|p| {
                if p.weight == 0 {
                    0.0
                } else {
                    round1(meters(p.distance) / seconds(p.weight))
                }
            })
            .collect();
        out.insert("speed".into(), json!(speeds));
    }
    if annotations.nodes {
        out.insert("nodes".into(), json!(leg.nodes));
    }
    Value::Object(out)
}

fn leg_json(leg: &Leg, annotations: Annotations) -> Value {
    let mut out = Map::new();
    out.insert("distance".into(), json!(meters(leg.distance)));
    out.insert("duration".into(), json!(seconds(leg.weight)));
    out.insert("weight".into(), json!(seconds(leg.weight)));
    out.insert("summary".into(), json!(""));
    out.insert("steps".into(), json!([]));
    if annotations.any() {
        out.insert("annotation".into(), annotation(leg, annotations));
    }
    Value::Object(out)
}

/// A route object over consecutive legs
pub(crate) fn route(legs: &[Leg], format: RouteFormat) -> Map<String, Value> {
    let weight: u32 = legs.iter().map(|l| l.weight).sum();
    let distance: u32 = legs.iter().map(|l| l.distance).sum();

    let mut out = Map::new();
    out.insert("distance".into(), json!(meters(distance)));
    out.insert("duration".into(), json!(seconds(weight)));
    out.insert("weight".into(), json!(seconds(weight)));
    out.insert("weight_name".into(), json!(WEIGHT_NAME));

    let mut coordinates = Vec::new();
    for (i, leg) in legs.iter().enumerate() {
        let skip = usize::from(i > 0);
        coordinates.extend(leg.coordinates.iter().skip(skip).copied());
    }
    if let Some(line) = geometry::overview(&coordinates, format.overview) {
        out.insert("geometry".into(), geometry::format(&line, format.geometries));
    }
    out.insert(
        "legs".into(),
        Value::Array(legs.iter().map(|l| leg_json(l, format.annotations)).collect()),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::search::leg::Piece;

    fn leg() -> Leg {
        Leg {
            weight: 30,
            distance: 450,
            coordinates: vec![
                Coordinate::new(4.0, 50.0),
                Coordinate::new(4.001, 50.0),
                Coordinate::new(4.002, 50.0),
            ],
            pieces: vec![
                Piece { weight: 10, distance: 150 },
                Piece { weight: 20, distance: 300 },
            ],
            nodes: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_route_units_and_annotations() {
        let format = RouteFormat {
            annotations: Annotations::all(),
            geometries: Geometries::GeoJson,
            overview: Overview::Full,
        };
        let r = Value::Object(route(&[leg(), leg()], format));
        assert_eq!(r["distance"], 90.0);
        assert_eq!(r["duration"], 6.0);
        assert_eq!(r["weight_name"], "duration");
        assert_eq!(r["geometry"]["coordinates"].as_array().unwrap().len(), 5);
        let a = &r["legs"][0]["annotation"];
        assert_eq!(a["duration"], json!([1.0, 2.0]));
        assert_eq!(a["distance"], json!([15.0, 30.0]));
        assert_eq!(a["speed"], json!([15.0, 15.0]));
        assert_eq!(a["nodes"], json!([1, 2, 3]));
    }

    #[test]
    fn test_no_overview_omits_geometry() {
        let format = RouteFormat {
            annotations: Annotations::default(),
            geometries: Geometries::Polyline,
            overview: Overview::False,
        };
        let r = route(&[leg()], format);
        assert!(!r.contains_key("geometry"));
        assert!(r["legs"][0].get("annotation").is_none());
    }
}
