mod common;

use common::{engine, grid_points, grid_raw, line_point, line_raw};
use serde_json::{json, Value};
use wayfarer_common::ErrorKind;
use wayfarer_route::api::params::{
    Annotations, Geometries, MatchParameters, NearestParameters, Overview, RouteParameters,
    Snapping, TableParameters, TileParameters, TripParameters,
};
use wayfarer_route::config::Algorithm;
use wayfarer_route::geo::Coordinate;
use wayfarer_route::graph::RawGraph;
use wayfarer_route::{Engine, EngineConfig};

fn f(v: &Value) -> f64 {
    v.as_f64().unwrap()
}

fn route_duration(engine: &Engine, coordinates: Vec<Coordinate>) -> f64 {
    let out = engine.route(&RouteParameters::new(coordinates)).unwrap();
    f(&out["routes"][0]["duration"])
}

#[test]
fn test_line_route_and_table() {
    let engine = engine(&line_raw());

    let mut params = RouteParameters::new(vec![line_point(1), line_point(4)]);
    params.annotations = Annotations::all();
    params.geometries = Geometries::GeoJson;
    params.overview = Overview::Full;
    let out = engine.route(&params).unwrap();
    assert_eq!(out["code"], "Ok");
    let route = &out["routes"][0];
    assert_eq!(route["duration"], 3.0);
    assert_eq!(route["weight_name"], "duration");
    assert_eq!(route["legs"][0]["annotation"]["nodes"], json!([1, 2, 3, 4]));
    assert_eq!(route["geometry"]["coordinates"].as_array().unwrap().len(), 4);

    let mut table = TableParameters::new(vec![line_point(1), line_point(2), line_point(3), line_point(4)]);
    table.sources = vec![0];
    table.destinations = vec![1, 2, 3];
    let out = engine.table(&table).unwrap();
    assert_eq!(out["durations"], json!([[1.0, 2.0, 3.0]]));
    assert_eq!(out["sources"].as_array().unwrap().len(), 1);
    assert_eq!(out["destinations"].as_array().unwrap().len(), 3);
}

#[test]
fn test_route_totals_equal_annotation_sums() {
    let engine = engine(&grid_raw());
    let points = grid_points();
    let mut params = RouteParameters::new(points.clone());
    params.annotations = Annotations::all();
    let out = engine.route(&params).unwrap();
    let route = &out["routes"][0];
    let legs = route["legs"].as_array().unwrap();
    assert_eq!(legs.len(), points.len() - 1);

    let mut duration = 0.0;
    let mut distance = 0.0;
    for leg in legs {
        let a = &leg["annotation"];
        let d: f64 = a["duration"].as_array().unwrap().iter().map(f).sum();
        let m: f64 = a["distance"].as_array().unwrap().iter().map(f).sum();
        assert!((d - f(&leg["duration"])).abs() < 1e-6);
        assert!((m - f(&leg["distance"])).abs() < 1e-6);
        duration += d;
        distance += m;
    }
    assert!((duration - f(&route["duration"])).abs() < 1e-6);
    assert!((distance - f(&route["distance"])).abs() < 1e-6);
}

#[test]
fn test_table_matches_routes() {
    let engine = engine(&grid_raw());
    let points = grid_points();
    let mut params = TableParameters::new(points.clone());
    params.annotations.distance = true;
    let out = engine.table(&params).unwrap();
    for (i, &s) in points.iter().enumerate() {
        for (j, &t) in points.iter().enumerate() {
            let cell = f(&out["durations"][i][j]);
            if i == j {
                assert_eq!(cell, 0.0);
                continue;
            }
            let routed = route_duration(&engine, vec![s, t]);
            assert!((cell - routed).abs() < 1e-6, "{i}->{j}: table {cell}, route {routed}");
        }
    }
}

#[test]
fn test_dijkstra_backend_agrees() {
    let ch = engine(&grid_raw());
    let store = common::build(&grid_raw());
    let config = EngineConfig {
        algorithm: Algorithm::Dijkstra,
        ..EngineConfig::default()
    };
    let dijkstra = Engine::from_store(store, config).unwrap();
    let params = TableParameters::new(grid_points());
    assert_eq!(ch.table(&params).unwrap(), dijkstra.table(&params).unwrap());
}

#[test]
fn test_waypoints_merge_legs() {
    let engine = engine(&grid_raw());
    let points = grid_points()[..3].to_vec();
    let all = engine.route(&RouteParameters::new(points.clone())).unwrap();
    let mut params = RouteParameters::new(points);
    params.waypoints = vec![0, 2];
    let merged = engine.route(&params).unwrap();
    assert_eq!(merged["routes"][0]["legs"].as_array().unwrap().len(), 1);
    assert_eq!(merged["waypoints"].as_array().unwrap().len(), 2);
    assert!((f(&merged["routes"][0]["duration"]) - f(&all["routes"][0]["duration"])).abs() < 1e-6);
}

#[test]
fn test_alternatives_start_with_best_route() {
    let engine = engine(&grid_raw());
    let points = grid_points();
    let mut params = RouteParameters::new(vec![points[0], points[1]]);
    params.alternatives = 2;
    let out = engine.route(&params).unwrap();
    let routes = out["routes"].as_array().unwrap();
    assert!(!routes.is_empty() && routes.len() <= 3);
    let best = route_duration(&engine, vec![points[0], points[1]]);
    assert!((f(&routes[0]["duration"]) - best).abs() < 1e-6);
    for r in routes {
        assert!(f(&r["duration"]) >= best - 1e-6);
    }
}

#[test]
fn test_nearest_orders_by_distance() {
    let engine = engine(&grid_raw());
    let mut params = NearestParameters::new(Coordinate::new(4.3531, 50.8522));
    params.number_of_results = 3;
    let out = engine.nearest(&params).unwrap();
    let waypoints = out["waypoints"].as_array().unwrap();
    assert_eq!(waypoints.len(), 3);
    let distances: Vec<f64> = waypoints.iter().map(|w| f(&w["distance"])).collect();
    assert!(distances.windows(2).all(|d| d[0] <= d[1]));
    assert_eq!(waypoints[0]["nodes"].as_array().unwrap().len(), 2);
}

#[test]
fn test_trip_visits_every_waypoint_once() {
    let engine = engine(&grid_raw());
    let points = grid_points();
    let mut params = TripParameters::new(points.clone());
    params.overview = Overview::False;
    let out = engine.trip(&params).unwrap();

    let trip = &out["trips"][0];
    assert_eq!(trip["legs"].as_array().unwrap().len(), points.len());
    assert!(trip.get("geometry").is_none());
    let mut order: Vec<u64> = out["waypoints"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["waypoint_index"].as_u64().unwrap())
        .collect();
    order.sort_unstable();
    assert_eq!(order, (0..points.len() as u64).collect::<Vec<_>>());

    let mut input_order = points.clone();
    input_order.push(points[0]);
    assert!(f(&trip["duration"]) <= route_duration(&engine, input_order) + 1e-6);
}

#[test]
fn test_trip_with_fixed_ends() {
    let engine = engine(&grid_raw());
    let points = grid_points();
    let mut params = TripParameters::new(points.clone());
    params.roundtrip = false;
    params.source = "first".parse().unwrap();
    params.destination = "last".parse().unwrap();
    let out = engine.trip(&params).unwrap();
    let waypoints = out["waypoints"].as_array().unwrap();
    assert_eq!(waypoints[0]["waypoint_index"], 0);
    assert_eq!(waypoints[points.len() - 1]["waypoint_index"], points.len() - 1);
    assert_eq!(out["trips"][0]["legs"].as_array().unwrap().len(), points.len() - 1);
}

/// Straight two-way road along lat 50.0, ~100 m segments
fn road() -> RawGraph {
    let mut g = RawGraph::new();
    for i in 0..=20u64 {
        g.add_node(i, 4.0 + i as f64 * 0.0014, 50.0);
    }
    for i in 0..20u64 {
        g.add_road(i, i + 1, 100);
    }
    g
}

fn trace(steps: &[u32]) -> Vec<Coordinate> {
    steps
        .iter()
        .map(|&k| Coordinate::new(4.0 + k as f64 * 0.0007, 50.000_009))
        .collect()
}

#[test]
fn test_match_reproduces_trace() {
    let engine = engine(&road());
    let params = MatchParameters::new(trace(&[1, 2, 3, 4, 5, 6, 7, 8]));
    let out = engine.match_trace(&params).unwrap();
    let matchings = out["matchings"].as_array().unwrap();
    assert_eq!(matchings.len(), 1);
    assert!(f(&matchings[0]["confidence"]) > 0.9);
    assert!((f(&matchings[0]["distance"]) - 350.0).abs() < 10.0);
    for tp in out["tracepoints"].as_array().unwrap() {
        assert_eq!(tp["matchings_index"], 0);
        assert!((f(&tp["location"][1]) - 50.0).abs() < 1e-6);
    }
}

#[test]
fn test_match_splits_on_jump() {
    let engine = engine(&road());
    let params = MatchParameters::new(trace(&[4, 5, 6, 7, 27, 28, 29, 30]));
    let out = engine.match_trace(&params).unwrap();
    assert_eq!(out["matchings"].as_array().unwrap().len(), 2);
    assert_eq!(out["tracepoints"][7]["matchings_index"], 1);
}

#[test]
fn test_errors_carry_kinds() {
    let engine = engine(&grid_raw());

    let err = engine.route(&RouteParameters::new(vec![grid_points()[0]])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooFewWaypoints);

    let mut params = RouteParameters::new(vec![grid_points()[0], Coordinate::new(4.5, 51.0)]);
    params.base.radiuses = vec![None, Some(50.0)];
    let err = engine.route(&params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoCandidate);
    assert_eq!(err.code(), "NoSegment");

    let err = engine.tile(&TileParameters::new(1 << 14, 0, 14)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_disconnected_pair_is_no_route() {
    let mut raw = line_raw();
    raw.add_node(10, 4.0, 50.01)
        .add_node(11, 4.001, 50.01)
        .add_road(10, 11, 10);
    let store = wayfarer_route::contract::build(
        &raw,
        &wayfarer_route::BuildConfig {
            allow_disconnected: true,
            ..Default::default()
        },
    )
    .unwrap();
    let engine = Engine::from_store(store, EngineConfig::default()).unwrap();
    // the island is a tiny component, skipped unless snapping is "any"
    let mut route = RouteParameters::new(vec![line_point(1), Coordinate::new(4.0005, 50.01)]);
    route.base.snapping = Snapping::Any;
    let err = engine.route(&route).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoRoute);

    let mut table = TableParameters::new(vec![line_point(1), Coordinate::new(4.0005, 50.01)]);
    table.base.snapping = Snapping::Any;
    let out = engine.table(&table).unwrap();
    assert!(out["durations"][0][1].is_null());

    table.fallback_speed = Some(10.0);
    let out = engine.table(&table).unwrap();
    assert!(f(&out["durations"][0][1]) > 0.0);
    assert_eq!(out["fallback_speed_cells"], json!([[0, 1], [1, 0]]));
}

#[test]
fn test_tile_has_both_layers() {
    let engine = engine(&grid_raw());
    let n = f64::from(1u32 << 14);
    let x = ((4.352 + 180.0) / 360.0 * n).floor() as u32;
    let lat = 50.852f64.to_radians();
    let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * n).floor() as u32;
    let bytes = engine.tile(&TileParameters::new(x, y, 14)).unwrap();
    assert!(!bytes.is_empty());
}

#[test]
fn test_engine_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Engine>();
}
