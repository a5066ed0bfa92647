#![allow(dead_code)]

use wayfarer_route::api::Engine;
use wayfarer_route::geo::Coordinate;
use wayfarer_route::graph::{RawGraph, RestrictionKind};
use wayfarer_route::{BuildConfig, EngineConfig, GraphStore};

/// Nodes 1..=4 (A, B, C, D) 0.001 degrees apart, two-way roads of one second
pub fn line_raw() -> RawGraph {
    let mut g = RawGraph::new();
    for i in 0..4u64 {
        g.add_node(i + 1, 4.0 + i as f64 * 0.001, 50.0);
    }
    g.add_road(1, 2, 10).add_road(2, 3, 10).add_road(3, 4, 10);
    g
}

/// Coordinate of line node `i` (1-based)
pub fn line_point(i: u64) -> Coordinate {
    Coordinate::new(4.0 + (i - 1) as f64 * 0.001, 50.0)
}

/// 8x8 grid with uneven weights, a one-way row, a signal and two turn rules
pub fn grid_raw() -> RawGraph {
    let n = 8u64;
    let mut g = RawGraph::new();
    for r in 0..n {
        for c in 0..n {
            let (lon, lat) = (4.35 + c as f64 * 0.002, 50.85 + r as f64 * 0.0015);
            if r == 4 && c == 4 {
                g.add_signal(r * n + c, lon, lat);
            } else {
                g.add_node(r * n + c, lon, lat);
            }
        }
    }
    for r in 0..n {
        for c in 0..n {
            let id = r * n + c;
            if c + 1 < n {
                let w = 90 + ((r * 41 + c * 17) % 70) as u32;
                if r == 3 {
                    g.add_segment(id + 1, id, w);
                } else {
                    g.add_road(id, id + 1, w);
                }
            }
            if r + 1 < n {
                g.add_road(id, id + n, 110 + ((r * 23 + c * 7) % 40) as u32);
            }
        }
    }
    g.add_restriction(9, 10, 18, RestrictionKind::Forbid)
        .add_restriction(42, 43, 35, RestrictionKind::Penalty(150));
    g
}

/// Points scattered between grid nodes
pub fn grid_points() -> Vec<Coordinate> {
    [
        (4.3503, 50.8501),
        (4.3631, 50.8602),
        (4.3552, 50.8549),
        (4.3581, 50.8506),
        (4.3608, 50.8531),
        (4.3519, 50.8590),
        (4.3577, 50.8575),
    ]
    .iter()
    .map(|&(lon, lat)| Coordinate::new(lon, lat))
    .collect()
}

pub fn build(raw: &RawGraph) -> GraphStore {
    wayfarer_route::contract::build(raw, &BuildConfig::default()).unwrap()
}

pub fn engine(raw: &RawGraph) -> Engine {
    Engine::from_store(build(raw), EngineConfig::default()).unwrap()
}
