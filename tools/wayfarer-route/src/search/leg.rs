//! Turning a [`SearchPath`] into the geometry and per-piece costs of a leg.
//!
//! A leg over segments `s0 .. sk` has `k + 2` coordinates: the source's
//! snapped location, the head node of every segment but the last, and the
//! target's snapped location. Each piece between two consecutive
//! coordinates carries the cost of getting there:
//!
//! - first piece: the rest of `s0` after the source offset,
//! - middle pieces: the turn penalty into the segment plus its weight,
//! - last piece: the turn penalty into `sk` plus the target offset,
//!
//! and a single-segment leg is just the difference of the two offsets.
//! The pieces therefore always sum to the path's weight and distance.

use super::SearchPath;
use crate::geo::Coordinate;
use crate::graph::GraphStore;
use crate::locate::{PhantomNode, PhantomSegment};

/// Cost of one coordinate pair along a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Piece {
    /// Deciseconds
    pub weight: u32,
    /// Decimeters
    pub distance: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub weight: u32,
    pub distance: u32,
    pub coordinates: Vec<Coordinate>,
    /// One entry per coordinate pair
    pub pieces: Vec<Piece>,
    /// External ids of the road nodes passed, tail of the first segment
    /// through head of the last
    pub nodes: Vec<u64>,
}

impl Leg {
    /// Concatenate legs that meet at via points into one
    pub fn join(parts: Vec<Leg>) -> Leg {
        let mut parts = parts.into_iter();
        let Some(mut joined) = parts.next() else {
            return Leg {
                weight: 0,
                distance: 0,
                coordinates: Vec::new(),
                pieces: Vec::new(),
                nodes: Vec::new(),
            };
        };
        for part in parts {
            joined.weight += part.weight;
            joined.distance += part.distance;
            joined.coordinates.extend(part.coordinates.into_iter().skip(1));
            joined.pieces.extend(part.pieces);
            // a via point inside a segment repeats that segment's nodes
            let n = joined.nodes.len();
            let overlap = if n >= 2 && part.nodes.starts_with(&joined.nodes[n - 2..]) {
                2
            } else if n >= 1 && part.nodes.first() == joined.nodes.last() {
                1
            } else {
                0
            };
            joined.nodes.extend(part.nodes.into_iter().skip(overlap));
        }
        joined
    }
}

fn phantom_on(phantom: &PhantomNode, segment: u32) -> PhantomSegment {
    phantom
        .segments()
        .find(|s| s.segment == segment)
        .unwrap_or(PhantomSegment {
            segment,
            weight_offset: 0,
            distance_offset: 0,
            ratio: 0.0,
        })
}

fn turn_penalty(store: &GraphStore, from: u32, to: u32) -> u32 {
    store.turn_between(from, to).map_or(0, |t| t.penalty)
}

/// Lay out the leg from `source` to `target` along `path`
pub fn assemble(store: &GraphStore, source: &PhantomNode, target: &PhantomNode, path: &SearchPath) -> Leg {
    let segments = &path.segments;
    let Some((&first, &last)) = segments.first().zip(segments.last()) else {
        return Leg {
            weight: 0,
            distance: 0,
            coordinates: vec![source.location, target.location],
            pieces: vec![Piece::default()],
            nodes: Vec::new(),
        };
    };
    let s = phantom_on(source, first);
    let t = phantom_on(target, last);

    let mut coordinates = Vec::with_capacity(segments.len() + 1);
    let mut pieces = Vec::with_capacity(segments.len());
    coordinates.push(source.location);

    if segments.len() == 1 {
        pieces.push(Piece {
            weight: t.weight_offset.saturating_sub(s.weight_offset),
            distance: t.distance_offset.saturating_sub(s.distance_offset),
        });
    } else {
        pieces.push(Piece {
            weight: store.edge_weight(first).saturating_sub(s.weight_offset),
            distance: store.edge_distance(first).saturating_sub(s.distance_offset),
        });
        coordinates.push(store.node_coordinate(store.edge_head(first)));
        for w in segments[..segments.len() - 1].windows(2) {
            let (prev, seg) = (w[0], w[1]);
            pieces.push(Piece {
                weight: turn_penalty(store, prev, seg).saturating_add(store.edge_weight(seg)),
                distance: store.edge_distance(seg),
            });
            coordinates.push(store.node_coordinate(store.edge_head(seg)));
        }
        let before_last = segments[segments.len() - 2];
        pieces.push(Piece {
            weight: turn_penalty(store, before_last, last).saturating_add(t.weight_offset),
            distance: t.distance_offset,
        });
    }
    coordinates.push(target.location);

    let mut nodes = Vec::with_capacity(segments.len() + 1);
    nodes.push(store.node_id(store.edge_tail(first)));
    nodes.extend(segments.iter().map(|&seg| store.node_id(store.edge_head(seg))));

    Leg {
        weight: path.weight,
        distance: path.distance,
        coordinates,
        pieces,
        nodes,
    }
}
