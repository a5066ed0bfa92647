//! Path Engine: point-to-point, many-to-many and trip searches between
//! snapped positions.
//!
//! Searches run over the turn-expanded graph, where a label at vertex `s`
//! is the cost of reaching the tail of segment `s`. A source snapped at
//! offset `o` into `s` therefore starts at `-o`; every source label is
//! shifted by the largest such offset so labels stay unsigned, and the shift
//! is subtracted from the result.

pub mod ch;
pub mod dijkstra;
pub mod leg;
mod table;
pub mod trip;
mod unpack;

use tracing::debug;

use crate::graph::GraphStore;
use crate::locate::PhantomNode;

pub use ch::ChSearch;
pub use dijkstra::DijkstraSearch;

/// Initial label of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed {
    pub vertex: u32,
    pub weight: u32,
    pub distance: u32,
    /// Segment traversed before `vertex` when the source had to be left
    /// through its successors
    pub origin: Option<u32>,
}

/// Seeds for both directions of one source/target pair
#[derive(Debug, Clone, Default)]
pub struct Seeds {
    pub forward: Vec<Seed>,
    pub backward: Vec<Seed>,
    pub weight_shift: u32,
    pub distance_shift: u32,
}

/// Forward seeds of `source` with their shifts
pub(crate) fn source_seeds(source: &PhantomNode) -> (Vec<Seed>, u32, u32) {
    let weight_shift = source.segments().map(|s| s.weight_offset).max().unwrap_or(0);
    let distance_shift = source.segments().map(|s| s.distance_offset).max().unwrap_or(0);
    let seeds = source
        .segments()
        .map(|s| Seed {
            vertex: s.segment,
            weight: weight_shift - s.weight_offset,
            distance: distance_shift - s.distance_offset,
            origin: None,
        })
        .collect();
    (seeds, weight_shift, distance_shift)
}

pub(crate) fn target_seeds(target: &PhantomNode) -> Vec<Seed> {
    target
        .segments()
        .map(|s| Seed {
            vertex: s.segment,
            weight: s.weight_offset,
            distance: s.distance_offset,
            origin: None,
        })
        .collect()
}

/// True when some segment holds both points with the source further along,
/// so reaching the target needs a detour around the block
pub(crate) fn needs_loop(source: &PhantomNode, target: &PhantomNode) -> bool {
    source.segments().any(|s| {
        target
            .segments()
            .any(|t| t.segment == s.segment && s.ratio > t.ratio)
    })
}

/// Seeds for a point-to-point search. A source segment that also holds
/// the target behind the source is replaced by its successors.
pub(crate) fn point_to_point_seeds(store: &GraphStore, source: &PhantomNode, target: &PhantomNode) -> Seeds {
    let (mut forward, weight_shift, distance_shift) = source_seeds(source);
    let backward = target_seeds(target);

    let looped: Vec<u32> = source
        .segments()
        .filter(|s| {
            target
                .segments()
                .any(|t| t.segment == s.segment && s.ratio > t.ratio)
        })
        .map(|s| s.segment)
        .collect();
    if !looped.is_empty() {
        let mut replaced = Vec::with_capacity(forward.len());
        for seed in forward {
            if !looped.contains(&seed.vertex) {
                replaced.push(seed);
                continue;
            }
            store.for_each_turn(seed.vertex, |turn| {
                replaced.push(Seed {
                    vertex: turn.to,
                    weight: seed.weight.saturating_add(turn.weight),
                    distance: seed.distance.saturating_add(turn.distance),
                    origin: Some(seed.vertex),
                });
            });
        }
        forward = replaced;
    }

    Seeds {
        forward,
        backward,
        weight_shift,
        distance_shift,
    }
}

/// A path between two snapped positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    /// Deciseconds between the two positions
    pub weight: u32,
    /// Decimeters between the two positions
    pub distance: u32,
    /// Directed segments in travel order, from the source's segment to the
    /// target's
    pub segments: Vec<u32>,
}

/// Dense sources x targets result of a many-to-many search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostMatrix {
    pub rows: usize,
    pub cols: usize,
    weights: Vec<Option<u32>>,
    distances: Vec<Option<u32>>,
}

impl CostMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            weights: vec![None; rows * cols],
            distances: vec![None; rows * cols],
        }
    }

    pub fn weight(&self, i: usize, j: usize) -> Option<u32> {
        self.weights[i * self.cols + j]
    }

    pub fn distance(&self, i: usize, j: usize) -> Option<u32> {
        self.distances[i * self.cols + j]
    }

    pub fn set(&mut self, i: usize, j: usize, weight: u32, distance: u32) {
        self.weights[i * self.cols + j] = Some(weight);
        self.distances[i * self.cols + j] = Some(distance);
    }

    /// Overwrite row `i` from (weight, distance) pairs
    pub(crate) fn set_row(&mut self, i: usize, row: &[Option<(u32, u32)>]) {
        for (j, cell) in row.iter().enumerate() {
            self.weights[i * self.cols + j] = cell.map(|c| c.0);
            self.distances[i * self.cols + j] = cell.map(|c| c.1);
        }
    }
}

/// Search backend answering queries between snapped positions
pub trait PathSearch: Send + Sync {
    fn shortest_path(&self, store: &GraphStore, source: &PhantomNode, target: &PhantomNode) -> Option<SearchPath>;

    fn many_to_many(&self, store: &GraphStore, sources: &[PhantomNode], targets: &[PhantomNode]) -> CostMatrix;

    /// The best path followed by up to `max_alternatives` alternatives.
    ///
    /// Backends without an alternative search (such as [`DijkstraSearch`])
    /// keep this default, which answers with the best path alone.
    fn route_with_alternatives(
        &self,
        store: &GraphStore,
        source: &PhantomNode,
        target: &PhantomNode,
        max_alternatives: usize,
    ) -> Vec<SearchPath> {
        if max_alternatives > 0 {
            debug!(requested = max_alternatives, "backend has no alternative search; returning the best path only");
        }
        self.shortest_path(store, source, target).into_iter().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::geo::Coordinate;
    use crate::graph::RawGraph;
    use crate::locate::{CandidateFilter, Locator};

    /// Nodes 1..=4 on a line 0.001 degrees apart, unit-weight two-way roads
    pub(crate) fn line() -> GraphStore {
        let mut g = RawGraph::new();
        for i in 0..4u64 {
            g.add_node(i + 1, 4.0 + i as f64 * 0.001, 50.0);
        }
        g.add_road(1, 2, 1).add_road(2, 3, 1).add_road(3, 4, 1);
        crate::contract::build(&g, &BuildConfig::default()).unwrap()
    }

    /// A 6x6 grid of two-way roads with uneven weights, a few one-ways and
    /// a forbidden turn
    pub(crate) fn grid() -> GraphStore {
        let n = 6u64;
        let mut g = RawGraph::new();
        for r in 0..n {
            for c in 0..n {
                g.add_node(r * n + c, 4.0 + c as f64 * 0.002, 50.0 + r as f64 * 0.002);
            }
        }
        for r in 0..n {
            for c in 0..n {
                let id = r * n + c;
                if c + 1 < n {
                    let w = 100 + ((r * 37 + c * 11) % 60) as u32;
                    if r == 2 {
                        g.add_segment(id, id + 1, w);
                    } else {
                        g.add_road(id, id + 1, w);
                    }
                }
                if r + 1 < n {
                    g.add_road(id, id + n, 120 + ((r * 13 + c * 29) % 50) as u32);
                }
            }
        }
        g.add_restriction(14, 15, 21, crate::graph::RestrictionKind::Forbid);
        crate::contract::build(&g, &BuildConfig::default()).unwrap()
    }

    pub(crate) fn snap(store: &GraphStore, lon: f64, lat: f64) -> PhantomNode {
        Locator::new(store).nearest(store, Coordinate::new(lon, lat), &CandidateFilter::default())[0]
    }

    #[test]
    fn test_loop_detection_uses_ratios() {
        let store = line();
        let a = snap(&store, 4.0008, 50.0);
        let b = snap(&store, 4.0002, 50.0);
        assert!(needs_loop(&a, &b));
        assert!(needs_loop(&b, &a));
        let seeds = point_to_point_seeds(&store, &a, &b);
        assert!(seeds.forward.iter().any(|s| s.origin.is_some()));
    }
}
