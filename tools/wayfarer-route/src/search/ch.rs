//! Bidirectional search over the contraction hierarchy.
//!
//! The forward search follows `up` arcs from the source seeds, the backward
//! search follows `down` arcs from the target seeds; both only climb in
//! rank. A direction stops once its smallest key reaches the best meeting
//! cost found so far.

use std::cmp::Reverse;

use priority_queue::PriorityQueue;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::unpack::unpack_chain;
use super::{point_to_point_seeds, table, CostMatrix, PathSearch, SearchPath, Seed, Seeds};
use crate::graph::GraphStore;
use crate::locate::PhantomNode;

/// Allowed excess of an alternative over the best route's weight
const ALTERNATIVE_STRETCH: f64 = 0.25;
/// Largest share of the best route's weight an alternative may reuse
const ALTERNATIVE_MAX_SHARING: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parent {
    Seed { origin: Option<u32> },
    Arc { from: u32, middle: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Label {
    pub weight: u32,
    pub distance: u32,
    parent: Parent,
}

/// One direction of an upward search with per-query scratch state
pub(crate) struct UpwardSearch {
    backward: bool,
    labels: FxHashMap<u32, Label>,
    queue: PriorityQueue<u32, Reverse<(u32, u32)>>,
    settled: Vec<u32>,
}

impl UpwardSearch {
    pub fn forward(seeds: &[Seed]) -> Self {
        Self::new(seeds, false)
    }

    pub fn backward(seeds: &[Seed]) -> Self {
        Self::new(seeds, true)
    }

    fn new(seeds: &[Seed], backward: bool) -> Self {
        let mut search = Self {
            backward,
            labels: FxHashMap::default(),
            queue: PriorityQueue::new(),
            settled: Vec::new(),
        };
        for seed in seeds {
            search.offer(
                seed.vertex,
                Label {
                    weight: seed.weight,
                    distance: seed.distance,
                    parent: Parent::Seed { origin: seed.origin },
                },
            );
        }
        search
    }

    fn offer(&mut self, v: u32, label: Label) {
        let better = match self.labels.get(&v) {
            Some(old) => (label.weight, label.distance) < (old.weight, old.distance),
            None => true,
        };
        if better {
            self.labels.insert(v, label);
            self.queue.push(v, Reverse((label.weight, label.distance)));
        }
    }

    pub fn peek_key(&self) -> Option<u32> {
        self.queue.peek().map(|(_, Reverse((w, _)))| *w)
    }

    pub fn label(&self, v: u32) -> Option<&Label> {
        self.labels.get(&v)
    }

    /// Settle the vertex with the smallest key and relax its arcs
    pub fn settle_next(&mut self, store: &GraphStore) -> Option<(u32, Label)> {
        let (v, _) = self.queue.pop()?;
        let label = self.labels[&v];
        self.settled.push(v);
        let arcs = if self.backward { store.down() } else { store.up() };
        for arc in arcs.arcs(v) {
            self.offer(
                arc.head,
                Label {
                    weight: label.weight.saturating_add(arc.weight),
                    distance: label.distance.saturating_add(arc.distance),
                    parent: Parent::Arc {
                        from: v,
                        middle: arc.middle,
                    },
                },
            );
        }
        Some((v, label))
    }

    /// Settle everything reachable upwards, returning (vertex, weight, distance)
    pub fn exhaust(mut self, store: &GraphStore) -> Vec<(u32, u32, u32)> {
        let mut out = Vec::new();
        while let Some((v, label)) = self.settle_next(store) {
            out.push((v, label.weight, label.distance));
        }
        out
    }

    /// Segments from the seed to `v` (forward) or from `v` to the seed
    /// (backward), in travel order
    fn path(&self, store: &GraphStore, v: u32) -> Vec<u32> {
        let mut arcs = Vec::new();
        let mut cur = v;
        let origin = loop {
            match self.labels[&cur].parent {
                Parent::Seed { origin } => break origin,
                Parent::Arc { from, middle } => {
                    if self.backward {
                        arcs.push((cur, from, middle));
                    } else {
                        arcs.push((from, cur, middle));
                    }
                    cur = from;
                }
            }
        };
        if self.backward {
            unpack_chain(store, v, &arcs)
        } else {
            arcs.reverse();
            let mut out = Vec::with_capacity(arcs.len() + 2);
            out.extend(origin);
            out.extend(unpack_chain(store, cur, &arcs));
            out
        }
    }
}

/// Best meeting vertex found so far: (weight, distance, vertex)
type Meeting = (u32, u32, u32);

fn improves(best: Option<Meeting>, candidate: Meeting) -> bool {
    best.map_or(true, |b| (candidate.0, candidate.1) < (b.0, b.1))
}

/// Run both directions until neither can improve the meeting. Meetings
/// below `shift` pair a source with a target behind it and are skipped.
fn bidirectional(
    store: &GraphStore,
    fwd: &mut UpwardSearch,
    bwd: &mut UpwardSearch,
    shift: u32,
) -> Option<Meeting> {
    let mut best: Option<Meeting> = None;
    loop {
        let limit = best.map(|b| b.0);
        let open = |k: Option<u32>| k.filter(|&k| limit.map_or(true, |l| k < l));
        let forward_turn = match (open(fwd.peek_key()), open(bwd.peek_key())) {
            (None, None) => break,
            (Some(a), Some(b)) => a <= b,
            (Some(_), None) => true,
            (None, Some(_)) => false,
        };
        let (this, other) = if forward_turn { (&mut *fwd, &*bwd) } else { (&mut *bwd, &*fwd) };
        let Some((v, label)) = this.settle_next(store) else {
            continue;
        };
        if let Some(o) = other.label(v) {
            let total = label.weight.saturating_add(o.weight);
            let distance = label.distance.saturating_add(o.distance);
            if total >= shift && improves(best, (total, distance, v)) {
                best = Some((total, distance, v));
            }
        }
    }
    best
}

fn path_through(
    store: &GraphStore,
    fwd: &UpwardSearch,
    bwd: &UpwardSearch,
    meet: u32,
) -> Vec<u32> {
    let mut segments = fwd.path(store, meet);
    segments.extend(bwd.path(store, meet).into_iter().skip(1));
    segments
}

/// Contraction-hierarchy backend
#[derive(Debug, Clone, Copy, Default)]
pub struct ChSearch;

impl ChSearch {
    fn query(&self, store: &GraphStore, seeds: &Seeds) -> Option<SearchPath> {
        let mut fwd = UpwardSearch::forward(&seeds.forward);
        let mut bwd = UpwardSearch::backward(&seeds.backward);
        let (weight, distance, meet) = bidirectional(store, &mut fwd, &mut bwd, seeds.weight_shift)?;
        Some(SearchPath {
            weight: weight - seeds.weight_shift,
            distance: distance.saturating_sub(seeds.distance_shift),
            segments: path_through(store, &fwd, &bwd, meet),
        })
    }

    /// Via-vertex alternatives: vertices settled by both searches whose
    /// combined path stays within the stretch, is loop-free and does not
    /// reuse too much of the routes already chosen
    fn alternatives(&self, store: &GraphStore, seeds: &Seeds, best: &SearchPath, max: usize) -> Vec<SearchPath> {
        let bound = seeds
            .weight_shift
            .saturating_add((best.weight as f64 * (1.0 + ALTERNATIVE_STRETCH)).ceil() as u32)
            .saturating_add(1);
        let mut fwd = UpwardSearch::forward(&seeds.forward);
        let mut bwd = UpwardSearch::backward(&seeds.backward);
        while fwd.peek_key().is_some_and(|k| k < bound) {
            fwd.settle_next(store);
        }
        while bwd.peek_key().is_some_and(|k| k < bound) {
            bwd.settle_next(store);
        }

        let bwd_settled: FxHashSet<u32> = bwd.settled.iter().copied().collect();
        let mut candidates: Vec<(u32, u32, u32)> = fwd
            .settled
            .iter()
            .filter(|v| bwd_settled.contains(v))
            .filter_map(|&v| {
                let f = fwd.label(v)?;
                let b = bwd.label(v)?;
                let total = f.weight.checked_add(b.weight)?;
                (total >= seeds.weight_shift && total < bound)
                    .then(|| (total, f.distance.saturating_add(b.distance), v))
            })
            .collect();
        candidates.sort_unstable();

        let mut chosen: Vec<SearchPath> = vec![best.clone()];
        for (total, distance, v) in candidates {
            if chosen.len() > max {
                break;
            }
            let segments = path_through(store, &fwd, &bwd, v);
            let mut seen = FxHashSet::default();
            if !segments.iter().all(|s| seen.insert(*s)) {
                continue;
            }
            let acceptable = chosen.iter().all(|other| {
                let shared = shared_weight(store, &segments, &other.segments);
                segments != other.segments
                    && (shared as f64) <= ALTERNATIVE_MAX_SHARING * other.weight.max(1) as f64
            });
            if acceptable {
                chosen.push(SearchPath {
                    weight: total - seeds.weight_shift,
                    distance: distance.saturating_sub(seeds.distance_shift),
                    segments,
                });
            }
        }
        debug!(found = chosen.len() - 1, "alternative search");
        chosen.remove(0);
        chosen
    }
}

fn shared_weight(store: &GraphStore, a: &[u32], b: &[u32]) -> u64 {
    let in_b: FxHashSet<u32> = b.iter().copied().collect();
    a.iter()
        .filter(|s| in_b.contains(s))
        .map(|&s| store.edge_weight(s) as u64)
        .sum()
}

impl PathSearch for ChSearch {
    fn shortest_path(&self, store: &GraphStore, source: &PhantomNode, target: &PhantomNode) -> Option<SearchPath> {
        let seeds = point_to_point_seeds(store, source, target);
        self.query(store, &seeds)
    }

    fn many_to_many(&self, store: &GraphStore, sources: &[PhantomNode], targets: &[PhantomNode]) -> CostMatrix {
        table::bucket_many_to_many(store, sources, targets, |s, t| self.shortest_path(store, s, t))
    }

    fn route_with_alternatives(
        &self,
        store: &GraphStore,
        source: &PhantomNode,
        target: &PhantomNode,
        max_alternatives: usize,
    ) -> Vec<SearchPath> {
        let seeds = point_to_point_seeds(store, source, target);
        let Some(best) = self.query(store, &seeds) else {
            return Vec::new();
        };
        let alternatives = if max_alternatives > 0 {
            self.alternatives(store, &seeds, &best, max_alternatives)
        } else {
            Vec::new()
        };
        let mut routes = Vec::with_capacity(1 + alternatives.len());
        routes.push(best);
        routes.extend(alternatives);
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::{grid, line, snap};
    use crate::search::DijkstraSearch;

    #[test]
    fn test_line_route_visits_every_node() {
        let store = line();
        let a = snap(&store, 4.0, 50.0);
        let d = snap(&store, 4.003, 50.0);
        let path = ChSearch.shortest_path(&store, &a, &d).unwrap();
        assert_eq!(path.weight, 3);
        let nodes: Vec<u64> = std::iter::once(store.node_id(store.edge_tail(path.segments[0])))
            .chain(path.segments.iter().map(|&s| store.node_id(store.edge_head(s))))
            .collect();
        assert_eq!(nodes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_matches_dijkstra_on_grid() {
        let store = grid();
        let points: Vec<PhantomNode> = [
            (4.0003, 50.0), (4.0101, 50.0051), (4.004, 50.0079), (4.0061, 50.0021),
            (4.0, 50.01), (4.0083, 50.0103), (4.0021, 50.004),
        ]
        .iter()
        .map(|&(lon, lat)| snap(&store, lon, lat))
        .collect();
        for s in &points {
            for t in &points {
                let ch = ChSearch.shortest_path(&store, s, t).map(|p| p.weight);
                let dj = DijkstraSearch.shortest_path(&store, s, t).map(|p| p.weight);
                assert_eq!(ch, dj);
            }
        }
    }

    #[test]
    fn test_source_behind_target_drives_around() {
        let store = grid();
        // both on the one-way row r == 2 between nodes 12 and 13
        let ahead = snap(&store, 4.0015, 50.004);
        let behind = snap(&store, 4.0005, 50.004);
        let direct = ChSearch.shortest_path(&store, &behind, &ahead).unwrap();
        assert_eq!(direct.segments.len(), 1);
        let around = ChSearch.shortest_path(&store, &ahead, &behind).unwrap();
        assert!(around.segments.len() > 2);
        assert_eq!(around.segments.first(), around.segments.last());
        assert_eq!(
            Some(around.weight),
            DijkstraSearch.shortest_path(&store, &ahead, &behind).map(|p| p.weight)
        );
    }

    #[test]
    fn test_alternatives_are_distinct_and_bounded() {
        let store = grid();
        let s = snap(&store, 4.0, 50.0);
        let t = snap(&store, 4.01, 50.01);
        let routes = ChSearch.route_with_alternatives(&store, &s, &t, 2);
        assert!(!routes.is_empty());
        let best = routes[0].weight;
        for alt in &routes[1..] {
            assert_ne!(alt.segments, routes[0].segments);
            assert!(alt.weight as f64 <= best as f64 * (1.0 + ALTERNATIVE_STRETCH) + 1.0);
            assert!(alt.weight >= best);
        }
    }
}
