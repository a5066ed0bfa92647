//! Offline hierarchy builder.
//!
//! Contracts the turn-expanded graph (one vertex per directed segment, one
//! arc per permitted turn) in order of a lazily updated priority:
//!
//! ```text
//! priority(v) = shortcuts(v) - (|in(v)| + |out(v)|) + contracted_neighbours(v)
//! ```
//!
//! Ties go to the lower vertex id. Removing a vertex adds a shortcut for
//! every in/out pair whose path through it is not matched by a witness.
//! The arcs a vertex still has when it is contracted all lead to higher
//! ranks and become its `up` (outgoing) and `down` (incoming) lists.

mod graph;
mod witness;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};
use wayfarer_common::{Error, Result};

use crate::config::BuildConfig;
use crate::graph::{Adjacency, GraphStore, RawGraph, INVALID_ID};
use graph::{ArcData, ContractionGraph};
use witness::WitnessSearch;

/// Validate `raw`, lay it out and contract it into a routable store
pub fn build(raw: &RawGraph, config: &BuildConfig) -> Result<GraphStore> {
    let start = Instant::now();
    let mut store = raw.assemble(config)?;
    let hierarchy = contract(&store, config);

    info!(
        vertices = store.edge_count(),
        up_arcs = hierarchy.up.arc_count(),
        down_arcs = hierarchy.down.arc_count(),
        shortcuts = hierarchy.up.shortcut_count() + hierarchy.down.shortcut_count(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "contraction complete"
    );

    store.rank = hierarchy.rank.into();
    store.up = hierarchy.up;
    store.down = hierarchy.down;
    store
        .check()
        .map_err(|reason| Error::Build(format!("inconsistent hierarchy: {reason}")))?;
    Ok(store)
}

struct Hierarchy {
    rank: Vec<u32>,
    up: Adjacency,
    down: Adjacency,
}

fn priority(
    graph: &ContractionGraph,
    v: u32,
    contracted_neighbours: u32,
    search: &mut WitnessSearch,
    config: &BuildConfig,
) -> i64 {
    let shortcuts = search
        .shortcuts(graph, v, config.witness_hop_limit, config.witness_settle_limit)
        .len() as i64;
    let removed = (graph.out(v).len() + graph.inc(v).len()) as i64;
    shortcuts - removed + contracted_neighbours as i64
}

fn contract(store: &GraphStore, config: &BuildConfig) -> Hierarchy {
    let mut graph = ContractionGraph::from_turns(store);
    let n = graph.len();
    info!(vertices = n, arcs = graph.arc_count(), "contracting turn graph");

    let initial: Vec<i64> = (0..n as u32)
        .into_par_iter()
        .map_init(WitnessSearch::new, |search, v| priority(&graph, v, 0, search, config))
        .collect();

    let mut prio = initial;
    let mut heap: BinaryHeap<Reverse<(i64, u32)>> =
        prio.iter().enumerate().map(|(v, &p)| Reverse((p, v as u32))).collect();
    let mut contracted = vec![false; n];
    let mut neighbours = vec![0u32; n];
    let mut rank = vec![INVALID_ID; n];
    let mut up: Vec<Vec<ArcData>> = vec![Vec::new(); n];
    let mut down: Vec<Vec<ArcData>> = vec![Vec::new(); n];
    let mut search = WitnessSearch::new();
    let mut next_rank = 0u32;

    while let Some(Reverse((p, v))) = heap.pop() {
        let vi = v as usize;
        if contracted[vi] || p != prio[vi] {
            continue;
        }
        // lazy update: re-queue when the priority went up since it was pushed
        let current = priority(&graph, v, neighbours[vi], &mut search, config);
        if current > p {
            prio[vi] = current;
            heap.push(Reverse((current, v)));
            continue;
        }

        let shortcuts =
            search.shortcuts(&graph, v, config.witness_hop_limit, config.witness_settle_limit);
        let (out, inc) = graph.detach(v);
        for s in &shortcuts {
            graph.insert(s.from, s.to, s.weight, s.distance, v);
        }

        contracted[vi] = true;
        rank[vi] = next_rank;
        next_rank += 1;
        if next_rank % 100_000 == 0 {
            debug!(contracted = next_rank, total = n, arcs = graph.arc_count(), "contraction progress");
        }

        let mut touched: Vec<u32> = out.iter().chain(&inc).map(|a| a.target).collect();
        touched.sort_unstable();
        touched.dedup();
        for u in touched {
            let ui = u as usize;
            neighbours[ui] += 1;
            let p = priority(&graph, u, neighbours[ui], &mut search, config);
            prio[ui] = p;
            heap.push(Reverse((p, u)));
        }

        up[vi] = out;
        down[vi] = inc;
    }

    Hierarchy {
        rank,
        up: to_adjacency(up),
        down: to_adjacency(down),
    }
}

/// Freeze per-vertex arc lists into CSR, neighbours sorted by id
fn to_adjacency(mut lists: Vec<Vec<ArcData>>) -> Adjacency {
    let total: usize = lists.iter().map(Vec::len).sum();
    let mut offsets = Vec::with_capacity(lists.len() + 1);
    let mut heads = Vec::with_capacity(total);
    let mut weights = Vec::with_capacity(total);
    let mut distances = Vec::with_capacity(total);
    let mut middles = Vec::with_capacity(total);
    offsets.push(0u64);
    for list in &mut lists {
        list.sort_unstable_by_key(|a| a.target);
        for a in list.iter() {
            heads.push(a.target);
            weights.push(a.weight);
            distances.push(a.distance);
            middles.push(a.middle);
        }
        offsets.push(heads.len() as u64);
    }
    Adjacency::new(offsets, heads, weights, distances, middles)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Contraction graph from (from, to, weight) arcs; distance equals weight
    pub(crate) fn graph(n: usize, arcs: &[(u32, u32, u32)]) -> ContractionGraph {
        let mut g = ContractionGraph::with_vertices(n);
        for &(a, b, w) in arcs {
            g.insert(a, b, w, w, INVALID_ID);
        }
        g
    }

    fn grid(n: u64) -> RawGraph {
        let mut g = RawGraph::new();
        for r in 0..n {
            for c in 0..n {
                g.add_node(r * n + c, 4.0 + c as f64 * 0.001, 50.0 + r as f64 * 0.001);
            }
        }
        for r in 0..n {
            for c in 0..n {
                let id = r * n + c;
                if c + 1 < n {
                    g.add_road(id, id + 1, 10 + ((r * 7 + c * 3) % 5) as u32);
                }
                if r + 1 < n {
                    g.add_road(id, id + n, 10 + ((r * 3 + c * 5) % 7) as u32);
                }
            }
        }
        g
    }

    #[test]
    fn test_ranks_are_a_permutation() {
        let store = build(&grid(4), &BuildConfig::default()).unwrap();
        let mut ranks: Vec<u32> = (0..store.edge_count() as u32).map(|v| store.rank(v)).collect();
        ranks.sort_unstable();
        let expected: Vec<u32> = (0..store.edge_count() as u32).collect();
        assert_eq!(ranks, expected);
    }

    #[test]
    fn test_hierarchy_arcs_point_upwards() {
        let store = build(&grid(4), &BuildConfig::default()).unwrap();
        for v in 0..store.edge_count() as u32 {
            for arc in store.up().arcs(v) {
                assert!(store.rank(arc.head) > store.rank(v));
            }
            for arc in store.down().arcs(v) {
                assert!(store.rank(arc.head) > store.rank(v));
            }
        }
    }

    #[test]
    fn test_shortcuts_unpack_to_their_weight() {
        let store = build(&grid(5), &BuildConfig::default()).unwrap();
        let mut seen = 0;
        for v in 0..store.edge_count() as u32 {
            for arc in store.up().arcs(v) {
                if let Some(mid) = arc.middle {
                    let first = store.down().find(mid, v).unwrap();
                    let second = store.up().find(mid, arc.head).unwrap();
                    assert_eq!(first.weight + second.weight, arc.weight);
                    assert_eq!(first.distance + second.distance, arc.distance);
                    seen += 1;
                }
            }
        }
        assert!(seen > 0, "a 5x5 grid should need shortcuts");
    }

    #[test]
    fn test_every_turn_survives_in_the_hierarchy() {
        let store = build(&grid(3), &BuildConfig::default()).unwrap();
        for from in 0..store.edge_count() as u32 {
            for turn in store.turns(from) {
                let arc = if store.rank(turn.to) > store.rank(from) {
                    store.up().find(from, turn.to)
                } else {
                    store.down().find(turn.to, from)
                };
                let arc = arc.expect("turn arc or a cheaper replacement");
                assert!(arc.weight <= turn.weight);
            }
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build(&grid(4), &BuildConfig::default()).unwrap();
        let b = build(&grid(4), &BuildConfig::default()).unwrap();
        assert_eq!(&*a.rank, &*b.rank);
        assert_eq!(&*a.up.heads, &*b.up.heads);
        assert_eq!(&*a.down.weights, &*b.down.weights);
    }
}
