//! Local Dijkstra deciding which shortcuts a contraction needs

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use super::graph::{ArcData, ContractionGraph};

/// Reusable scratch space for witness searches
#[derive(Default)]
pub(crate) struct WitnessSearch {
    /// vertex -> (weight, hops)
    labels: FxHashMap<u32, (u32, u32)>,
    heap: BinaryHeap<Reverse<(u32, u32)>>,
}

/// A shortcut `from -> to` bypassing the contracted vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShortcutCandidate {
    pub from: u32,
    pub to: u32,
    pub weight: u32,
    pub distance: u32,
}

impl WitnessSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dijkstra from `source` over the remaining graph without `avoid`,
    /// stopping beyond `limit`, at `hop_limit` hops or after `settle_limit`
    /// settled vertices
    fn run(
        &mut self,
        graph: &ContractionGraph,
        source: u32,
        avoid: u32,
        limit: u32,
        hop_limit: u32,
        settle_limit: usize,
    ) {
        self.labels.clear();
        self.heap.clear();
        self.labels.insert(source, (0, 0));
        self.heap.push(Reverse((0, source)));
        let mut settled = 0usize;

        while let Some(Reverse((weight, v))) = self.heap.pop() {
            let (best, hops) = self.labels[&v];
            if weight > best {
                continue;
            }
            if weight > limit || settled >= settle_limit {
                break;
            }
            settled += 1;
            if hops >= hop_limit {
                continue;
            }
            for arc in graph.out(v) {
                if arc.target == avoid {
                    continue;
                }
                let next = weight.saturating_add(arc.weight);
                if next > limit {
                    continue;
                }
                let improved = match self.labels.get(&arc.target) {
                    Some(&(w, _)) => next < w,
                    None => true,
                };
                if improved {
                    self.labels.insert(arc.target, (next, hops + 1));
                    self.heap.push(Reverse((next, arc.target)));
                }
            }
        }
    }

    fn distance(&self, v: u32) -> Option<u32> {
        self.labels.get(&v).map(|&(w, _)| w)
    }

    /// Shortcuts needed so that removing `v` keeps every shortest path
    /// between its remaining neighbours
    pub fn shortcuts(
        &mut self,
        graph: &ContractionGraph,
        v: u32,
        hop_limit: u32,
        settle_limit: usize,
    ) -> Vec<ShortcutCandidate> {
        let outgoing: &[ArcData] = graph.out(v);
        let mut found = Vec::new();
        if outgoing.is_empty() {
            return found;
        }
        let max_out = outgoing.iter().map(|a| a.weight).max().unwrap_or(0);

        for incoming in graph.inc(v) {
            let u = incoming.target;
            let limit = incoming.weight.saturating_add(max_out);
            self.run(graph, u, v, limit, hop_limit, settle_limit);
            for out in outgoing {
                let x = out.target;
                if x == u {
                    continue;
                }
                let via = incoming.weight.saturating_add(out.weight);
                let witnessed = self.distance(x).is_some_and(|d| d <= via);
                if !witnessed {
                    found.push(ShortcutCandidate {
                        from: u,
                        to: x,
                        weight: via,
                        distance: incoming.distance.saturating_add(out.distance),
                    });
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::INVALID_ID;

    #[test]
    fn test_witness_avoids_shortcut() {
        // 0 -> 1 -> 2 costs 2, the direct 0 -> 2 costs 2 as well
        let mut g = crate::contract::tests::graph(3, &[(0, 1, 1), (1, 2, 1), (0, 2, 2)]);
        let mut ws = WitnessSearch::new();
        assert!(ws.shortcuts(&g, 1, 8, 100).is_empty());

        g.insert(0, 2, 5, 5, INVALID_ID);
        // insert keeps the cheaper arc, so the witness still holds
        assert!(ws.shortcuts(&g, 1, 8, 100).is_empty());
    }

    #[test]
    fn test_missing_witness_needs_shortcut() {
        let g = crate::contract::tests::graph(4, &[(0, 1, 1), (1, 2, 1), (0, 3, 1), (3, 2, 5)]);
        let mut ws = WitnessSearch::new();
        let found = ws.shortcuts(&g, 1, 8, 100);
        assert_eq!(
            found,
            vec![ShortcutCandidate {
                from: 0,
                to: 2,
                weight: 2,
                distance: 2,
            }]
        );
    }

    #[test]
    fn test_no_shortcut_back_to_source() {
        let g = crate::contract::tests::graph(2, &[(0, 1, 1), (1, 0, 1)]);
        let mut ws = WitnessSearch::new();
        assert!(ws.shortcuts(&g, 1, 8, 100).is_empty());
    }
}
