//! Plain Dijkstra over the turn-expanded graph. Slower than the hierarchy
//! but needs no preprocessing, which makes it the reference the CH backend
//! is checked against.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rayon::prelude::*;

use super::{point_to_point_seeds, CostMatrix, PathSearch, SearchPath, Seeds};
use crate::graph::{GraphStore, INVALID_ID};
use crate::locate::PhantomNode;

#[derive(Debug, Clone, Copy, Default)]
pub struct DijkstraSearch;

impl DijkstraSearch {
    fn query(&self, store: &GraphStore, seeds: &Seeds) -> Option<SearchPath> {
        let n = store.edge_count();
        let mut dist = vec![(u32::MAX, u32::MAX); n];
        // INVALID_ID marks a seed; origins of successor seeds live apart
        let mut parent = vec![INVALID_ID; n];
        let mut origin = vec![None; n];
        let mut heap: BinaryHeap<Reverse<(u32, u32, u32)>> = BinaryHeap::new();

        for seed in &seeds.forward {
            let v = seed.vertex as usize;
            if (seed.weight, seed.distance) < dist[v] {
                dist[v] = (seed.weight, seed.distance);
                parent[v] = INVALID_ID;
                origin[v] = seed.origin;
                heap.push(Reverse((seed.weight, seed.distance, seed.vertex)));
            }
        }

        let mut best: Option<(u32, u32, u32)> = None;
        while let Some(Reverse((w, d, u))) = heap.pop() {
            if (w, d) > dist[u as usize] {
                continue;
            }
            if best.is_some_and(|b| w >= b.0) {
                break;
            }
            for t in seeds.backward.iter().filter(|t| t.vertex == u) {
                let total = w.saturating_add(t.weight);
                let distance = d.saturating_add(t.distance);
                if total >= seeds.weight_shift && best.map_or(true, |b| (total, distance) < (b.0, b.1)) {
                    best = Some((total, distance, u));
                }
            }
            store.for_each_turn(u, |turn| {
                let next = (w.saturating_add(turn.weight), d.saturating_add(turn.distance));
                let v = turn.to as usize;
                if next < dist[v] {
                    dist[v] = next;
                    parent[v] = u;
                    origin[v] = None;
                    heap.push(Reverse((next.0, next.1, turn.to)));
                }
            });
        }

        let (weight, distance, meet) = best?;
        let mut segments = vec![meet];
        let mut cur = meet;
        while parent[cur as usize] != INVALID_ID {
            cur = parent[cur as usize];
            segments.push(cur);
        }
        segments.extend(origin[cur as usize]);
        segments.reverse();
        Some(SearchPath {
            weight: weight - seeds.weight_shift,
            distance: distance.saturating_sub(seeds.distance_shift),
            segments,
        })
    }
}

impl PathSearch for DijkstraSearch {
    fn shortest_path(&self, store: &GraphStore, source: &PhantomNode, target: &PhantomNode) -> Option<SearchPath> {
        let seeds = point_to_point_seeds(store, source, target);
        self.query(store, &seeds)
    }

    fn many_to_many(&self, store: &GraphStore, sources: &[PhantomNode], targets: &[PhantomNode]) -> CostMatrix {
        let rows: Vec<Vec<Option<(u32, u32)>>> = sources
            .par_iter()
            .map(|s| {
                targets
                    .iter()
                    .map(|t| self.shortest_path(store, s, t).map(|p| (p.weight, p.distance)))
                    .collect()
            })
            .collect();
        let mut matrix = CostMatrix::new(sources.len(), targets.len());
        for (i, row) in rows.iter().enumerate() {
            matrix.set_row(i, row);
        }
        matrix
    }
}
