//! Validation of hierarchy query correctness
//!
//! Compares hierarchy answers against plain Dijkstra on the turn-expanded
//! graph, for random snapped positions. Both the point-to-point and the
//! many-to-many paths are checked.

use rand::prelude::*;
use rand::SeedableRng;
use tracing::{info, warn};
use wayfarer_common::{Error, Result};

use crate::geo::interpolate;
use crate::graph::GraphStore;
use crate::locate::{CandidateFilter, Locator, PhantomNode};
use crate::search::{ChSearch, DijkstraSearch, PathSearch};

/// Mismatches kept for the report
const MAX_REPORTED: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub source: usize,
    pub target: usize,
    pub dijkstra: Option<u32>,
    pub ch: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub queries: usize,
    pub correct: usize,
    pub unreachable_both: usize,
    pub mismatches: Vec<Mismatch>,
    pub incorrect: usize,
}

impl ValidationReport {
    fn record(&mut self, source: usize, target: usize, dijkstra: Option<u32>, ch: Option<u32>) {
        self.queries += 1;
        if dijkstra == ch {
            self.correct += 1;
            if dijkstra.is_none() {
                self.unreachable_both += 1;
            }
            return;
        }
        self.incorrect += 1;
        if self.mismatches.len() < MAX_REPORTED {
            self.mismatches.push(Mismatch {
                source,
                target,
                dijkstra,
                ch,
            });
        }
    }

    pub fn passed(&self) -> bool {
        self.incorrect == 0
    }
}

/// `count` snapped positions at random points along random segments
pub fn random_positions(store: &GraphStore, count: usize, seed: u64) -> Result<Vec<PhantomNode>> {
    if store.edge_count() == 0 {
        return Err(Error::InsufficientData("graph has no segments".into()));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let locator = Locator::new(store);
    let filter = CandidateFilter::default();
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let e = rng.random_range(0..store.edge_count() as u32);
        let t: f64 = rng.random();
        let point = interpolate(
            store.node_coordinate(store.edge_tail(e)),
            store.node_coordinate(store.edge_head(e)),
            t,
        );
        if let Some(p) = locator.nearest(store, point, &filter).into_iter().next() {
            out.push(p);
        }
    }
    Ok(out)
}

/// Check `queries` random point-to-point queries and one `matrix_size`
/// square table
pub fn validate(store: &GraphStore, queries: usize, matrix_size: usize, seed: u64) -> Result<ValidationReport> {
    let points = random_positions(store, queries * 2, seed)?;
    let mut report = ValidationReport::default();

    for (i, pair) in points.chunks_exact(2).enumerate() {
        let (s, t) = (&pair[0], &pair[1]);
        let truth = DijkstraSearch.shortest_path(store, s, t).map(|p| p.weight);
        let ch = ChSearch.shortest_path(store, s, t).map(|p| p.weight);
        report.record(2 * i, 2 * i + 1, truth, ch);
        if (i + 1) % 100 == 0 {
            info!(done = i + 1, total = queries, incorrect = report.incorrect, "point-to-point");
        }
    }

    let table = random_positions(store, matrix_size, seed.wrapping_add(1))?;
    let truth = DijkstraSearch.many_to_many(store, &table, &table);
    let ch = ChSearch.many_to_many(store, &table, &table);
    for i in 0..matrix_size {
        for j in 0..matrix_size {
            report.record(i, j, truth.weight(i, j), ch.weight(i, j));
        }
    }

    if report.passed() {
        info!(queries = report.queries, unreachable = report.unreachable_both, "validation passed");
    } else {
        for m in &report.mismatches {
            warn!(source = m.source, target = m.target, dijkstra = ?m.dijkstra, ch = ?m.ch, "mismatch");
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::grid;

    #[test]
    fn test_grid_validates() {
        let store = grid();
        let report = validate(&store, 50, 6, 42).unwrap();
        assert_eq!(report.queries, 50 + 36);
        assert!(report.passed(), "{:?}", report.mismatches);
    }

    #[test]
    fn test_positions_are_seeded() {
        let store = grid();
        let a = random_positions(&store, 5, 7).unwrap();
        let b = random_positions(&store, 5, 7).unwrap();
        assert_eq!(
            a.iter().map(|p| p.location).collect::<Vec<_>>(),
            b.iter().map(|p| p.location).collect::<Vec<_>>()
        );
    }
}
