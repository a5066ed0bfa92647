//! Mutable adjacency used while contracting the turn-expanded graph

use crate::graph::{GraphStore, INVALID_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArcData {
    /// Head in an out-list, tail in an in-list
    pub target: u32,
    pub weight: u32,
    pub distance: u32,
    /// Bypassed vertex, `INVALID_ID` for turn arcs
    pub middle: u32,
}

/// Uncontracted part of the graph. Arcs are mirrored in `out` and `inc`
/// and at most one arc exists per ordered vertex pair.
pub(crate) struct ContractionGraph {
    out: Vec<Vec<ArcData>>,
    inc: Vec<Vec<ArcData>>,
}

impl ContractionGraph {
    pub fn with_vertices(n: usize) -> Self {
        Self {
            out: vec![Vec::new(); n],
            inc: vec![Vec::new(); n],
        }
    }

    /// One vertex per directed segment, one arc per permitted turn
    pub fn from_turns(store: &GraphStore) -> Self {
        let n = store.edge_count();
        let mut graph = Self::with_vertices(n);
        for from in 0..n as u32 {
            store.for_each_turn(from, |turn| {
                graph.insert(from, turn.to, turn.weight, turn.distance, INVALID_ID);
            });
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn arc_count(&self) -> usize {
        self.out.iter().map(Vec::len).sum()
    }

    pub fn out(&self, v: u32) -> &[ArcData] {
        &self.out[v as usize]
    }

    pub fn inc(&self, v: u32) -> &[ArcData] {
        &self.inc[v as usize]
    }

    /// Add `from -> to` or improve the existing arc. Lower weight wins,
    /// then lower distance; on a full tie the existing arc stays.
    pub fn insert(&mut self, from: u32, to: u32, weight: u32, distance: u32, middle: u32) -> bool {
        let arc = ArcData {
            target: to,
            weight,
            distance,
            middle,
        };
        if !upsert(&mut self.out[from as usize], arc) {
            return false;
        }
        upsert(&mut self.inc[to as usize], ArcData { target: from, ..arc });
        true
    }

    /// Remove `v` with all its arcs, returning (out-arcs, in-arcs)
    pub fn detach(&mut self, v: u32) -> (Vec<ArcData>, Vec<ArcData>) {
        let out = std::mem::take(&mut self.out[v as usize]);
        let inc = std::mem::take(&mut self.inc[v as usize]);
        for a in &out {
            self.inc[a.target as usize].retain(|b| b.target != v);
        }
        for a in &inc {
            self.out[a.target as usize].retain(|b| b.target != v);
        }
        (out, inc)
    }
}

fn upsert(list: &mut Vec<ArcData>, arc: ArcData) -> bool {
    match list.iter_mut().find(|a| a.target == arc.target) {
        Some(existing) => {
            if (arc.weight, arc.distance) < (existing.weight, existing.distance) {
                *existing = arc;
                true
            } else {
                false
            }
        }
        None => {
            list.push(arc);
            true
        }
    }
}
