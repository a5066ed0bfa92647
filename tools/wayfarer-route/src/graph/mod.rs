//! Graph Store: the immutable road network and its contraction hierarchy.
//!
//! Everything is kept in flat arrays indexed by dense integer ids so the
//! store can be served straight from a memory-mapped artifact:
//!
//! - road nodes: `node_*[node]`
//! - directed road segments, grouped by tail node: `edge_*[edge]`, with
//!   `edge_offsets[node]..edge_offsets[node + 1]` leaving `node`
//! - turn rules sorted by `(from_edge, to_edge)`
//! - the hierarchy over the turn-expanded graph, where every directed
//!   segment is one vertex: `up` holds arcs towards higher-ranked
//!   vertices (forward search), `down` holds arcs arriving from
//!   higher-ranked vertices, stored at their head (backward search).

pub mod raw;
mod turns;

use std::ops::Range;
use std::path::Path;

use wayfarer_common::Result;

use crate::config::MemoryMode;
use crate::formats::{graph_file, Section};
use crate::geo::Coordinate;

pub use raw::{RawGraph, RawNode, RawRestriction, RawSegment, RestrictionKind};
pub use turns::Turn;

/// Sentinel for "no id" in stored arrays
pub const INVALID_ID: u32 = u32::MAX;

/// Stored penalty value marking a forbidden turn
pub const FORBIDDEN_TURN: u32 = u32::MAX;

pub const NODE_TRAFFIC_SIGNAL: u8 = 0b0000_0001;
pub const EDGE_TINY_COMPONENT: u8 = 0b0000_0001;

/// Attributes of one directed road segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub id: u32,
    pub tail: u32,
    pub head: u32,
    /// Traversal cost in deciseconds
    pub weight: u32,
    /// Length in decimeters
    pub distance: u32,
    pub road_class: u8,
    pub reverse: Option<u32>,
    pub tiny: bool,
}

/// Outcome of the turn-restriction lookup for (node, in-edge, out-edge)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRule {
    Forbidden,
    Penalty(u32),
}

/// An arc of the hierarchy, original or shortcut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyArc {
    pub head: u32,
    pub weight: u32,
    pub distance: u32,
    /// Contracted vertex this shortcut bypasses
    pub middle: Option<u32>,
}

impl HierarchyArc {
    pub fn is_shortcut(&self) -> bool {
        self.middle.is_some()
    }
}

/// CSR adjacency of one hierarchy direction, neighbours sorted by id
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    pub(crate) offsets: Section<u64>,
    pub(crate) heads: Section<u32>,
    pub(crate) weights: Section<u32>,
    pub(crate) distances: Section<u32>,
    pub(crate) middles: Section<u32>,
}

impl Adjacency {
    pub(crate) fn new(
        offsets: Vec<u64>,
        heads: Vec<u32>,
        weights: Vec<u32>,
        distances: Vec<u32>,
        middles: Vec<u32>,
    ) -> Self {
        Self {
            offsets: offsets.into(),
            heads: heads.into(),
            weights: weights.into(),
            distances: distances.into(),
            middles: middles.into(),
        }
    }

    fn range(&self, v: u32) -> Range<usize> {
        let offsets = &*self.offsets;
        offsets[v as usize] as usize..offsets[v as usize + 1] as usize
    }

    fn arc_at(&self, i: usize) -> HierarchyArc {
        let middle = self.middles[i];
        HierarchyArc {
            head: self.heads[i],
            weight: self.weights[i],
            distance: self.distances[i],
            middle: (middle != INVALID_ID).then_some(middle),
        }
    }

    /// Arcs of vertex `v`
    pub fn arcs(&self, v: u32) -> impl Iterator<Item = HierarchyArc> + '_ {
        self.range(v).map(move |i| self.arc_at(i))
    }

    /// The arc of `v` whose neighbour is `head`, if any
    pub fn find(&self, v: u32, head: u32) -> Option<HierarchyArc> {
        let range = self.range(v);
        let start = range.start;
        self.heads[range]
            .binary_search(&head)
            .ok()
            .map(|pos| self.arc_at(start + pos))
    }

    pub fn arc_count(&self) -> usize {
        self.heads.len()
    }

    pub fn shortcut_count(&self) -> usize {
        self.middles.iter().filter(|&&m| m != INVALID_ID).count()
    }

    fn check(&self, name: &str, n_vertices: usize) -> std::result::Result<(), String> {
        check_csr(name, &self.offsets, n_vertices, self.heads.len())?;
        let m = self.heads.len();
        if self.weights.len() != m || self.distances.len() != m || self.middles.len() != m {
            return Err(format!("{name}: arc arrays differ in length"));
        }
        if self.heads.iter().any(|&h| h as usize >= n_vertices) {
            return Err(format!("{name}: arc head out of range"));
        }
        if self
            .middles
            .iter()
            .any(|&x| x != INVALID_ID && x as usize >= n_vertices)
        {
            return Err(format!("{name}: shortcut middle out of range"));
        }
        Ok(())
    }
}

/// Build parameters recorded in the artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMeta {
    pub u_turn_penalty: u32,
    pub traffic_signal_penalty: u32,
    pub input_sha256: [u8; 32],
}

/// Immutable routing data shared by every query
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    pub(crate) meta: StoreMeta,

    pub(crate) node_ids: Section<u64>,
    pub(crate) node_lon: Section<i32>,
    pub(crate) node_lat: Section<i32>,
    pub(crate) node_flags: Section<u8>,

    pub(crate) edge_offsets: Section<u64>,
    pub(crate) edge_tail: Section<u32>,
    pub(crate) edge_head: Section<u32>,
    pub(crate) edge_weight: Section<u32>,
    pub(crate) edge_distance: Section<u32>,
    pub(crate) edge_class: Section<u8>,
    pub(crate) edge_flags: Section<u8>,
    pub(crate) edge_reverse: Section<u32>,

    pub(crate) turn_from: Section<u32>,
    pub(crate) turn_to: Section<u32>,
    pub(crate) turn_penalty: Section<u32>,

    pub(crate) rank: Section<u32>,
    pub(crate) up: Adjacency,
    pub(crate) down: Adjacency,
}

impl GraphStore {
    /// Load an artifact written by [`GraphStore::save`]
    pub fn load(path: &Path, mode: MemoryMode, verify_checksum: bool) -> Result<Self> {
        graph_file::read(path, mode, verify_checksum)
    }

    /// Persist the store as a versioned, checksummed artifact
    pub fn save(&self, path: &Path) -> Result<()> {
        graph_file::write(path, self)
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_head.len()
    }

    pub fn node_id(&self, node: u32) -> u64 {
        self.node_ids[node as usize]
    }

    pub fn node_coordinate(&self, node: u32) -> Coordinate {
        Coordinate::from_fixed(self.node_lon[node as usize], self.node_lat[node as usize])
    }

    pub fn is_traffic_signal(&self, node: u32) -> bool {
        self.node_flags[node as usize] & NODE_TRAFFIC_SIGNAL != 0
    }

    /// Ids of the segments leaving `node`
    pub fn edges(&self, node: u32) -> Range<u32> {
        let offsets = &*self.edge_offsets;
        offsets[node as usize] as u32..offsets[node as usize + 1] as u32
    }

    pub fn edge(&self, e: u32) -> Edge {
        let i = e as usize;
        let reverse = self.edge_reverse[i];
        Edge {
            id: e,
            tail: self.edge_tail[i],
            head: self.edge_head[i],
            weight: self.edge_weight[i],
            distance: self.edge_distance[i],
            road_class: self.edge_class[i],
            reverse: (reverse != INVALID_ID).then_some(reverse),
            tiny: self.edge_flags[i] & EDGE_TINY_COMPONENT != 0,
        }
    }

    pub fn edge_tail(&self, e: u32) -> u32 {
        self.edge_tail[e as usize]
    }

    pub fn edge_head(&self, e: u32) -> u32 {
        self.edge_head[e as usize]
    }

    pub fn edge_weight(&self, e: u32) -> u32 {
        self.edge_weight[e as usize]
    }

    pub fn edge_distance(&self, e: u32) -> u32 {
        self.edge_distance[e as usize]
    }

    pub fn edge_reverse(&self, e: u32) -> Option<u32> {
        let r = self.edge_reverse[e as usize];
        (r != INVALID_ID).then_some(r)
    }

    /// Restriction or penalty for turning from `from` onto `to` at `node`.
    ///
    /// `None` when no rule exists or the edges do not meet at `node`.
    pub fn turn_rule(&self, node: u32, from: u32, to: u32) -> Option<TurnRule> {
        let n_edges = self.edge_count() as u32;
        if from >= n_edges || to >= n_edges {
            return None;
        }
        if self.edge_head(from) != node || self.edge_tail(to) != node {
            return None;
        }
        let froms = &*self.turn_from;
        let lo = froms.partition_point(|&f| f < from);
        let hi = froms.partition_point(|&f| f <= from);
        let pos = self.turn_to[lo..hi].binary_search(&to).ok()?;
        Some(match self.turn_penalty[lo + pos] {
            FORBIDDEN_TURN => TurnRule::Forbidden,
            p => TurnRule::Penalty(p),
        })
    }

    pub fn turn_rule_count(&self) -> usize {
        self.turn_from.len()
    }

    /// Every stored rule as (from, to, rule), ordered by `from` then `to`
    pub fn turn_rules(&self) -> impl Iterator<Item = (u32, u32, TurnRule)> + '_ {
        (0..self.turn_from.len()).map(|i| {
            let rule = match self.turn_penalty[i] {
                FORBIDDEN_TURN => TurnRule::Forbidden,
                p => TurnRule::Penalty(p),
            };
            (self.turn_from[i], self.turn_to[i], rule)
        })
    }

    /// Contraction rank of a hierarchy vertex (directed segment)
    pub fn rank(&self, v: u32) -> u32 {
        self.rank[v as usize]
    }

    pub fn up(&self) -> &Adjacency {
        &self.up
    }

    pub fn down(&self) -> &Adjacency {
        &self.down
    }

    /// True when every section is served from a file mapping
    pub fn is_mapped(&self) -> bool {
        self.edge_head.is_mapped() && self.up.heads.is_mapped()
    }

    /// Structural consistency of all arrays
    pub(crate) fn check(&self) -> std::result::Result<(), String> {
        let n = self.node_count();
        if self.node_lon.len() != n || self.node_lat.len() != n || self.node_flags.len() != n {
            return Err("node arrays differ in length".into());
        }

        let m = self.edge_count();
        check_csr("edges", &self.edge_offsets, n, m)?;
        for arr_len in [
            self.edge_tail.len(),
            self.edge_weight.len(),
            self.edge_distance.len(),
            self.edge_class.len(),
            self.edge_flags.len(),
            self.edge_reverse.len(),
        ] {
            if arr_len != m {
                return Err("edge arrays differ in length".into());
            }
        }
        for node in 0..n as u32 {
            for e in self.edges(node) {
                if self.edge_tail(e) != node {
                    return Err(format!("edge {e} is not grouped under its tail"));
                }
            }
        }
        if self.edge_head.iter().any(|&h| h as usize >= n) {
            return Err("edge head out of range".into());
        }
        if self
            .edge_reverse
            .iter()
            .any(|&r| r != INVALID_ID && r as usize >= m)
        {
            return Err("reverse edge out of range".into());
        }

        let t = self.turn_from.len();
        if self.turn_to.len() != t || self.turn_penalty.len() != t {
            return Err("turn arrays differ in length".into());
        }
        for i in 0..t {
            if self.turn_from[i] as usize >= m || self.turn_to[i] as usize >= m {
                return Err("turn rule references unknown edge".into());
            }
            if i > 0 && (self.turn_from[i - 1], self.turn_to[i - 1]) >= (self.turn_from[i], self.turn_to[i]) {
                return Err("turn rules not sorted".into());
            }
        }

        if self.rank.len() != m {
            return Err("rank array does not cover every segment".into());
        }
        self.up.check("up", m)?;
        self.down.check("down", m)?;
        Ok(())
    }
}

fn check_csr(name: &str, offsets: &[u64], n: usize, len: usize) -> std::result::Result<(), String> {
    if offsets.len() != n + 1 {
        return Err(format!("{name}: expected {} offsets, got {}", n + 1, offsets.len()));
    }
    if offsets[0] != 0 || offsets[n] != len as u64 {
        return Err(format!("{name}: offsets do not span the arrays"));
    }
    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(format!("{name}: offsets not monotonic"));
    }
    Ok(())
}
