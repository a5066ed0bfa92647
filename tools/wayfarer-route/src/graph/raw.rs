//! Raw graph input for the offline builder.
//!
//! A neutral JSON document of nodes, road segments and turn restrictions.
//! Extracting it from OSM or any other source happens outside this crate.

use std::collections::BTreeMap;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use wayfarer_common::{Error, Result};

use super::{
    Adjacency, GraphStore, StoreMeta, EDGE_TINY_COMPONENT, FORBIDDEN_TURN, INVALID_ID,
    NODE_TRAFFIC_SIGNAL,
};
use crate::config::BuildConfig;
use crate::geo::{haversine_m, Coordinate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub id: u64,
    pub lon: f64,
    pub lat: f64,
    #[serde(default)]
    pub traffic_signal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub from: u64,
    pub to: u64,
    /// Traversal cost in deciseconds
    pub weight: u32,
    /// Length in meters; the great-circle length when absent
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub road_class: u8,
    /// Also create the `to -> from` segment with the same attributes
    #[serde(default)]
    pub bidirectional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionKind {
    /// The turn is not allowed
    Forbid,
    /// The turn is the only one allowed from the incoming segment
    Only,
    /// The turn costs extra deciseconds
    Penalty(u32),
}

/// Turn restriction over the node triple (from, via, to)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRestriction {
    pub from: u64,
    pub via: u64,
    pub to: u64,
    pub kind: RestrictionKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGraph {
    pub nodes: Vec<RawNode>,
    pub segments: Vec<RawSegment>,
    #[serde(default)]
    pub restrictions: Vec<RawRestriction>,
}

impl RawGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Build(format!("{}: {e}", path.display())))
    }

    pub fn add_node(&mut self, id: u64, lon: f64, lat: f64) -> &mut Self {
        self.nodes.push(RawNode {
            id,
            lon,
            lat,
            traffic_signal: false,
        });
        self
    }

    pub fn add_signal(&mut self, id: u64, lon: f64, lat: f64) -> &mut Self {
        self.nodes.push(RawNode {
            id,
            lon,
            lat,
            traffic_signal: true,
        });
        self
    }

    /// One-way segment with its great-circle length
    pub fn add_segment(&mut self, from: u64, to: u64, weight: u32) -> &mut Self {
        self.segments.push(RawSegment {
            from,
            to,
            weight,
            distance: None,
            road_class: 0,
            bidirectional: false,
        });
        self
    }

    /// Two-way road with its great-circle length
    pub fn add_road(&mut self, a: u64, b: u64, weight: u32) -> &mut Self {
        self.segments.push(RawSegment {
            from: a,
            to: b,
            weight,
            distance: None,
            road_class: 0,
            bidirectional: true,
        });
        self
    }

    pub fn add_restriction(&mut self, from: u64, via: u64, to: u64, kind: RestrictionKind) -> &mut Self {
        self.restrictions.push(RawRestriction { from, via, to, kind });
        self
    }

    /// SHA-256 over the canonical JSON encoding
    pub fn fingerprint(&self) -> Result<[u8; 32]> {
        let bytes = serde_json::to_vec(self).map_err(|e| Error::Build(e.to_string()))?;
        let digest = Sha256::digest(&bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(out)
    }

    /// Validate the input and lay it out as a store without hierarchy
    pub(crate) fn assemble(&self, config: &BuildConfig) -> Result<GraphStore> {
        if self.nodes.is_empty() {
            return Err(Error::Build("graph has no nodes".into()));
        }
        if self.segments.is_empty() {
            return Err(Error::Build("graph has no segments".into()));
        }

        let mut index: FxHashMap<u64, u32> = FxHashMap::default();
        let mut node_lon = Vec::with_capacity(self.nodes.len());
        let mut node_lat = Vec::with_capacity(self.nodes.len());
        let mut node_flags = Vec::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.id, i as u32).is_some() {
                return Err(Error::Build(format!("duplicate node id {}", node.id)));
            }
            let c = Coordinate::new(node.lon, node.lat);
            if !c.is_valid() {
                return Err(Error::Build(format!(
                    "node {} has coordinate ({}, {}) outside the supported range",
                    node.id, node.lon, node.lat
                )));
            }
            let (lon, lat) = c.to_fixed();
            node_lon.push(lon);
            node_lat.push(lat);
            node_flags.push(if node.traffic_signal { NODE_TRAFFIC_SIGNAL } else { 0 });
        }
        let lookup = |id: u64| {
            index
                .get(&id)
                .copied()
                .ok_or_else(|| Error::Build(format!("segment references unknown node {id}")))
        };

        // (tail, head, weight, distance_dm, class)
        let mut directed: Vec<(u32, u32, u32, u32, u8)> = Vec::with_capacity(self.segments.len() * 2);
        for seg in &self.segments {
            let tail = lookup(seg.from)?;
            let head = lookup(seg.to)?;
            if tail == head {
                return Err(Error::Build(format!("segment {} -> {} is a self loop", seg.from, seg.to)));
            }
            if seg.weight == u32::MAX {
                return Err(Error::Build(format!(
                    "segment {} -> {} has a reserved weight",
                    seg.from, seg.to
                )));
            }
            let meters = match seg.distance {
                Some(d) if d.is_finite() && d >= 0.0 => d,
                Some(d) => {
                    return Err(Error::Build(format!(
                        "segment {} -> {} has invalid distance {d}",
                        seg.from, seg.to
                    )))
                }
                None => haversine_m(
                    Coordinate::from_fixed(node_lon[tail as usize], node_lat[tail as usize]),
                    Coordinate::from_fixed(node_lon[head as usize], node_lat[head as usize]),
                ),
            };
            let dm = (meters * 10.0).round().min((u32::MAX - 1) as f64) as u32;
            directed.push((tail, head, seg.weight, dm, seg.road_class));
            if seg.bidirectional {
                directed.push((head, tail, seg.weight, dm, seg.road_class));
            }
        }
        directed.sort_by_key(|s| s.0);

        let n = self.nodes.len();
        let m = directed.len();
        let mut edge_offsets = vec![0u64; n + 1];
        for s in &directed {
            edge_offsets[s.0 as usize + 1] += 1;
        }
        for i in 0..n {
            edge_offsets[i + 1] += edge_offsets[i];
        }

        let edge_reverse = pair_reverse_edges(&directed);
        let (turn_from, turn_to, turn_penalty) =
            self.turn_rules(&directed, &edge_offsets, &lookup)?;

        let component = weak_components(n, &directed);
        let mut sizes: FxHashMap<u32, usize> = FxHashMap::default();
        for &c in &component {
            *sizes.entry(c).or_default() += 1;
        }
        let mut edge_flags = vec![0u8; m];
        if sizes.len() > 1 {
            let (largest, largest_size) = sizes
                .iter()
                .map(|(&c, &size)| (c, size))
                .max_by_key(|&(c, size)| (size, std::cmp::Reverse(c)))
                .unwrap_or((0, 0));
            if !config.allow_disconnected {
                return Err(Error::Build(format!(
                    "graph has {} disconnected components (largest has {largest_size} of {n} nodes)",
                    sizes.len()
                )));
            }
            warn!(
                components = sizes.len(),
                largest = largest_size,
                "building a disconnected graph"
            );
            for (e, s) in directed.iter().enumerate() {
                let c = component[s.0 as usize];
                if c != largest && sizes[&c] < config.small_component_size {
                    edge_flags[e] |= EDGE_TINY_COMPONENT;
                }
            }
        }

        info!(
            nodes = n,
            segments = m,
            turn_rules = turn_from.len(),
            "assembled road graph"
        );

        Ok(GraphStore {
            meta: StoreMeta {
                u_turn_penalty: config.u_turn_penalty,
                traffic_signal_penalty: config.traffic_signal_penalty,
                input_sha256: self.fingerprint()?,
            },
            node_ids: self.nodes.iter().map(|n| n.id).collect::<Vec<_>>().into(),
            node_lon: node_lon.into(),
            node_lat: node_lat.into(),
            node_flags: node_flags.into(),
            edge_offsets: edge_offsets.into(),
            edge_tail: directed.iter().map(|s| s.0).collect::<Vec<_>>().into(),
            edge_head: directed.iter().map(|s| s.1).collect::<Vec<_>>().into(),
            edge_weight: directed.iter().map(|s| s.2).collect::<Vec<_>>().into(),
            edge_distance: directed.iter().map(|s| s.3).collect::<Vec<_>>().into(),
            edge_class: directed.iter().map(|s| s.4).collect::<Vec<_>>().into(),
            edge_flags: edge_flags.into(),
            edge_reverse: edge_reverse.into(),
            turn_from: turn_from.into(),
            turn_to: turn_to.into(),
            turn_penalty: turn_penalty.into(),
            rank: vec![0u32; m].into(),
            up: Adjacency::new(vec![0; m + 1], vec![], vec![], vec![], vec![]),
            down: Adjacency::new(vec![0; m + 1], vec![], vec![], vec![], vec![]),
        })
    }

    /// Resolve restrictions to sorted (from_edge, to_edge, penalty) arrays
    fn turn_rules(
        &self,
        directed: &[(u32, u32, u32, u32, u8)],
        edge_offsets: &[u64],
        lookup: &impl Fn(u64) -> Result<u32>,
    ) -> Result<(Vec<u32>, Vec<u32>, Vec<u32>)> {
        let between = |a: u32, b: u32| -> Vec<u32> {
            (edge_offsets[a as usize]..edge_offsets[a as usize + 1])
                .map(|e| e as u32)
                .filter(|&e| directed[e as usize].1 == b)
                .collect()
        };

        let mut rules: BTreeMap<(u32, u32), u32> = BTreeMap::new();
        let mut merge = |from: u32, to: u32, penalty: u32| {
            let slot = rules.entry((from, to)).or_insert(0);
            *slot = (*slot).max(penalty);
        };

        for r in &self.restrictions {
            let (from, via, to) = (lookup(r.from)?, lookup(r.via)?, lookup(r.to)?);
            let incoming = between(from, via);
            let outgoing = between(via, to);
            if incoming.is_empty() || outgoing.is_empty() {
                return Err(Error::Build(format!(
                    "restriction {} -> {} -> {} does not follow existing segments",
                    r.from, r.via, r.to
                )));
            }
            for &f in &incoming {
                match r.kind {
                    RestrictionKind::Forbid => {
                        for &t in &outgoing {
                            merge(f, t, FORBIDDEN_TURN);
                        }
                    }
                    RestrictionKind::Penalty(p) => {
                        let p = p.min(FORBIDDEN_TURN - 1);
                        for &t in &outgoing {
                            merge(f, t, p);
                        }
                    }
                    RestrictionKind::Only => {
                        let range = edge_offsets[via as usize]..edge_offsets[via as usize + 1];
                        for t in range.map(|e| e as u32) {
                            if directed[t as usize].1 != to {
                                merge(f, t, FORBIDDEN_TURN);
                            }
                        }
                    }
                }
            }
        }

        let mut from = Vec::with_capacity(rules.len());
        let mut to = Vec::with_capacity(rules.len());
        let mut penalty = Vec::with_capacity(rules.len());
        for ((f, t), p) in rules {
            from.push(f);
            to.push(t);
            penalty.push(p);
        }
        Ok((from, to, penalty))
    }
}

/// Pair every segment with an opposite one between the same nodes, lowest ids first
fn pair_reverse_edges(directed: &[(u32, u32, u32, u32, u8)]) -> Vec<u32> {
    let mut by_pair: FxHashMap<(u32, u32), Vec<u32>> = FxHashMap::default();
    for (e, s) in directed.iter().enumerate() {
        by_pair.entry((s.0, s.1)).or_default().push(e as u32);
    }
    let mut reverse = vec![INVALID_ID; directed.len()];
    for (e, s) in directed.iter().enumerate() {
        if reverse[e] != INVALID_ID {
            continue;
        }
        if let Some(candidates) = by_pair.get(&(s.1, s.0)) {
            if let Some(&r) = candidates.iter().find(|&&r| reverse[r as usize] == INVALID_ID) {
                reverse[e] = r;
                reverse[r as usize] = e as u32;
            }
        }
    }
    reverse
}

/// Weakly connected component label per node
fn weak_components(n: usize, directed: &[(u32, u32, u32, u32, u8)]) -> Vec<u32> {
    let mut parent: Vec<u32> = (0..n as u32).collect();
    fn find(parent: &mut [u32], mut x: u32) -> u32 {
        while parent[x as usize] != x {
            let grand = parent[parent[x as usize] as usize];
            parent[x as usize] = grand;
            x = grand;
        }
        x
    }
    for s in directed {
        let a = find(&mut parent, s.0);
        let b = find(&mut parent, s.1);
        if a != b {
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            parent[hi as usize] = lo;
        }
    }
    (0..n as u32).map(|x| find(&mut parent, x)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> RawGraph {
        let mut g = RawGraph::new();
        g.add_node(1, 4.0, 50.0)
            .add_node(2, 4.001, 50.0)
            .add_node(3, 4.002, 50.0)
            .add_road(1, 2, 10)
            .add_road(2, 3, 10);
        g
    }

    #[test]
    fn test_assemble_groups_edges_by_tail() {
        let store = line().assemble(&BuildConfig::default()).unwrap();
        assert_eq!(store.node_count(), 3);
        assert_eq!(store.edge_count(), 4);
        assert!(store.check().is_ok());
        for node in 0..3 {
            for e in store.edges(node) {
                assert_eq!(store.edge_tail(e), node);
            }
        }
        for e in 0..4 {
            let r = store.edge_reverse(e).unwrap();
            assert_eq!(store.edge_reverse(r), Some(e));
            assert_eq!(store.edge_tail(r), store.edge_head(e));
        }
    }

    #[test]
    fn test_distance_defaults_to_great_circle() {
        let store = line().assemble(&BuildConfig::default()).unwrap();
        let e = store.edges(0).start;
        // 0.001 degrees of longitude at 50N is about 71.5 m
        let d = store.edge_distance(e) as f64 / 10.0;
        assert!((d - 71.5).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_rejects_malformed_input() {
        let mut g = line();
        g.add_segment(3, 99, 5);
        assert!(matches!(g.assemble(&BuildConfig::default()), Err(Error::Build(_))));

        let mut g = line();
        g.add_node(1, 4.0, 50.0);
        assert!(matches!(g.assemble(&BuildConfig::default()), Err(Error::Build(_))));

        let mut g = line();
        g.add_segment(2, 2, 5);
        assert!(matches!(g.assemble(&BuildConfig::default()), Err(Error::Build(_))));

        let mut g = line();
        g.add_restriction(1, 3, 2, RestrictionKind::Forbid);
        assert!(matches!(g.assemble(&BuildConfig::default()), Err(Error::Build(_))));
    }

    #[test]
    fn test_disconnected_input_is_rejected_unless_allowed() {
        let mut g = line();
        g.add_node(10, 5.0, 51.0).add_node(11, 5.001, 51.0).add_road(10, 11, 3);
        let err = g.assemble(&BuildConfig::default()).unwrap_err();
        assert!(err.to_string().contains("2 disconnected components"));

        let config = BuildConfig {
            allow_disconnected: true,
            ..BuildConfig::default()
        };
        let store = g.assemble(&config).unwrap();
        let tiny: Vec<bool> = (0..store.edge_count() as u32).map(|e| store.edge(e).tiny).collect();
        assert_eq!(tiny.iter().filter(|&&t| t).count(), 2);
    }

    #[test]
    fn test_only_restriction_forbids_other_exits() {
        let mut g = line();
        g.add_node(4, 4.001, 50.001).add_road(2, 4, 10);
        g.add_restriction(1, 2, 3, RestrictionKind::Only);
        let store = g.assemble(&BuildConfig::default()).unwrap();
        let from = store.edges(0).find(|&e| store.edge_head(e) == 1).unwrap();
        let to_3 = store.edges(1).find(|&e| store.edge_head(e) == 2).unwrap();
        let to_4 = store.edges(1).find(|&e| store.edge_head(e) == 3).unwrap();
        assert_eq!(store.turn_rule(1, from, to_3), None);
        assert_eq!(store.turn_rule(1, from, to_4), Some(super::super::TurnRule::Forbidden));
        // the u-turn back to node 1 is forbidden by the rule as well
        let back = store.edge_reverse(from).unwrap();
        assert_eq!(store.turn_rule(1, from, back), Some(super::super::TurnRule::Forbidden));
    }

    #[test]
    fn test_json_roundtrip_keeps_fingerprint() {
        let g = line();
        let text = serde_json::to_string(&g).unwrap();
        let back: RawGraph = serde_json::from_str(&text).unwrap();
        assert_eq!(back, g);
        assert_eq!(back.fingerprint().unwrap(), g.fingerprint().unwrap());
    }
}
