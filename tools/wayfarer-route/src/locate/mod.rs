//! Locator: snaps coordinates onto road segments.
//!
//! Both directions of a two-way road share one R-tree entry, keyed by the
//! lower segment id. Distances are measured in Web Mercator and scaled by
//! the cosine of the query latitude.

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use tracing::debug;

use crate::api::params::{Approach, Bearing, Snapping};
use crate::geo::{
    angle_diff, bearing_deg, from_mercator, mercator_scale, project_onto_segment, side_of,
    to_mercator, Coordinate,
};
use crate::graph::GraphStore;

/// Snapped position on one directed segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhantomSegment {
    pub segment: u32,
    /// Weight from the segment's tail to the snapped point, deciseconds
    pub weight_offset: u32,
    /// Length from the segment's tail to the snapped point, decimeters
    pub distance_offset: u32,
    /// Position along this segment, 0 at its tail
    pub ratio: f64,
}

/// A coordinate snapped onto the road network
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhantomNode {
    pub input: Coordinate,
    pub location: Coordinate,
    /// Meters between `input` and `location`
    pub distance: f64,
    pub forward: Option<PhantomSegment>,
    pub reverse: Option<PhantomSegment>,
}

impl PhantomNode {
    /// Usable directions, forward first
    pub fn segments(&self) -> impl Iterator<Item = PhantomSegment> {
        self.forward.into_iter().chain(self.reverse)
    }

    /// External ids of the road nodes bounding the snapped segment
    pub fn node_ids(&self, store: &GraphStore) -> [u64; 2] {
        let seg = self.forward.or(self.reverse).map(|s| s.segment).unwrap_or(0);
        [
            store.node_id(store.edge_tail(seg)),
            store.node_id(store.edge_head(seg)),
        ]
    }
}

/// Snapping constraints for one coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateFilter {
    /// Meters; `None` searches the whole network
    pub radius: Option<f64>,
    pub bearing: Option<Bearing>,
    pub approach: Approach,
    pub snapping: Snapping,
    pub max_results: usize,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self {
            radius: None,
            bearing: None,
            approach: Approach::Unrestricted,
            snapping: Snapping::Default,
            max_results: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedSegment {
    /// Projected tail of the forward direction
    a: [f64; 2],
    b: [f64; 2],
    forward: u32,
    reverse: Option<u32>,
    tiny: bool,
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.a, self.b)
    }
}

impl PointDistance for IndexedSegment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let (_, q) = project_onto_segment(*point, self.a, self.b);
        let dx = q[0] - point[0];
        let dy = q[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Spatial index over the segments of a [`GraphStore`]
pub struct Locator {
    tree: RTree<IndexedSegment>,
}

impl Locator {
    pub fn new(store: &GraphStore) -> Self {
        let mut entries = Vec::with_capacity(store.edge_count());
        for e in 0..store.edge_count() as u32 {
            let edge = store.edge(e);
            if edge.reverse.is_some_and(|r| r < e) {
                continue;
            }
            entries.push(IndexedSegment {
                a: to_mercator(store.node_coordinate(edge.tail)),
                b: to_mercator(store.node_coordinate(edge.head)),
                forward: e,
                reverse: edge.reverse,
                tiny: edge.tiny,
            });
        }
        debug!(entries = entries.len(), "built segment index");
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Up to `filter.max_results` snapped positions ordered by distance,
    /// then segment id, then offset. Positions at the same distance as the
    /// last one are kept as well.
    pub fn nearest(&self, store: &GraphStore, input: Coordinate, filter: &CandidateFilter) -> Vec<PhantomNode> {
        let p = to_mercator(input);
        let scale = mercator_scale(input.lat).max(1e-9);
        let limit = filter.radius.map(|r| (r / scale).powi(2));
        let wanted = filter.max_results.max(1);

        let mut found: Vec<(f64, u32, f64, PhantomNode)> = Vec::new();
        let mut cutoff: Option<f64> = None;
        for (seg, d2) in self.tree.nearest_neighbor_iter_with_distance_2(&p) {
            if limit.is_some_and(|l| d2 > l + 1e-9) || cutoff.is_some_and(|c| d2 > c + 1e-9) {
                break;
            }
            if filter.snapping == Snapping::Default && seg.tiny {
                continue;
            }
            let Some(phantom) = snap(store, seg, p, input, d2.sqrt() * scale, filter) else {
                continue;
            };
            let ratio = phantom.forward.or(phantom.reverse).map(|s| s.ratio).unwrap_or(0.0);
            found.push((d2, seg.forward, ratio, phantom));
            if found.len() >= wanted && cutoff.is_none() {
                cutoff = Some(d2);
            }
        }

        found.sort_by(|x, y| {
            x.0.total_cmp(&y.0)
                .then(x.1.cmp(&y.1))
                .then(x.2.total_cmp(&y.2))
        });
        found.into_iter().map(|(_, _, _, phantom)| phantom).collect()
    }

    /// Directed segments whose bounding box meets the projected box
    /// `min`..`max`, ascending by id
    pub fn segments_in(&self, min: [f64; 2], max: [f64; 2]) -> Vec<u32> {
        let envelope = AABB::from_corners(min, max);
        let mut out: Vec<u32> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .flat_map(|seg| std::iter::once(seg.forward).chain(seg.reverse))
            .collect();
        out.sort_unstable();
        out
    }
}

/// Project `p` onto `seg` and apply the direction filters
fn snap(
    store: &GraphStore,
    seg: &IndexedSegment,
    p: [f64; 2],
    input: Coordinate,
    distance: f64,
    filter: &CandidateFilter,
) -> Option<PhantomNode> {
    let (t, q) = project_onto_segment(p, seg.a, seg.b);
    let mut use_forward = true;
    let mut use_reverse = seg.reverse.is_some();

    if let Some(bearing) = filter.bearing {
        let tail = store.node_coordinate(store.edge_tail(seg.forward));
        let head = store.node_coordinate(store.edge_head(seg.forward));
        let heading = bearing_deg(tail, head);
        let wanted = bearing.value as f64;
        let range = bearing.range as f64;
        use_forward &= angle_diff(heading, wanted) <= range;
        use_reverse &= angle_diff((heading + 180.0) % 360.0, wanted) <= range;
    }

    if use_forward && use_reverse {
        // positive: the point lies left of the forward direction
        let side = side_of(p, seg.a, seg.b);
        match filter.approach {
            Approach::Unrestricted => {}
            Approach::Curb if side < 0.0 => use_reverse = false,
            Approach::Curb if side > 0.0 => use_forward = false,
            Approach::Opposite if side < 0.0 => use_forward = false,
            Approach::Opposite if side > 0.0 => use_reverse = false,
            _ => {}
        }
    }

    if !use_forward && !use_reverse {
        return None;
    }

    let on = |segment: u32, ratio: f64| PhantomSegment {
        segment,
        weight_offset: (store.edge_weight(segment) as f64 * ratio).round() as u32,
        distance_offset: (store.edge_distance(segment) as f64 * ratio).round() as u32,
        ratio,
    };
    Some(PhantomNode {
        input,
        location: from_mercator(q),
        distance,
        forward: use_forward.then(|| on(seg.forward, t)),
        reverse: seg.reverse.filter(|_| use_reverse).map(|r| on(r, 1.0 - t)),
    })
}
