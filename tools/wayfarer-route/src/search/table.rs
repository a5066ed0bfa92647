//! Bucket many-to-many over the hierarchy.
//!
//! One backward upward search per target drops `(target, weight, distance)`
//! into a bucket at every vertex it settles. One forward upward search per
//! source then scans the buckets of the vertices it settles. Both phases
//! run in parallel.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::ch::UpwardSearch;
use super::{needs_loop, source_seeds, target_seeds, CostMatrix, SearchPath};
use crate::graph::GraphStore;
use crate::locate::PhantomNode;

#[derive(Debug, Clone, Copy)]
struct BucketEntry {
    target: usize,
    weight: u32,
    distance: u32,
}

/// Fill a sources x targets matrix. Pairs where a source lies behind its
/// target on a shared segment go through `point_to_point` instead.
pub(crate) fn bucket_many_to_many<F>(
    store: &GraphStore,
    sources: &[PhantomNode],
    targets: &[PhantomNode],
    point_to_point: F,
) -> CostMatrix
where
    F: Fn(&PhantomNode, &PhantomNode) -> Option<SearchPath> + Sync,
{
    let backward: Vec<Vec<(u32, u32, u32)>> = targets
        .par_iter()
        .map(|t| UpwardSearch::backward(&target_seeds(t)).exhaust(store))
        .collect();

    let mut buckets: FxHashMap<u32, Vec<BucketEntry>> = FxHashMap::default();
    for (target, settled) in backward.into_iter().enumerate() {
        for (v, weight, distance) in settled {
            buckets.entry(v).or_default().push(BucketEntry {
                target,
                weight,
                distance,
            });
        }
    }
    debug!(
        targets = targets.len(),
        bucket_vertices = buckets.len(),
        "filled table buckets"
    );

    let rows: Vec<Vec<Option<(u32, u32)>>> = sources
        .par_iter()
        .map(|source| {
            let (seeds, weight_shift, distance_shift) = source_seeds(source);
            let mut row: Vec<Option<(u32, u32)>> = vec![None; targets.len()];
            for (v, fw, fd) in UpwardSearch::forward(&seeds).exhaust(store) {
                let Some(entries) = buckets.get(&v) else {
                    continue;
                };
                for e in entries {
                    let total = fw.saturating_add(e.weight);
                    if total < weight_shift {
                        continue;
                    }
                    let cell = (
                        total - weight_shift,
                        fd.saturating_add(e.distance).saturating_sub(distance_shift),
                    );
                    if row[e.target].map_or(true, |old| cell < old) {
                        row[e.target] = Some(cell);
                    }
                }
            }
            for (j, target) in targets.iter().enumerate() {
                if needs_loop(source, target) {
                    row[j] = point_to_point(source, target).map(|p| (p.weight, p.distance));
                }
            }
            row
        })
        .collect();

    let mut matrix = CostMatrix::new(sources.len(), targets.len());
    for (i, row) in rows.iter().enumerate() {
        matrix.set_row(i, row);
    }
    matrix
}
