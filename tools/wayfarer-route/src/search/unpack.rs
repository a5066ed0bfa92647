//! Shortcut unpacking - expand hierarchy arcs to turns between segments

use tracing::warn;

use crate::graph::GraphStore;

/// Append the vertices of arc `from -> to` after `from`, expanding
/// shortcuts. A shortcut `a -> b` via `m` splits into `a -> m`, found in
/// the down list of `m`, and `m -> b`, found in the up list of `m`.
///
/// A path visits each segment at most once, so at most `edge_count`
/// shortcuts are expanded. Past that the middles are cyclic and the
/// remaining arcs are emitted as they are.
pub(crate) fn unpack_arc(store: &GraphStore, from: u32, to: u32, middle: Option<u32>, out: &mut Vec<u32>) {
    let mut budget = store.edge_count();
    let mut stack = vec![(from, to, middle)];
    while let Some((a, b, middle)) = stack.pop() {
        let Some(m) = middle else {
            out.push(b);
            continue;
        };
        if budget == 0 {
            out.push(b);
            continue;
        }
        budget -= 1;
        if budget == 0 {
            warn!(from, to, "shortcut expansion does not terminate; emitting the rest unexpanded");
        }
        match (store.down().find(m, a), store.up().find(m, b)) {
            (Some(first), Some(second)) => {
                stack.push((m, b, second.middle));
                stack.push((a, m, first.middle));
            }
            _ => {
                warn!(from = a, to = b, middle = m, "shortcut halves missing; emitting arc unexpanded");
                out.push(b);
            }
        }
    }
}

/// Expand a chain of hierarchy arcs starting at `start`
pub(crate) fn unpack_chain(store: &GraphStore, start: u32, arcs: &[(u32, u32, Option<u32>)]) -> Vec<u32> {
    let mut out = vec![start];
    for &(a, b, middle) in arcs {
        unpack_arc(store, a, b, middle, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::grid;

    #[test]
    fn test_unpacked_shortcuts_are_turn_sequences() {
        let store = grid();
        let mut checked = 0;
        for v in 0..store.edge_count() as u32 {
            for arc in store.up().arcs(v).filter(|a| a.is_shortcut()) {
                let path = unpack_chain(&store, v, &[(v, arc.head, arc.middle)]);
                assert_eq!(path.first(), Some(&v));
                assert_eq!(path.last(), Some(&arc.head));
                let mut weight = 0;
                for pair in path.windows(2) {
                    let turn = store.turn_between(pair[0], pair[1]).expect("permitted turn");
                    weight += turn.weight;
                }
                assert_eq!(weight, arc.weight);
                checked += 1;
            }
        }
        assert!(checked > 0);
    }

    #[test]
    fn test_cyclic_middles_stop_expanding() {
        use crate::graph::{Adjacency, INVALID_ID};
        use crate::search::tests::line;

        // shortcut 0 -> 2 via 1, whose first half 0 -> 1 names 1 as its own middle
        let mut store = line();
        let n = store.edge_count();
        let offsets = |v: u32, count: u64| -> Vec<u64> {
            (0..=n as u32).map(|i| if i > v { count } else { 0 }).collect()
        };
        store.down = Adjacency::new(offsets(1, 1), vec![0], vec![1], vec![1], vec![1]);
        store.up = Adjacency::new(offsets(1, 2), vec![1, 2], vec![1, 1], vec![1, 1], vec![INVALID_ID, INVALID_ID]);

        let path = unpack_chain(&store, 0, &[(0, 2, Some(1))]);
        assert_eq!(path.first(), Some(&0));
        assert_eq!(path.last(), Some(&2));
        assert!(path.len() <= n + 2, "{path:?}");
    }
}
