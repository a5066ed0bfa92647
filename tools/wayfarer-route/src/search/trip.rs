//! Trip ordering over a precomputed weight matrix.
//!
//! Up to [`EXACT_LIMIT`] waypoints every admissible order is tried. Beyond
//! that, multi-start nearest-neighbour tours are improved by 2-opt segment
//! reversal and Or-opt relocation. The matrix may be asymmetric (one-ways,
//! turn costs), so every move is scored on the full tour.

use tracing::debug;
use wayfarer_common::{Error, Result};

use super::CostMatrix;

/// Largest waypoint count solved by enumerating permutations
pub const EXACT_LIMIT: usize = 8;

const MAX_SWEEPS: usize = 100;

/// Cost used for an unreachable pair; large enough to lose every
/// comparison, small enough that sums of a hundred never overflow
const UNREACHABLE: u64 = u64::MAX / 256;

/// Placement constraints on the visiting order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripOptions {
    /// Return from the last waypoint to the first
    pub roundtrip: bool,
    /// Waypoint 0 is visited first
    pub fixed_start: bool,
    /// The last input waypoint is visited last
    pub fixed_end: bool,
}

impl Default for TripOptions {
    fn default() -> Self {
        Self {
            roundtrip: true,
            fixed_start: false,
            fixed_end: false,
        }
    }
}

/// An optimised visiting order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripPlan {
    /// Input indices in visiting order
    pub order: Vec<usize>,
    /// Summed leg weights, closing leg included for round trips
    pub weight: u64,
}

struct Costs<'a> {
    matrix: &'a CostMatrix,
    roundtrip: bool,
}

impl Costs<'_> {
    #[inline]
    fn cost(&self, i: usize, j: usize) -> u64 {
        self.matrix.weight(i, j).map_or(UNREACHABLE, u64::from)
    }

    fn tour(&self, order: &[usize]) -> u64 {
        let mut total: u64 = order.windows(2).map(|w| self.cost(w[0], w[1])).sum();
        if self.roundtrip && order.len() > 1 {
            total += self.cost(order[order.len() - 1], order[0]);
        }
        total
    }
}

/// Order the waypoints of a square weight matrix. The result is never more
/// expensive than visiting them in input order.
pub fn solve(matrix: &CostMatrix, options: TripOptions) -> Result<TripPlan> {
    let n = matrix.rows;
    if n < 2 {
        return Err(Error::TooFewWaypoints {
            operation: "trip",
            required: 2,
            actual: n,
        });
    }
    let costs = Costs {
        matrix,
        roundtrip: options.roundtrip,
    };
    // movable positions are lo..hi
    let lo = usize::from(options.fixed_start);
    let hi = if options.fixed_end { n - 1 } else { n };

    let input: Vec<usize> = (0..n).collect();
    let input_cost = costs.tour(&input);

    let (mut order, mut weight) = if n <= EXACT_LIMIT {
        exact(&costs, n, lo, hi)
    } else {
        heuristic(&costs, n, lo, hi)
    };
    if input_cost < weight {
        order = input;
        weight = input_cost;
    }
    debug!(waypoints = n, weight, input_weight = input_cost, "trip solved");

    if weight >= UNREACHABLE {
        let legs = order.len() - 1 + usize::from(options.roundtrip);
        for k in 0..legs {
            let (from, to) = (order[k], order[(k + 1) % n]);
            if matrix.weight(from, to).is_none() {
                return Err(Error::NoRoute { from, to });
            }
        }
    }
    Ok(TripPlan { order, weight })
}

/// Enumerate every permutation of the movable positions
fn exact(costs: &Costs, n: usize, lo: usize, hi: usize) -> (Vec<usize>, u64) {
    let mut order: Vec<usize> = (0..n).collect();
    let mut best = (order.clone(), costs.tour(&order));
    permute(costs, &mut order, lo, hi, &mut best);
    best
}

fn permute(costs: &Costs, order: &mut Vec<usize>, k: usize, hi: usize, best: &mut (Vec<usize>, u64)) {
    if k + 1 >= hi {
        let c = costs.tour(order);
        if c < best.1 {
            *best = (order.clone(), c);
        }
        return;
    }
    for i in k..hi {
        order.swap(k, i);
        permute(costs, order, k + 1, hi, best);
        order.swap(k, i);
    }
}

fn heuristic(costs: &Costs, n: usize, lo: usize, hi: usize) -> (Vec<usize>, u64) {
    let starts: Vec<usize> = if lo == 1 { vec![0] } else { (0..hi).collect() };
    let mut best: Option<(Vec<usize>, u64)> = None;
    for start in starts {
        let greedy = nearest_neighbour(costs, n, start, hi < n);
        let greedy_cost = costs.tour(&greedy);
        let (order, c) = improve(costs, greedy, greedy_cost, lo, hi);
        if best.as_ref().map_or(true, |b| c < b.1) {
            best = Some((order, c));
        }
    }
    best.unwrap_or_else(|| {
        let order: Vec<usize> = (0..n).collect();
        let c = costs.tour(&order);
        (order, c)
    })
}

/// Greedy tour from `start`; with `keep_last` the final waypoint is held
/// back until the end
fn nearest_neighbour(costs: &Costs, n: usize, start: usize, keep_last: bool) -> Vec<usize> {
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    visited[start] = true;
    order.push(start);
    if keep_last {
        visited[n - 1] = true;
    }
    let mut current = start;
    loop {
        let next = (0..n)
            .filter(|&j| !visited[j])
            .min_by_key(|&j| (costs.cost(current, j), j));
        let Some(next) = next else { break };
        visited[next] = true;
        order.push(next);
        current = next;
    }
    if keep_last && start != n - 1 {
        order.push(n - 1);
    }
    order
}

/// 2-opt reversals then Or-opt relocations inside `lo..hi`, repeated until
/// a sweep finds nothing or the sweep budget runs out
fn improve(costs: &Costs, mut order: Vec<usize>, mut current: u64, lo: usize, hi: usize) -> (Vec<usize>, u64) {
    for _ in 0..MAX_SWEEPS {
        let mut improved = false;

        for i in lo..hi {
            for j in i + 1..hi {
                order[i..=j].reverse();
                let c = costs.tour(&order);
                if c < current {
                    current = c;
                    improved = true;
                } else {
                    order[i..=j].reverse();
                }
            }
        }

        'relocate: for from in lo..hi {
            for to in lo..hi {
                if to == from {
                    continue;
                }
                let node = order.remove(from);
                order.insert(to, node);
                let c = costs.tour(&order);
                if c < current {
                    current = c;
                    improved = true;
                    break 'relocate;
                }
                let node = order.remove(to);
                order.insert(from, node);
            }
        }

        if !improved {
            break;
        }
    }
    (order, current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(costs: &[&[u32]]) -> CostMatrix {
        let n = costs.len();
        let mut m = CostMatrix::new(n, n);
        for (i, row) in costs.iter().enumerate() {
            for (j, &c) in row.iter().enumerate() {
                if c != u32::MAX {
                    m.set(i, j, c, c);
                }
            }
        }
        m
    }

    /// Points on a ring visited in a scrambled input order
    fn ring(n: usize) -> CostMatrix {
        let slot = |i: usize| (i * 7) % n;
        let mut m = CostMatrix::new(n, n);
        for i in 0..n {
            for j in 0..n {
                let d = slot(i).abs_diff(slot(j));
                let d = d.min(n - d) as u32;
                m.set(i, j, d * 10, d * 10);
            }
        }
        m
    }

    fn visits_each_once(order: &[usize], n: usize) -> bool {
        let mut sorted = order.to_vec();
        sorted.sort_unstable();
        sorted == (0..n).collect::<Vec<_>>()
    }

    #[test]
    fn test_too_few_waypoints() {
        let m = matrix(&[&[0]]);
        assert!(matches!(
            solve(&m, TripOptions::default()),
            Err(Error::TooFewWaypoints { actual: 1, .. })
        ));
    }

    #[test]
    fn test_two_waypoints() {
        let m = matrix(&[&[0, 10], &[20, 0]]);
        let round = solve(&m, TripOptions::default()).unwrap();
        assert_eq!(round.weight, 30);
        let open = solve(
            &m,
            TripOptions {
                roundtrip: false,
                fixed_start: true,
                fixed_end: false,
            },
        )
        .unwrap();
        assert_eq!(open.order, vec![0, 1]);
        assert_eq!(open.weight, 10);
    }

    #[test]
    fn test_exact_finds_optimum_on_asymmetric_matrix() {
        let m = matrix(&[
            &[0, 1, 100, 100],
            &[100, 0, 1, 100],
            &[100, 100, 0, 1],
            &[1, 100, 100, 0],
        ]);
        let plan = solve(&m, TripOptions::default()).unwrap();
        assert_eq!(plan.weight, 4);
        let start = plan.order.iter().position(|&x| x == 0).unwrap();
        let mut rotated = plan.order.clone();
        rotated.rotate_left(start);
        assert_eq!(rotated, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_fixed_endpoints_are_respected() {
        let m = ring(12);
        for &(fixed_start, fixed_end) in &[(true, true), (true, false), (false, true)] {
            let options = TripOptions {
                roundtrip: false,
                fixed_start,
                fixed_end,
            };
            let plan = solve(&m, options).unwrap();
            assert!(visits_each_once(&plan.order, 12));
            if fixed_start {
                assert_eq!(plan.order[0], 0);
            }
            if fixed_end {
                assert_eq!(plan.order[11], 11);
            }
        }
    }

    #[test]
    fn test_heuristic_never_worse_than_input_order() {
        for n in [9, 12, 20, 30] {
            let m = ring(n);
            let input: Vec<usize> = (0..n).collect();
            let costs = Costs {
                matrix: &m,
                roundtrip: true,
            };
            let plan = solve(&m, TripOptions::default()).unwrap();
            assert!(visits_each_once(&plan.order, n));
            assert!(plan.weight <= costs.tour(&input));
            // the ring has a tour of length n * 10
            assert_eq!(plan.weight, n as u64 * 10, "n = {n}");
        }
    }

    #[test]
    fn test_unreachable_leg_is_no_route() {
        let x = u32::MAX;
        let m = matrix(&[&[0, 5, x], &[5, 0, x], &[x, x, 0]]);
        assert!(matches!(
            solve(&m, TripOptions::default()),
            Err(Error::NoRoute { .. })
        ));
    }

    #[test]
    fn test_one_way_reachability_is_used() {
        let x = u32::MAX;
        // only 0 -> 2 -> 1 -> 0 is connected
        let m = matrix(&[&[0, x, 3], &[4, 0, x], &[x, 5, 0]]);
        let plan = solve(&m, TripOptions::default()).unwrap();
        assert_eq!(plan.weight, 12);
    }
}
