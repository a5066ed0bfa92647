//! Map matching: snap a noisy trace onto the road network with an HMM and
//! Viterbi decoding (Newson & Krumm 2009).
//!
//! - Emission: Gaussian on the observation-to-road distance
//! - Transition: exponential on |route distance - great-circle distance|
//!
//! The trace is cut into sub-traces before decoding (time gaps, implausible
//! speeds or jumps, observations without candidates) and again during
//! decoding wherever no candidate pair is connected. Every sub-trace with
//! at least two points becomes one matching.

use tracing::debug;
use wayfarer_common::{Error, Result};

use crate::api::params::{Gaps, Snapping};
use crate::geo::{haversine_m, Coordinate};
use crate::graph::GraphStore;
use crate::locate::{CandidateFilter, Locator, PhantomNode};
use crate::search::{PathSearch, SearchPath};

/// Candidates kept per observation
const MAX_CANDIDATES: usize = 8;

/// Observation noise when no radius is given, meters
const DEFAULT_SIGMA: f64 = 5.0;

/// Transition scale, meters
const BETA: f64 = 30.0;

/// A route this much longer than the great-circle step is not a transition
const MAX_DETOUR_M: f64 = 2000.0;

const MAX_TIME_GAP_S: u64 = 60;
const MAX_SPEED_MPS: f64 = 70.0;
/// Largest step between untimed observations, meters
const MAX_JUMP_M: f64 = 500.0;
/// `tidy` drops observations closer than this to the previous kept one
const TIDY_RADIUS_M: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub coordinate: Coordinate,
    /// Seconds
    pub timestamp: Option<u64>,
    /// Expected accuracy in meters; doubles as the emission sigma
    pub radius: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub gaps: Gaps,
    pub tidy: bool,
    /// Upper bound on the candidate search radius, meters
    pub max_radius: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            gaps: Gaps::Split,
            tidy: false,
            max_radius: 50.0,
        }
    }
}

/// A continuous matched sub-trace
#[derive(Debug, Clone)]
pub struct Matching {
    /// Input indices of the matched observations
    pub observations: Vec<usize>,
    /// Chosen position for each matched observation
    pub waypoints: Vec<PhantomNode>,
    /// Paths between consecutive waypoints
    pub legs: Vec<SearchPath>,
    /// exp of the mean emission log-probability, in (0, 1]
    pub confidence: f64,
}

/// Matched position of one input observation
#[derive(Debug, Clone, Copy)]
pub struct Tracepoint {
    pub phantom: PhantomNode,
    pub matchings_index: usize,
    pub waypoint_index: usize,
    /// Candidates that were not chosen
    pub alternatives_count: usize,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matchings: Vec<Matching>,
    /// Aligned with the input; `None` for observations left unmatched
    pub tracepoints: Vec<Option<Tracepoint>>,
}

fn emission(distance_m: f64, sigma: f64) -> f64 {
    -(distance_m * distance_m) / (2.0 * sigma * sigma)
}

fn transition(route_m: f64, great_circle_m: f64) -> f64 {
    -(route_m - great_circle_m).abs() / BETA
}

struct Column {
    /// Position in the kept observation list
    position: usize,
    states: Vec<PhantomNode>,
    emissions: Vec<f64>,
}

/// Hidden Markov map matcher over one network
pub struct Matcher<'a> {
    store: &'a GraphStore,
    locator: &'a Locator,
    search: &'a dyn PathSearch,
}

impl<'a> Matcher<'a> {
    pub fn new(store: &'a GraphStore, locator: &'a Locator, search: &'a dyn PathSearch) -> Self {
        Self {
            store,
            locator,
            search,
        }
    }

    pub fn match_trace(&self, observations: &[Observation], options: &MatchOptions) -> Result<MatchResult> {
        let kept = if options.tidy {
            tidy(observations)
        } else {
            (0..observations.len()).collect()
        };
        if kept.len() < 2 {
            return Err(Error::InsufficientData(format!(
                "{} usable observations, need at least 2",
                kept.len()
            )));
        }

        let columns: Vec<Column> = kept
            .iter()
            .enumerate()
            .map(|(position, &i)| self.column(position, &observations[i], options.max_radius))
            .collect();

        let mut sub_traces: Vec<Vec<(usize, usize)>> = Vec::new();
        for run in split(observations, &kept, &columns, options.gaps) {
            self.viterbi(observations, &kept, &columns[run], &mut sub_traces);
        }

        let mut result = MatchResult {
            matchings: Vec::new(),
            tracepoints: vec![None; observations.len()],
        };
        for trace in sub_traces.into_iter().filter(|t| t.len() >= 2) {
            let matchings_index = result.matchings.len();
            let mut matching = Matching {
                observations: Vec::with_capacity(trace.len()),
                waypoints: Vec::with_capacity(trace.len()),
                legs: Vec::with_capacity(trace.len() - 1),
                confidence: 0.0,
            };
            let mut emission_sum = 0.0;
            for (waypoint_index, &(position, state)) in trace.iter().enumerate() {
                let column = &columns[position];
                let phantom = column.states[state];
                emission_sum += column.emissions[state];
                if let Some(prev) = matching.waypoints.last() {
                    let leg = self.search.shortest_path(self.store, prev, &phantom).ok_or(
                        Error::NoRoute {
                            from: kept[position - 1],
                            to: kept[position],
                        },
                    )?;
                    matching.legs.push(leg);
                }
                matching.observations.push(kept[position]);
                matching.waypoints.push(phantom);
                result.tracepoints[kept[position]] = Some(Tracepoint {
                    phantom,
                    matchings_index,
                    waypoint_index,
                    alternatives_count: column.states.len() - 1,
                });
            }
            matching.confidence = (emission_sum / trace.len() as f64).exp();
            result.matchings.push(matching);
        }

        debug!(
            observations = observations.len(),
            kept = kept.len(),
            matchings = result.matchings.len(),
            "matched trace"
        );
        if result.matchings.is_empty() {
            return Err(Error::InsufficientData(
                "no part of the trace could be matched".to_string(),
            ));
        }
        Ok(result)
    }

    fn column(&self, position: usize, obs: &Observation, max_radius: f64) -> Column {
        let sigma = obs.radius.filter(|r| *r > 0.0).unwrap_or(DEFAULT_SIGMA);
        let filter = CandidateFilter {
            radius: Some((3.0 * sigma).min(max_radius)),
            snapping: Snapping::Default,
            max_results: MAX_CANDIDATES,
            ..CandidateFilter::default()
        };
        let mut states = self.locator.nearest(self.store, obs.coordinate, &filter);
        states.truncate(MAX_CANDIDATES);
        let emissions = states.iter().map(|s| emission(s.distance, sigma)).collect();
        Column {
            position,
            states,
            emissions,
        }
    }

    /// Decode one run of columns, cutting wherever a column cannot be
    /// reached from the previous one. Appends (position, state) sequences.
    fn viterbi(
        &self,
        observations: &[Observation],
        kept: &[usize],
        columns: &[Column],
        out: &mut Vec<Vec<(usize, usize)>>,
    ) {
        let Some(first) = columns.first() else {
            return;
        };
        let mut start = 0;
        let mut scores: Vec<Vec<f64>> = vec![first.emissions.clone()];
        let mut back: Vec<Vec<Option<usize>>> = vec![vec![None; first.states.len()]];

        for t in 1..columns.len() {
            let (prev, cur) = (&columns[t - 1], &columns[t]);
            let great_circle = haversine_m(
                observations[kept[prev.position]].coordinate,
                observations[kept[cur.position]].coordinate,
            );
            let table = self.search.many_to_many(self.store, &prev.states, &cur.states);

            let mut column_scores = vec![f64::NEG_INFINITY; cur.states.len()];
            let mut column_back = vec![None; cur.states.len()];
            for c in 0..cur.states.len() {
                for p in 0..prev.states.len() {
                    let previous = scores[t - 1 - start][p];
                    if previous == f64::NEG_INFINITY {
                        continue;
                    }
                    let Some(distance) = table.distance(p, c) else {
                        continue;
                    };
                    let route = distance as f64 / 10.0;
                    if route > great_circle + MAX_DETOUR_M {
                        continue;
                    }
                    let score = previous + transition(route, great_circle) + cur.emissions[c];
                    if score > column_scores[c] {
                        column_scores[c] = score;
                        column_back[c] = Some(p);
                    }
                }
            }

            if column_scores.iter().all(|s| *s == f64::NEG_INFINITY) {
                out.push(backtrack(&columns[start..t], &scores, &back));
                start = t;
                scores = vec![cur.emissions.clone()];
                back = vec![vec![None; cur.states.len()]];
            } else {
                scores.push(column_scores);
                back.push(column_back);
            }
        }
        out.push(backtrack(&columns[start..], &scores, &back));
    }
}

fn backtrack(columns: &[Column], scores: &[Vec<f64>], back: &[Vec<Option<usize>>]) -> Vec<(usize, usize)> {
    let Some(last) = scores.last() else {
        return Vec::new();
    };
    let best = last
        .iter()
        .enumerate()
        .filter(|(_, s)| **s != f64::NEG_INFINITY)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i);
    let Some(mut state) = best else {
        return Vec::new();
    };
    let mut path = Vec::with_capacity(columns.len());
    for t in (0..columns.len()).rev() {
        path.push((columns[t].position, state));
        if t > 0 {
            match back[t][state] {
                Some(p) => state = p,
                None => break,
            }
        }
    }
    path.reverse();
    path
}

/// Indices of observations kept by `tidy`
fn tidy(observations: &[Observation]) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::with_capacity(observations.len());
    for (i, obs) in observations.iter().enumerate() {
        let close = kept
            .last()
            .is_some_and(|&k| haversine_m(observations[k].coordinate, obs.coordinate) < TIDY_RADIUS_M);
        if !close {
            kept.push(i);
        }
    }
    kept
}

/// Cut the kept observations into runs of consecutive columns that may be
/// decoded together
fn split(
    observations: &[Observation],
    kept: &[usize],
    columns: &[Column],
    gaps: Gaps,
) -> Vec<std::ops::Range<usize>> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for (t, column) in columns.iter().enumerate() {
        if column.states.is_empty() {
            if let Some(s) = start.take() {
                runs.push(s..t);
            }
            continue;
        }
        if let Some(s) = start {
            if breaks_between(&observations[kept[t - 1]], &observations[kept[t]], gaps) {
                runs.push(s..t);
                start = Some(t);
            }
        } else {
            start = Some(t);
        }
    }
    if let Some(s) = start {
        runs.push(s..columns.len());
    }
    runs
}

fn breaks_between(a: &Observation, b: &Observation, gaps: Gaps) -> bool {
    let distance = haversine_m(a.coordinate, b.coordinate);
    match (a.timestamp, b.timestamp) {
        (Some(ta), Some(tb)) => {
            let dt = tb.saturating_sub(ta);
            if gaps == Gaps::Split && dt > MAX_TIME_GAP_S {
                return true;
            }
            distance / dt.max(1) as f64 > MAX_SPEED_MPS
        }
        _ => distance > MAX_JUMP_M,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::graph::RawGraph;
    use crate::search::ChSearch;

    /// Two-way road along lat 50.0, nodes 0..=20 about 100 m apart, with a
    /// side street going north from node 10
    fn network() -> GraphStore {
        let mut g = RawGraph::new();
        for i in 0..=20u64 {
            g.add_node(i, 4.0 + i as f64 * 0.0014, 50.0);
        }
        for i in 0..20u64 {
            g.add_road(i, i + 1, 100);
        }
        g.add_node(100, 4.014, 50.002).add_road(10, 100, 150);
        crate::contract::build(&g, &BuildConfig::default()).unwrap()
    }

    /// Observations every ~50 m at `positions` (multiples of 50 m), 1 m off the road
    fn trace(positions: &[u32], timestamps: Option<&[u64]>) -> Vec<Observation> {
        positions
            .iter()
            .enumerate()
            .map(|(i, &k)| Observation {
                coordinate: Coordinate::new(4.0 + k as f64 * 0.0007, 50.000_009),
                timestamp: timestamps.map(|t| t[i]),
                radius: None,
            })
            .collect()
    }

    fn run(obs: &[Observation], options: MatchOptions) -> Result<MatchResult> {
        let store = network();
        let locator = Locator::new(&store);
        Matcher::new(&store, &locator, &ChSearch).match_trace(obs, &options)
    }

    #[test]
    fn test_probabilities() {
        assert_eq!(emission(0.0, 5.0), 0.0);
        assert!(emission(2.0, 5.0) > emission(8.0, 5.0));
        assert_eq!(transition(100.0, 100.0), 0.0);
        assert!(transition(100.0, 100.0) > transition(160.0, 100.0));
    }

    #[test]
    fn test_trace_on_road_is_reproduced() {
        let obs = trace(&[1, 2, 3, 4, 5, 6, 7, 8, 9], None);
        let result = run(&obs, MatchOptions::default()).unwrap();
        assert_eq!(result.matchings.len(), 1);
        let m = &result.matchings[0];
        assert!(m.confidence > 0.9, "confidence {}", m.confidence);
        assert_eq!(m.observations, (0..9).collect::<Vec<_>>());
        for (tp, o) in result.tracepoints.iter().zip(&obs) {
            let tp = tp.unwrap();
            assert!((tp.phantom.location.lon - o.coordinate.lon).abs() < 1e-6);
            assert!((tp.phantom.location.lat - 50.0).abs() < 1e-6);
        }
        // 8 steps of ~50 m, never a detour
        let total: u32 = m.legs.iter().map(|l| l.distance).sum();
        assert!((total as f64 / 10.0 - 400.0).abs() < 10.0, "{total}");
    }

    #[test]
    fn test_jump_splits_trace() {
        // 200 m .. 350 m, then 1 km further along
        let obs = trace(&[4, 5, 6, 7, 27, 28, 29, 30], None);
        let result = run(&obs, MatchOptions::default()).unwrap();
        assert_eq!(result.matchings.len(), 2);
        assert_eq!(result.matchings[0].observations, vec![0, 1, 2, 3]);
        assert_eq!(result.matchings[1].observations, vec![4, 5, 6, 7]);
        assert_eq!(result.tracepoints[5].unwrap().matchings_index, 1);
        assert_eq!(result.tracepoints[5].unwrap().waypoint_index, 1);
    }

    #[test]
    fn test_time_gap_splits_only_when_asked() {
        let times = [0, 5, 10, 100, 105, 110];
        let obs = trace(&[1, 2, 3, 4, 5, 6], Some(&times));
        let split = run(&obs, MatchOptions::default()).unwrap();
        assert_eq!(split.matchings.len(), 2);
        let ignore = MatchOptions {
            gaps: Gaps::Ignore,
            ..MatchOptions::default()
        };
        assert_eq!(run(&obs, ignore).unwrap().matchings.len(), 1);
    }

    #[test]
    fn test_point_without_candidates_is_unmatched() {
        let mut obs = trace(&[1, 2, 3, 4, 5], None);
        obs[2].coordinate = Coordinate::new(4.0021, 50.001);
        let result = run(&obs, MatchOptions::default()).unwrap();
        assert!(result.tracepoints[2].is_none());
        assert_eq!(result.matchings.len(), 2);
    }

    #[test]
    fn test_tidy_drops_close_points() {
        let mut obs = trace(&[1, 2, 3], None);
        let nearby = Observation {
            coordinate: Coordinate::new(4.0007 + 0.00003, 50.000_009),
            ..obs[0]
        };
        obs.insert(1, nearby);
        let options = MatchOptions {
            tidy: true,
            ..MatchOptions::default()
        };
        let result = run(&obs, options).unwrap();
        assert!(result.tracepoints[1].is_none());
        assert_eq!(result.matchings[0].observations, vec![0, 2, 3]);
    }

    #[test]
    fn test_insufficient_data() {
        let obs = trace(&[1], None);
        assert!(matches!(
            run(&obs, MatchOptions::default()),
            Err(Error::InsufficientData(_))
        ));
        let far = vec![
            Observation {
                coordinate: Coordinate::new(5.0, 51.0),
                timestamp: None,
                radius: None,
            };
            3
        ];
        assert!(matches!(
            run(&far, MatchOptions::default()),
            Err(Error::InsufficientData(_))
        ));
    }
}
