//! The query facade: one loaded network answering every operation.

use serde_json::{json, Map, Value};
use tracing::{debug, info};
use wayfarer_common::{Error, Result};

use super::params::{
    BaseParameters, FallbackCoordinate, MatchParameters, NearestParameters, RouteParameters,
    TableParameters, TileParameters, TripDestination, TripParameters, TripSource,
};
use super::response::{self, RouteFormat};
use crate::config::{Algorithm, EngineConfig, Limits};
use crate::geo::haversine_m;
use crate::graph::GraphStore;
use crate::locate::{CandidateFilter, Locator, PhantomNode};
use crate::matching::{MatchOptions, Matcher, Observation};
use crate::search::leg::{self, Leg};
use crate::search::trip::{self, TripOptions};
use crate::search::{ChSearch, DijkstraSearch, PathSearch};
use crate::tile;

/// A loaded network ready for queries. Queries take `&self` and may run
/// concurrently.
pub struct Engine {
    config: EngineConfig,
    store: GraphStore,
    locator: Locator,
    search: Box<dyn PathSearch>,
}

impl Engine {
    /// Load the artifact named by `config`
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.limits.validate()?;
        let store = GraphStore::load(&config.dataset_path, config.memory_mode, config.verify_checksum)?;
        Self::from_store(store, config)
    }

    /// Serve an already built or loaded store
    pub fn from_store(store: GraphStore, config: EngineConfig) -> Result<Self> {
        config.limits.validate()?;
        let locator = Locator::new(&store);
        let search: Box<dyn PathSearch> = match config.algorithm {
            Algorithm::Ch => Box::new(ChSearch),
            Algorithm::Dijkstra => Box::new(DijkstraSearch),
        };
        info!(
            nodes = store.node_count(),
            segments = store.edge_count(),
            algorithm = %config.algorithm,
            mapped = store.is_mapped(),
            "engine ready"
        );
        Ok(Self {
            config,
            store,
            locator,
            search,
        })
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn limits(&self) -> &Limits {
        &self.config.limits
    }

    fn filter(&self, base: &BaseParameters, i: usize, max_results: usize) -> CandidateFilter {
        CandidateFilter {
            radius: base.radius(i).or(self.config.limits.default_radius),
            bearing: base.bearing(i),
            approach: base.approach(i),
            snapping: base.snapping,
            max_results,
        }
    }

    fn snap_all(&self, base: &BaseParameters) -> Result<Vec<PhantomNode>> {
        base.coordinates
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let filter = self.filter(base, i, 1);
                self.locator
                    .nearest(&self.store, c, &filter)
                    .into_iter()
                    .next()
                    .ok_or(Error::NoCandidate {
                        index: i,
                        radius: filter.radius,
                    })
            })
            .collect()
    }

    fn leg_between(&self, phantoms: &[PhantomNode], from: usize, to: usize) -> Result<Leg> {
        let (s, t) = (&phantoms[from], &phantoms[to]);
        let path = self
            .search
            .shortest_path(&self.store, s, t)
            .ok_or(Error::NoRoute { from, to })?;
        Ok(leg::assemble(&self.store, s, t, &path))
    }

    pub fn route(&self, params: &RouteParameters) -> Result<Value> {
        params.validate(&self.config.limits)?;
        let phantoms = self.snap_all(&params.base)?;
        let format = RouteFormat {
            annotations: params.annotations,
            geometries: params.geometries,
            overview: params.overview,
        };
        let waypoints: Vec<usize> = if params.waypoints.is_empty() {
            (0..phantoms.len()).collect()
        } else {
            params.waypoints.clone()
        };

        let mut routes = Vec::new();
        if phantoms.len() == 2 && params.alternatives > 0 {
            let paths = self.search.route_with_alternatives(
                &self.store,
                &phantoms[0],
                &phantoms[1],
                params.alternatives,
            );
            if paths.is_empty() {
                return Err(Error::NoRoute { from: 0, to: 1 });
            }
            for path in &paths {
                let leg = leg::assemble(&self.store, &phantoms[0], &phantoms[1], path);
                routes.push(Value::Object(response::route(&[leg], format)));
            }
        } else {
            let mut legs = Vec::with_capacity(waypoints.len() - 1);
            for w in waypoints.windows(2) {
                let parts = (w[0]..w[1])
                    .map(|i| self.leg_between(&phantoms, i, i + 1))
                    .collect::<Result<Vec<_>>>()?;
                legs.push(Leg::join(parts));
            }
            routes.push(Value::Object(response::route(&legs, format)));
        }
        debug!(coordinates = phantoms.len(), routes = routes.len(), "route");

        Ok(json!({
            "code": "Ok",
            "routes": routes,
            "waypoints": waypoints
                .iter()
                .map(|&i| Value::Object(response::waypoint(&phantoms[i])))
                .collect::<Vec<_>>(),
        }))
    }

    pub fn nearest(&self, params: &NearestParameters) -> Result<Value> {
        params.validate(&self.config.limits)?;
        let filter = self.filter(&params.base, 0, params.number_of_results);
        let mut found = self
            .locator
            .nearest(&self.store, params.base.coordinates[0], &filter);
        found.truncate(params.number_of_results);
        if found.is_empty() {
            return Err(Error::NoCandidate {
                index: 0,
                radius: filter.radius,
            });
        }
        Ok(json!({
            "code": "Ok",
            "waypoints": found
                .iter()
                .map(|p| response::nearest_waypoint(&self.store, p))
                .collect::<Vec<_>>(),
        }))
    }

    pub fn table(&self, params: &TableParameters) -> Result<Value> {
        params.validate(&self.config.limits)?;
        let phantoms = self.snap_all(&params.base)?;
        let sources = params.source_indices();
        let destinations = params.destination_indices();
        let source_nodes: Vec<PhantomNode> = sources.iter().map(|&i| phantoms[i]).collect();
        let target_nodes: Vec<PhantomNode> = destinations.iter().map(|&i| phantoms[i]).collect();
        let matrix = self.search.many_to_many(&self.store, &source_nodes, &target_nodes);

        let fallback_point = |i: usize| match params.fallback_coordinate {
            FallbackCoordinate::Input => params.base.coordinates[i],
            FallbackCoordinate::Snapped => phantoms[i].location,
        };
        let mut durations = Vec::with_capacity(sources.len());
        let mut distances = Vec::with_capacity(sources.len());
        let mut fallback_cells = Vec::new();
        for (r, &i) in sources.iter().enumerate() {
            let mut duration_row = Vec::with_capacity(destinations.len());
            let mut distance_row = Vec::with_capacity(destinations.len());
            for (c, &j) in destinations.iter().enumerate() {
                match (matrix.weight(r, c), matrix.distance(r, c), params.fallback_speed) {
                    (Some(w), Some(d), _) => {
                        duration_row.push(json!(round1(response::seconds(w) * params.scale_factor)));
                        distance_row.push(json!(response::meters(d)));
                    }
                    (_, _, Some(speed)) => {
                        let crow = haversine_m(fallback_point(i), fallback_point(j));
                        duration_row.push(json!(round1(crow / speed * params.scale_factor)));
                        distance_row.push(json!(round1(crow)));
                        fallback_cells.push(json!([r, c]));
                    }
                    _ => {
                        duration_row.push(Value::Null);
                        distance_row.push(Value::Null);
                    }
                }
            }
            durations.push(Value::Array(duration_row));
            distances.push(Value::Array(distance_row));
        }
        debug!(sources = sources.len(), destinations = destinations.len(), "table");

        let mut out = Map::new();
        out.insert("code".into(), json!("Ok"));
        if params.annotations.duration {
            out.insert("durations".into(), Value::Array(durations));
        }
        if params.annotations.distance {
            out.insert("distances".into(), Value::Array(distances));
        }
        if !fallback_cells.is_empty() {
            out.insert("fallback_speed_cells".into(), Value::Array(fallback_cells));
        }
        out.insert(
            "sources".into(),
            Value::Array(sources.iter().map(|&i| Value::Object(response::waypoint(&phantoms[i]))).collect()),
        );
        out.insert(
            "destinations".into(),
            Value::Array(
                destinations
                    .iter()
                    .map(|&j| Value::Object(response::waypoint(&phantoms[j])))
                    .collect(),
            ),
        );
        Ok(Value::Object(out))
    }

    pub fn trip(&self, params: &TripParameters) -> Result<Value> {
        params.validate(&self.config.limits)?;
        let phantoms = self.snap_all(&params.base)?;
        let matrix = self.search.many_to_many(&self.store, &phantoms, &phantoms);
        let options = TripOptions {
            roundtrip: params.roundtrip,
            fixed_start: params.source == TripSource::First,
            fixed_end: params.destination == TripDestination::Last,
        };
        let plan = trip::solve(&matrix, options)?;

        let mut stops = plan.order.clone();
        if params.roundtrip {
            stops.push(plan.order[0]);
        }
        let legs = stops
            .windows(2)
            .map(|w| self.leg_between(&phantoms, w[0], w[1]))
            .collect::<Result<Vec<_>>>()?;
        let format = RouteFormat {
            annotations: params.annotations,
            geometries: params.geometries,
            overview: params.overview,
        };

        let mut position = vec![0; phantoms.len()];
        for (k, &i) in plan.order.iter().enumerate() {
            position[i] = k;
        }
        let waypoints: Vec<Value> = phantoms
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let mut w = response::waypoint(p);
                w.insert("waypoint_index".into(), json!(position[i]));
                w.insert("trips_index".into(), json!(0));
                Value::Object(w)
            })
            .collect();

        Ok(json!({
            "code": "Ok",
            "trips": [Value::Object(response::route(&legs, format))],
            "waypoints": waypoints,
        }))
    }

    pub fn match_trace(&self, params: &MatchParameters) -> Result<Value> {
        params.validate(&self.config.limits)?;
        let observations: Vec<Observation> = params
            .base
            .coordinates
            .iter()
            .enumerate()
            .map(|(i, &coordinate)| Observation {
                coordinate,
                timestamp: params.timestamps.get(i).copied(),
                radius: params.base.radius(i),
            })
            .collect();
        let options = MatchOptions {
            gaps: params.gaps,
            tidy: params.tidy,
            max_radius: self.config.limits.max_radius_map_matching,
        };
        let result = Matcher::new(&self.store, &self.locator, self.search.as_ref())
            .match_trace(&observations, &options)?;

        let format = RouteFormat {
            annotations: params.annotations,
            geometries: params.geometries,
            overview: params.overview,
        };
        let matchings: Vec<Value> = result
            .matchings
            .iter()
            .map(|m| {
                let legs: Vec<Leg> = m
                    .legs
                    .iter()
                    .zip(m.waypoints.windows(2))
                    .map(|(path, w)| leg::assemble(&self.store, &w[0], &w[1], path))
                    .collect();
                let mut route = response::route(&legs, format);
                route.insert("confidence".into(), json!(m.confidence));
                Value::Object(route)
            })
            .collect();
        let tracepoints: Vec<Value> = result
            .tracepoints
            .iter()
            .map(|tp| match tp {
                Some(tp) => {
                    let mut w = response::waypoint(&tp.phantom);
                    w.insert("matchings_index".into(), json!(tp.matchings_index));
                    w.insert("waypoint_index".into(), json!(tp.waypoint_index));
                    w.insert("alternatives_count".into(), json!(tp.alternatives_count));
                    Value::Object(w)
                }
                None => Value::Null,
            })
            .collect();

        Ok(json!({
            "code": "Ok",
            "matchings": matchings,
            "tracepoints": tracepoints,
        }))
    }

    pub fn tile(&self, params: &TileParameters) -> Result<Vec<u8>> {
        params.validate()?;
        Ok(tile::encode(&self.store, &self.locator, params.x, params.y, params.z))
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
