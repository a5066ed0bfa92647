//! CLI commands for wayfarer-route

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use crate::api::params::{
    Annotations, Approach, BaseParameters, Bearing, FallbackCoordinate, Gaps, Geometries, MatchParameters, NearestParameters,
    Overview, RouteParameters, Snapping, TableAnnotations, TableParameters, TileParameters,
    TripDestination, TripParameters, TripSource,
};
use crate::api::Engine;
use crate::config::{Algorithm, BuildConfig, EngineConfig, MemoryMode};
use crate::geo::Coordinate;
use crate::graph::{GraphStore, RawGraph};

#[derive(Parser)]
#[command(name = "wayfarer-route")]
#[command(about = "Contraction-hierarchy road routing engine", long_about = None)]
pub struct Cli {
    /// Log filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// How to open the routing artifact
#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
    /// Artifact written by `build`
    #[arg(short, long)]
    graph: Option<PathBuf>,

    /// Engine configuration (TOML); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Search backend: ch or dijkstra
    #[arg(long)]
    algorithm: Option<Algorithm>,

    /// load (read into memory) or mmap
    #[arg(long)]
    memory_mode: Option<MemoryMode>,
}

impl DatasetArgs {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_toml_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(graph) = &self.graph {
            config.dataset_path = graph.clone();
        }
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if let Some(mode) = self.memory_mode {
            config.memory_mode = mode;
        }
        Ok(config)
    }

    fn engine(&self) -> Result<Engine> {
        let config = self.engine_config()?;
        let path = config.dataset_path.clone();
        let start = Instant::now();
        let engine = Engine::new(config).with_context(|| format!("loading {}", path.display()))?;
        info!(path = %path.display(), ms = start.elapsed().as_millis() as u64, "loaded graph");
        Ok(engine)
    }
}

/// Waypoint options shared by every coordinate query
#[derive(Args, Debug, Clone)]
pub struct WaypointArgs {
    /// Waypoints as `lon,lat;lon,lat;...`
    #[arg(long, value_delimiter = ';', value_parser = parse_coordinate, required = true)]
    coordinates: Vec<Coordinate>,

    /// Per-waypoint search radius in meters, `;`-separated, empty for unlimited
    #[arg(long, value_delimiter = ';')]
    radiuses: Vec<String>,

    /// Per-waypoint `value,range` heading in degrees, `;`-separated, empty for any
    #[arg(long, value_delimiter = ';')]
    bearings: Vec<String>,

    /// Per-waypoint approach, `;`-separated
    #[arg(long, value_delimiter = ';')]
    approaches: Vec<String>,

    /// default or any
    #[arg(long, default_value = "default")]
    snapping: Snapping,
}

impl WaypointArgs {
    fn apply(&self, base: &mut BaseParameters) -> Result<()> {
        base.coordinates = self.coordinates.clone();
        base.radiuses = self
            .radiuses
            .iter()
            .map(|r| parse_optional(r, "radiuses"))
            .collect::<Result<_>>()?;
        base.bearings = self
            .bearings
            .iter()
            .map(|b| -> Result<Option<Bearing>> {
                if b.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(b.parse()?))
                }
            })
            .collect::<Result<_>>()?;
        base.approaches = self
            .approaches
            .iter()
            .map(|a| -> Result<Option<Approach>> {
                if a.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(a.parse()?))
                }
            })
            .collect::<Result<_>>()?;
        base.snapping = self.snapping;
        Ok(())
    }
}

/// Route-shaped output options
#[derive(Args, Debug, Clone)]
pub struct FormatArgs {
    /// Comma-separated: duration, distance, weight, speed, nodes, all
    #[arg(long, value_delimiter = ',')]
    annotations: Vec<String>,

    /// polyline, polyline6 or geojson
    #[arg(long, default_value = "polyline")]
    geometries: Geometries,

    /// simplified, full or false
    #[arg(long, default_value = "simplified")]
    overview: Overview,
}

impl FormatArgs {
    fn annotations(&self) -> Result<Annotations> {
        Ok(Annotations::parse_list(&self.annotations)?)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the routing artifact from a raw graph JSON document
    Build {
        /// Raw graph (nodes, segments, restrictions)
        #[arg(short, long)]
        input: PathBuf,

        /// Output artifact
        #[arg(short, long)]
        output: PathBuf,

        /// Build configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print counts and provenance of an artifact
    Info {
        #[command(flatten)]
        dataset: DatasetArgs,
    },

    /// Shortest route through the waypoints
    Route {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        waypoints: WaypointArgs,
        #[command(flatten)]
        format: FormatArgs,

        /// Alternatives to search for (two waypoints only)
        #[arg(long, default_value = "0")]
        alternatives: usize,

        /// Coordinate indices that start and end legs, `;`-separated; every
        /// coordinate when absent
        #[arg(long = "waypoints", value_delimiter = ';')]
        leg_waypoints: Vec<usize>,
    },

    /// Closest road positions to one coordinate
    Nearest {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        waypoints: WaypointArgs,

        #[arg(long, default_value = "1")]
        number: usize,
    },

    /// Duration/distance matrix
    Table {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        waypoints: WaypointArgs,

        /// Source indices, `;`-separated; all when absent
        #[arg(long, value_delimiter = ';')]
        sources: Vec<usize>,

        /// Destination indices, `;`-separated; all when absent
        #[arg(long, value_delimiter = ';')]
        destinations: Vec<usize>,

        /// duration, distance (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "duration")]
        annotations: Vec<String>,

        /// Crow-fly speed in m/s for unreachable pairs
        #[arg(long)]
        fallback_speed: Option<f64>,

        #[arg(long, default_value = "input")]
        fallback_coordinate: FallbackCoordinate,

        #[arg(long, default_value = "1.0")]
        scale_factor: f64,
    },

    /// Visiting order of all waypoints
    Trip {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        waypoints: WaypointArgs,
        #[command(flatten)]
        format: FormatArgs,

        #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
        roundtrip: bool,

        #[arg(long, default_value = "any")]
        source: TripSource,

        #[arg(long, default_value = "any")]
        destination: TripDestination,
    },

    /// Snap a GPS trace onto the road network
    Match {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        waypoints: WaypointArgs,
        #[command(flatten)]
        format: FormatArgs,

        /// Unix seconds per point, `;`-separated
        #[arg(long, value_delimiter = ';')]
        timestamps: Vec<u64>,

        /// split or ignore
        #[arg(long, default_value = "split")]
        gaps: Gaps,

        #[arg(long)]
        tidy: bool,
    },

    /// Write one vector tile of the graph
    Tile {
        #[command(flatten)]
        dataset: DatasetArgs,

        #[arg(short)]
        z: u32,
        #[arg(short)]
        x: u32,
        #[arg(short)]
        y: u32,

        /// Output .mvt file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compare hierarchy answers with Dijkstra on random positions
    Validate {
        #[command(flatten)]
        dataset: DatasetArgs,

        #[arg(long, default_value = "1000")]
        queries: usize,

        #[arg(long, default_value = "20")]
        matrix_size: usize,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn parse_coordinate(s: &str) -> std::result::Result<Coordinate, String> {
    let (lon, lat) = s
        .split_once(',')
        .ok_or_else(|| format!("'{s}' is not lon,lat"))?;
    let lon = lon.trim().parse::<f64>().map_err(|e| format!("longitude '{lon}': {e}"))?;
    let lat = lat.trim().parse::<f64>().map_err(|e| format!("latitude '{lat}': {e}"))?;
    Ok(Coordinate::new(lon, lat))
}

fn parse_optional(s: &str, field: &str) -> Result<Option<f64>> {
    if s.is_empty() || s == "unlimited" {
        return Ok(None);
    }
    let v = s
        .parse::<f64>()
        .with_context(|| format!("{field}: '{s}' is not a number"))?;
    Ok(Some(v))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_artifact(store: &GraphStore, output: &Path) -> Result<()> {
    let start = Instant::now();
    store
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), ms = start.elapsed().as_millis() as u64, "saved artifact");
    Ok(())
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Build { input, output, config } => {
                let config = match config {
                    Some(path) => BuildConfig::from_toml_str(&std::fs::read_to_string(&path)?)
                        .with_context(|| format!("reading {}", path.display()))?,
                    None => BuildConfig::default(),
                };
                let raw = RawGraph::from_json_file(&input)
                    .with_context(|| format!("reading {}", input.display()))?;
                let start = Instant::now();
                let store = crate::contract::build(&raw, &config)?;
                info!(ms = start.elapsed().as_millis() as u64, "built hierarchy");
                write_artifact(&store, &output)
            }
            Commands::Info { dataset } => {
                let engine = dataset.engine()?;
                let store = engine.store();
                print_json(&json!({
                    "nodes": store.node_count(),
                    "segments": store.edge_count(),
                    "turn_rules": store.turn_rule_count(),
                    "upward_arcs": store.up().arc_count(),
                    "downward_arcs": store.down().arc_count(),
                    "shortcuts": store.up().shortcut_count() + store.down().shortcut_count(),
                    "u_turn_penalty": store.meta().u_turn_penalty,
                    "traffic_signal_penalty": store.meta().traffic_signal_penalty,
                    "input_sha256": hex::encode(store.meta().input_sha256),
                    "mapped": store.is_mapped(),
                }))
            }
            Commands::Route {
                dataset,
                waypoints,
                format,
                alternatives,
                leg_waypoints,
            } => {
                let engine = dataset.engine()?;
                let mut params = RouteParameters::new(Vec::new());
                waypoints.apply(&mut params.base)?;
                params.alternatives = alternatives;
                params.waypoints = leg_waypoints;
                params.annotations = format.annotations()?;
                params.geometries = format.geometries;
                params.overview = format.overview;
                print_json(&engine.route(&params)?)
            }
            Commands::Nearest {
                dataset,
                waypoints,
                number,
            } => {
                let engine = dataset.engine()?;
                let mut params = NearestParameters::new(waypoints.coordinates[0]);
                waypoints.apply(&mut params.base)?;
                params.number_of_results = number;
                print_json(&engine.nearest(&params)?)
            }
            Commands::Table {
                dataset,
                waypoints,
                sources,
                destinations,
                annotations,
                fallback_speed,
                fallback_coordinate,
                scale_factor,
            } => {
                let engine = dataset.engine()?;
                let mut params = TableParameters::new(Vec::new());
                waypoints.apply(&mut params.base)?;
                params.sources = sources;
                params.destinations = destinations;
                params.annotations = TableAnnotations::parse_list(&annotations)?;
                params.fallback_speed = fallback_speed;
                params.fallback_coordinate = fallback_coordinate;
                params.scale_factor = scale_factor;
                print_json(&engine.table(&params)?)
            }
            Commands::Trip {
                dataset,
                waypoints,
                format,
                roundtrip,
                source,
                destination,
            } => {
                let engine = dataset.engine()?;
                let mut params = TripParameters::new(Vec::new());
                waypoints.apply(&mut params.base)?;
                params.roundtrip = roundtrip;
                params.source = source;
                params.destination = destination;
                params.annotations = format.annotations()?;
                params.geometries = format.geometries;
                params.overview = format.overview;
                print_json(&engine.trip(&params)?)
            }
            Commands::Match {
                dataset,
                waypoints,
                format,
                timestamps,
                gaps,
                tidy,
            } => {
                let engine = dataset.engine()?;
                let mut params = MatchParameters::new(Vec::new());
                waypoints.apply(&mut params.base)?;
                params.timestamps = timestamps;
                params.gaps = gaps;
                params.tidy = tidy;
                params.annotations = format.annotations()?;
                params.geometries = format.geometries;
                params.overview = format.overview;
                print_json(&engine.match_trace(&params)?)
            }
            Commands::Tile {
                dataset,
                z,
                x,
                y,
                output,
            } => {
                let engine = dataset.engine()?;
                let bytes = engine.tile(&TileParameters::new(x, y, z))?;
                std::fs::write(&output, &bytes)
                    .with_context(|| format!("writing {}", output.display()))?;
                info!(z, x, y, bytes = bytes.len(), path = %output.display(), "wrote tile");
                Ok(())
            }
            Commands::Validate {
                dataset,
                queries,
                matrix_size,
                seed,
            } => {
                let engine = dataset.engine()?;
                let report = crate::validate::validate(engine.store(), queries, matrix_size, seed)?;
                print_json(&json!({
                    "queries": report.queries,
                    "correct": report.correct,
                    "incorrect": report.incorrect,
                    "unreachable_both": report.unreachable_both,
                }))?;
                if !report.passed() {
                    anyhow::bail!("{} of {} queries disagree", report.incorrect, report.queries);
                }
                Ok(())
            }
        }
    }
}
