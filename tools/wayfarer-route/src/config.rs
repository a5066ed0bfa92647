//! Engine and build configuration, loadable from TOML.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use wayfarer_common::{unknown_value, Error, Result};

/// Query algorithm backing the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Bidirectional search over the contraction hierarchy
    #[default]
    Ch,
    /// Plain Dijkstra over the turn-expanded graph
    Dijkstra,
}

impl Algorithm {
    pub const NAMES: &'static [&'static str] = &["ch", "dijkstra"];
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ch" => Ok(Algorithm::Ch),
            "dijkstra" => Ok(Algorithm::Dijkstra),
            other => Err(unknown_value("algorithm", other, Self::NAMES)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Ch => "ch",
            Algorithm::Dijkstra => "dijkstra",
        })
    }
}

/// How artifact sections are brought into memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    /// Read the file and copy every section into owned vectors
    #[default]
    Load,
    /// Map the file and serve sections from the mapping
    Mmap,
}

impl MemoryMode {
    pub const NAMES: &'static [&'static str] = &["load", "mmap"];
}

impl FromStr for MemoryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "load" => Ok(MemoryMode::Load),
            "mmap" => Ok(MemoryMode::Mmap),
            other => Err(unknown_value("memory_mode", other, Self::NAMES)),
        }
    }
}

impl fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryMode::Load => "load",
            MemoryMode::Mmap => "mmap",
        })
    }
}

/// Per-request limits, checked before any search starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    pub max_locations_viaroute: usize,
    pub max_locations_distance_table: usize,
    pub max_locations_trip: usize,
    pub max_locations_map_matching: usize,
    pub max_results_nearest: usize,
    pub max_alternatives: usize,
    /// Meters; observation radiuses above it are rejected
    pub max_radius_map_matching: f64,
    /// Meters; snapping radius when a query gives none. `None` searches unbounded.
    pub default_radius: Option<f64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_locations_viaroute: 500,
            max_locations_distance_table: 100,
            max_locations_trip: 100,
            max_locations_map_matching: 100,
            max_results_nearest: 100,
            max_alternatives: 3,
            max_radius_map_matching: 50.0,
            default_radius: None,
        }
    }
}

impl Limits {
    /// Reject limits no query could satisfy
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("max_locations_viaroute", self.max_locations_viaroute, 2),
            ("max_locations_distance_table", self.max_locations_distance_table, 1),
            ("max_locations_trip", self.max_locations_trip, 2),
            ("max_locations_map_matching", self.max_locations_map_matching, 2),
            ("max_results_nearest", self.max_results_nearest, 1),
        ];
        for (field, value, min) in counts {
            if value < min {
                return Err(Error::validation(field, format!("{value} is below {min}")));
            }
        }
        if !(self.max_radius_map_matching.is_finite() && self.max_radius_map_matching > 0.0) {
            return Err(Error::validation(
                "max_radius_map_matching",
                format!("{} must be positive", self.max_radius_map_matching),
            ));
        }
        if let Some(r) = self.default_radius {
            if !(r.is_finite() && r > 0.0) {
                return Err(Error::validation("default_radius", format!("{r} must be positive")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Artifact written by `wayfarer-route build`
    pub dataset_path: PathBuf,
    pub algorithm: Algorithm,
    pub memory_mode: MemoryMode,
    /// Verify the CRC-64 footer on load
    pub verify_checksum: bool,
    pub limits: Limits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("graph.wfch"),
            algorithm: Algorithm::Ch,
            memory_mode: MemoryMode::Load,
            verify_checksum: true,
            limits: Limits::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(dataset_path: impl Into<PathBuf>) -> Self {
        Self {
            dataset_path: dataset_path.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::validation("config", e.message()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Parameters of the offline hierarchy build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Deciseconds added to a u-turn at a dead end
    pub u_turn_penalty: u32,
    /// Deciseconds added when passing a signalled node
    pub traffic_signal_penalty: u32,
    /// Accept inputs with more than one weakly connected component
    pub allow_disconnected: bool,
    /// Components below this many nodes are flagged tiny
    pub small_component_size: usize,
    /// Witness searches stop after this many hops
    pub witness_hop_limit: u32,
    /// Witness searches stop after settling this many vertices
    pub witness_settle_limit: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            u_turn_penalty: 200,
            traffic_signal_penalty: 20,
            allow_disconnected: false,
            small_component_size: 1000,
            witness_hop_limit: 16,
            witness_settle_limit: 500,
        }
    }
}

impl BuildConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::validation("build config", e.message()))
    }
}
