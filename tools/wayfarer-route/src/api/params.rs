//! Query parameters for every operation, validated before any search runs.

use std::fmt;
use std::str::FromStr;

use wayfarer_common::{unknown_value, Error, Result};

use crate::config::Limits;
use crate::geo::Coordinate;

/// Enumerated option parsed case-insensitively from its lowercase name.
/// An empty string selects the default.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            pub const NAMES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let lower = s.to_ascii_lowercase();
                if lower.is_empty() {
                    return Ok(Self::default());
                }
                match lower.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(unknown_value($field, s, Self::NAMES)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Side of the road a waypoint must be reached from
    Approach, "approach", {
        Unrestricted => "unrestricted",
        Curb => "curb",
        Opposite => "opposite",
    }
);

string_enum!(
    /// `default` skips segments of tiny components, `any` does not
    Snapping, "snapping", {
        Default => "default",
        Any => "any",
    }
);

string_enum!(Geometries, "geometries", {
    Polyline => "polyline",
    Polyline6 => "polyline6",
    GeoJson => "geojson",
});

string_enum!(Overview, "overview", {
    Simplified => "simplified",
    Full => "full",
    False => "false",
});

string_enum!(FallbackCoordinate, "fallback_coordinate", {
    Input => "input",
    Snapped => "snapped",
});

string_enum!(TripSource, "source", {
    Any => "any",
    First => "first",
});

string_enum!(TripDestination, "destination", {
    Any => "any",
    Last => "last",
});

string_enum!(Gaps, "gaps", {
    Split => "split",
    Ignore => "ignore",
});

/// Required heading at a waypoint: `value` +/- `range` degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bearing {
    pub value: u16,
    pub range: u16,
}

impl Bearing {
    pub fn new(value: u16, range: u16) -> Self {
        Self { value, range }
    }

    pub fn validate(&self, field: &str) -> Result<()> {
        if self.value > 360 {
            return Err(Error::validation(field, format!("bearing {} exceeds 360", self.value)));
        }
        if self.range > 180 {
            return Err(Error::validation(field, format!("bearing range {} exceeds 180", self.range)));
        }
        Ok(())
    }
}

impl FromStr for Bearing {
    type Err = Error;

    /// `value,range`, e.g. `90,20`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::validation("bearings", format!("expected `value,range`, got {s:?}"));
        let (value, range) = s.split_once(',').ok_or_else(invalid)?;
        let bearing = Bearing {
            value: value.trim().parse().map_err(|_| invalid())?,
            range: range.trim().parse().map_err(|_| invalid())?,
        };
        bearing.validate("bearings")?;
        Ok(bearing)
    }
}

/// Extra per-coordinate values along a route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotations {
    pub duration: bool,
    pub distance: bool,
    pub weight: bool,
    pub speed: bool,
    pub nodes: bool,
}

impl Annotations {
    pub const NAMES: &'static [&'static str] =
        &["none", "duration", "distance", "weight", "speed", "nodes", "all"];

    pub fn all() -> Self {
        Self {
            duration: true,
            distance: true,
            weight: true,
            speed: true,
            nodes: true,
        }
    }

    pub fn any(&self) -> bool {
        self.duration || self.distance || self.weight || self.speed || self.nodes
    }

    pub fn parse_list<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let mut out = Self::default();
        for item in items {
            match item.as_ref().to_ascii_lowercase().as_str() {
                "none" => {}
                "duration" => out.duration = true,
                "distance" => out.distance = true,
                "weight" => out.weight = true,
                "speed" => out.speed = true,
                "nodes" => out.nodes = true,
                "all" => out = Self::all(),
                _ => return Err(unknown_value("annotations", item.as_ref(), Self::NAMES)),
            }
        }
        Ok(out)
    }
}

/// Matrices a table query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableAnnotations {
    pub duration: bool,
    pub distance: bool,
}

impl Default for TableAnnotations {
    fn default() -> Self {
        Self {
            duration: true,
            distance: false,
        }
    }
}

impl TableAnnotations {
    pub const NAMES: &'static [&'static str] = &["duration", "distance", "all"];

    pub fn parse_list<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let mut out = Self {
            duration: false,
            distance: false,
        };
        for item in items {
            match item.as_ref().to_ascii_lowercase().as_str() {
                "duration" => out.duration = true,
                "distance" => out.distance = true,
                "all" => {
                    out.duration = true;
                    out.distance = true;
                }
                _ => return Err(unknown_value("annotations", item.as_ref(), Self::NAMES)),
            }
        }
        if !out.duration && !out.distance {
            return Ok(Self::default());
        }
        Ok(out)
    }
}

/// Coordinates and the per-coordinate snapping hints shared by all queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseParameters {
    pub coordinates: Vec<Coordinate>,
    /// Empty, or one entry per coordinate
    pub bearings: Vec<Option<Bearing>>,
    /// Meters; empty, or one entry per coordinate
    pub radiuses: Vec<Option<f64>>,
    /// Empty, or one entry per coordinate
    pub approaches: Vec<Option<Approach>>,
    pub snapping: Snapping,
}

impl BaseParameters {
    pub fn new(coordinates: Vec<Coordinate>) -> Self {
        Self {
            coordinates,
            ..Self::default()
        }
    }

    pub fn bearing(&self, i: usize) -> Option<Bearing> {
        self.bearings.get(i).copied().flatten()
    }

    pub fn radius(&self, i: usize) -> Option<f64> {
        self.radiuses.get(i).copied().flatten()
    }

    pub fn approach(&self, i: usize) -> Approach {
        self.approaches.get(i).copied().flatten().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.coordinates.len();
        for (i, c) in self.coordinates.iter().enumerate() {
            c.validate(&format!("coordinates[{i}]"))?;
        }
        check_aligned("bearings", self.bearings.len(), n)?;
        check_aligned("radiuses", self.radiuses.len(), n)?;
        check_aligned("approaches", self.approaches.len(), n)?;
        for (i, b) in self.bearings.iter().enumerate() {
            if let Some(b) = b {
                b.validate(&format!("bearings[{i}]"))?;
            }
        }
        for (i, r) in self.radiuses.iter().enumerate() {
            if let Some(r) = *r {
                if !r.is_finite() || r < 0.0 {
                    return Err(Error::validation(
                        format!("radiuses[{i}]"),
                        format!("{r} is not a non-negative distance"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn require(&self, operation: &'static str, required: usize) -> Result<()> {
        if self.coordinates.len() < required {
            return Err(Error::TooFewWaypoints {
                operation,
                required,
                actual: self.coordinates.len(),
            });
        }
        Ok(())
    }

    fn limit(&self, field: &str, max: usize) -> Result<()> {
        if self.coordinates.len() > max {
            return Err(Error::validation(
                field,
                format!("{} coordinates exceed the limit of {max}", self.coordinates.len()),
            ));
        }
        Ok(())
    }
}

fn check_aligned(field: &str, len: usize, n: usize) -> Result<()> {
    if len != 0 && len != n {
        return Err(Error::validation(
            field,
            format!("has {len} entries for {n} coordinates"),
        ));
    }
    Ok(())
}

fn check_indices(field: &str, indices: &[usize], n: usize) -> Result<()> {
    if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
        return Err(Error::validation(
            field,
            format!("index {bad} is out of range for {n} coordinates"),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteParameters {
    pub base: BaseParameters,
    /// Number of alternative routes wanted besides the best one
    pub alternatives: usize,
    pub annotations: Annotations,
    pub geometries: Geometries,
    pub overview: Overview,
    /// Coordinate indices that delimit legs; empty means every coordinate
    pub waypoints: Vec<usize>,
}

impl RouteParameters {
    pub fn new(coordinates: Vec<Coordinate>) -> Self {
        Self {
            base: BaseParameters::new(coordinates),
            alternatives: 0,
            annotations: Annotations::default(),
            geometries: Geometries::default(),
            overview: Overview::default(),
            waypoints: Vec::new(),
        }
    }

    pub fn validate(&self, limits: &Limits) -> Result<()> {
        self.base.require("route", 2)?;
        self.base.limit("coordinates", limits.max_locations_viaroute)?;
        self.base.validate()?;
        if self.alternatives > limits.max_alternatives {
            return Err(Error::validation(
                "alternatives",
                format!("{} exceeds the limit of {}", self.alternatives, limits.max_alternatives),
            ));
        }
        if !self.waypoints.is_empty() {
            let n = self.base.coordinates.len();
            check_indices("waypoints", &self.waypoints, n)?;
            if self.waypoints.first() != Some(&0) || self.waypoints.last() != Some(&(n - 1)) {
                return Err(Error::validation(
                    "waypoints",
                    "must start with the first and end with the last coordinate",
                ));
            }
            if self.waypoints.windows(2).any(|w| w[0] >= w[1]) {
                return Err(Error::validation("waypoints", "indices must be strictly increasing"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearestParameters {
    pub base: BaseParameters,
    pub number_of_results: usize,
}

impl NearestParameters {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            base: BaseParameters::new(vec![coordinate]),
            number_of_results: 1,
        }
    }

    pub fn validate(&self, limits: &Limits) -> Result<()> {
        if self.base.coordinates.len() != 1 {
            return Err(Error::validation(
                "coordinates",
                format!("nearest takes exactly one coordinate, got {}", self.base.coordinates.len()),
            ));
        }
        self.base.validate()?;
        if self.number_of_results == 0 || self.number_of_results > limits.max_results_nearest {
            return Err(Error::validation(
                "number_of_results",
                format!(
                    "{} is outside 1..={}",
                    self.number_of_results, limits.max_results_nearest
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableParameters {
    pub base: BaseParameters,
    /// Empty means every coordinate
    pub sources: Vec<usize>,
    /// Empty means every coordinate
    pub destinations: Vec<usize>,
    pub annotations: TableAnnotations,
    /// Meters per second used to estimate unreachable pairs
    pub fallback_speed: Option<f64>,
    pub fallback_coordinate: FallbackCoordinate,
    pub scale_factor: f64,
}

impl TableParameters {
    pub fn new(coordinates: Vec<Coordinate>) -> Self {
        Self {
            base: BaseParameters::new(coordinates),
            sources: Vec::new(),
            destinations: Vec::new(),
            annotations: TableAnnotations::default(),
            fallback_speed: None,
            fallback_coordinate: FallbackCoordinate::default(),
            scale_factor: 1.0,
        }
    }

    pub fn source_indices(&self) -> Vec<usize> {
        if self.sources.is_empty() {
            (0..self.base.coordinates.len()).collect()
        } else {
            self.sources.clone()
        }
    }

    pub fn destination_indices(&self) -> Vec<usize> {
        if self.destinations.is_empty() {
            (0..self.base.coordinates.len()).collect()
        } else {
            self.destinations.clone()
        }
    }

    pub fn validate(&self, limits: &Limits) -> Result<()> {
        self.base.require("table", 1)?;
        self.base.limit("coordinates", limits.max_locations_distance_table)?;
        self.base.validate()?;
        let n = self.base.coordinates.len();
        check_indices("sources", &self.sources, n)?;
        check_indices("destinations", &self.destinations, n)?;
        if let Some(speed) = self.fallback_speed {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(Error::validation("fallback_speed", format!("{speed} must be positive")));
            }
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(Error::validation(
                "scale_factor",
                format!("{} must be positive", self.scale_factor),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripParameters {
    pub base: BaseParameters,
    pub roundtrip: bool,
    pub source: TripSource,
    pub destination: TripDestination,
    pub annotations: Annotations,
    pub geometries: Geometries,
    pub overview: Overview,
}

impl TripParameters {
    pub fn new(coordinates: Vec<Coordinate>) -> Self {
        Self {
            base: BaseParameters::new(coordinates),
            roundtrip: true,
            source: TripSource::Any,
            destination: TripDestination::Any,
            annotations: Annotations::default(),
            geometries: Geometries::default(),
            overview: Overview::default(),
        }
    }

    pub fn validate(&self, limits: &Limits) -> Result<()> {
        self.base.require("trip", 2)?;
        self.base.limit("coordinates", limits.max_locations_trip)?;
        self.base.validate()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchParameters {
    pub base: BaseParameters,
    /// Seconds since an arbitrary epoch; empty, or one per coordinate
    pub timestamps: Vec<u64>,
    pub gaps: Gaps,
    pub tidy: bool,
    pub annotations: Annotations,
    pub geometries: Geometries,
    pub overview: Overview,
}

impl MatchParameters {
    pub fn new(coordinates: Vec<Coordinate>) -> Self {
        Self {
            base: BaseParameters::new(coordinates),
            timestamps: Vec::new(),
            gaps: Gaps::Split,
            tidy: false,
            annotations: Annotations::default(),
            geometries: Geometries::default(),
            overview: Overview::default(),
        }
    }

    pub fn validate(&self, limits: &Limits) -> Result<()> {
        self.base.require("match", 2)?;
        self.base.limit("coordinates", limits.max_locations_map_matching)?;
        self.base.validate()?;
        check_aligned("timestamps", self.timestamps.len(), self.base.coordinates.len())?;
        if self.timestamps.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::validation("timestamps", "must not decrease"));
        }
        for (i, r) in self.base.radiuses.iter().enumerate() {
            if let Some(r) = *r {
                if r > limits.max_radius_map_matching {
                    return Err(Error::validation(
                        format!("radiuses[{i}]"),
                        format!("{r} exceeds the limit of {}", limits.max_radius_map_matching),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileParameters {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl TileParameters {
    pub const MAX_ZOOM: u32 = 22;

    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn validate(&self) -> Result<()> {
        if self.z > Self::MAX_ZOOM {
            return Err(Error::validation("z", format!("{} exceeds {}", self.z, Self::MAX_ZOOM)));
        }
        let size = 1u64 << self.z;
        if self.x as u64 >= size || self.y as u64 >= size {
            return Err(Error::validation(
                "x/y",
                format!("({}, {}) outside the {size}x{size} grid of zoom {}", self.x, self.y, self.z),
            ));
        }
        Ok(())
    }
}
