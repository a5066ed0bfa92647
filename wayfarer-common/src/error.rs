//! Error taxonomy shared by the wayfarer crates.
//!
//! Every failure a query or the offline builder can report maps to one
//! [`ErrorKind`], so callers can tell a bad parameter from an unreachable
//! destination without matching on message text.

use std::path::PathBuf;

use strsim::{jaro_winkler, normalized_levenshtein};
use thiserror::Error;

/// Main error type for wayfarer operations
#[derive(Debug, Error)]
pub enum Error {
    /// The artifact is missing, truncated, corrupt or from an incompatible version
    #[error("cannot load {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    /// The raw graph handed to the builder is malformed or disconnected
    #[error("graph build failed: {0}")]
    Build(String),

    /// No road segment passes the snapping filters for an input coordinate
    #[error("no road segment for coordinate {index} within {}", describe_radius(.radius))]
    NoCandidate { index: usize, radius: Option<f64> },

    /// Two waypoints are not connected
    #[error("no route between waypoint {from} and waypoint {to}")]
    NoRoute { from: usize, to: usize },

    /// Fewer waypoints than the operation needs
    #[error("{operation} needs at least {required} coordinates, got {actual}")]
    TooFewWaypoints {
        operation: &'static str,
        required: usize,
        actual: usize,
    },

    /// Not enough usable observations to match a trace
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A parameter value is out of range or inconsistent
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// File I/O error while writing an artifact
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discriminant of [`Error`], stable across message changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Load,
    Build,
    NoCandidate,
    NoRoute,
    TooFewWaypoints,
    InsufficientData,
    Validation,
    Io,
}

impl Error {
    pub fn load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Load { .. } => ErrorKind::Load,
            Error::Build(_) => ErrorKind::Build,
            Error::NoCandidate { .. } => ErrorKind::NoCandidate,
            Error::NoRoute { .. } => ErrorKind::NoRoute,
            Error::TooFewWaypoints { .. } => ErrorKind::TooFewWaypoints,
            Error::InsufficientData(_) => ErrorKind::InsufficientData,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Response code reported next to the message, e.g. `"NoRoute"`
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Load => "LoadError",
            ErrorKind::Build => "BuildError",
            ErrorKind::NoCandidate => "NoSegment",
            ErrorKind::NoRoute => "NoRoute",
            ErrorKind::TooFewWaypoints => "InvalidQuery",
            ErrorKind::InsufficientData => "NoMatch",
            ErrorKind::Validation => "InvalidValue",
            ErrorKind::Io => "IoError",
        }
    }
}

fn describe_radius(radius: &Option<f64>) -> String {
    match radius {
        Some(r) => format!("{r:.1} m"),
        None => "an unlimited radius".to_string(),
    }
}

/// Result type alias for wayfarer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Suggest the closest valid spelling for an enumerated parameter value.
///
/// Scores combine Jaro-Winkler (70%) and normalized Levenshtein (30%), plus
/// a bonus of up to 20% when the first characters agree, since option
/// names are usually mistyped at the end ("polylin", "durations").
/// Returns `None` for exact case-insensitive matches and for inputs that
/// score below 0.65 against every candidate.
pub fn suggest_correction(input: &str, candidates: &[&str]) -> Option<String> {
    if candidates.iter().any(|c| c.eq_ignore_ascii_case(input)) {
        return None;
    }

    let input_lower = input.to_lowercase();
    let min_threshold = 0.65;
    let mut best: Option<(&str, f64)> = None;

    for &candidate in candidates {
        let candidate_lower = candidate.to_lowercase();
        let combined = jaro_winkler(&input_lower, &candidate_lower) * 0.7
            + normalized_levenshtein(&input_lower, &candidate_lower) * 0.3;

        let mut bonus = 0.0;
        let prefix_len = input_lower.chars().count().min(7);
        if prefix_len >= 3 {
            let a: String = input_lower.chars().take(prefix_len).collect();
            let b: String = candidate_lower.chars().take(prefix_len).collect();
            let prefix_similarity = normalized_levenshtein(&a, &b);
            if prefix_similarity > 0.7 {
                bonus += 0.2 * prefix_similarity;
            }
        }

        let score = combined + bonus;
        if score >= min_threshold && best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    best.map(|(c, _)| c.to_string())
}

/// Build a validation error for an unknown enumerated value, with a
/// "did you mean" hint when one candidate is close enough.
pub fn unknown_value(field: &str, input: &str, candidates: &[&str]) -> Error {
    let message = match suggest_correction(input, candidates) {
        Some(s) => format!("unknown value '{input}', did you mean '{s}'?"),
        None => format!(
            "unknown value '{input}', expected one of: {}",
            candidates.join(", ")
        ),
    };
    Error::validation(field, message)
}
