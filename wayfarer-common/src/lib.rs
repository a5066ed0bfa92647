//! Common types for the wayfarer routing engine

pub mod error;

pub use error::{suggest_correction, unknown_value, Error, ErrorKind, Result};
