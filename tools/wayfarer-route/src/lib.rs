//! Road routing over a turn-expanded contraction hierarchy.
//!
//! The offline builder ([`contract::build`]) turns a [`graph::RawGraph`]
//! into a [`graph::GraphStore`], which is saved as a single checksummed
//! artifact. [`api::Engine`] loads that artifact and answers route,
//! nearest, table, trip, match and tile queries.

pub mod api;
pub mod cli;
pub mod config;
pub mod contract;
pub mod formats;
pub mod geo;
pub mod graph;
pub mod locate;
pub mod matching;
pub mod search;
pub mod tile;
pub mod validate;

pub use api::Engine;
pub use config::{BuildConfig, EngineConfig};
pub use graph::{GraphStore, RawGraph};
