//! Query surface: parameters in, JSON documents (or tile bytes) out.

mod engine;
pub mod geometry;
pub mod params;
mod response;

pub use engine::Engine;
pub use response::WEIGHT_NAME;
