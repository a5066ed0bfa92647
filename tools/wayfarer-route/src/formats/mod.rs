//! On-disk formats of the routing artifact

pub mod crc;
pub mod graph_file;
pub mod section;

pub use section::Section;
