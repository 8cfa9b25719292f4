pub mod dvalue;
pub mod geometry;

// Re-export types for convenience.
pub use crate::types::dvalue::DValue;
pub use crate::types::geometry::{centroid, reproject, Crs, Envelope, Geometry, Point};
