//! Geometry used to associate recognized text with layout regions.

pub mod containment;
pub mod geometry;

pub use containment::CenterIndex;
pub use geometry::{Point, Polygon, Rect, containment_score};
