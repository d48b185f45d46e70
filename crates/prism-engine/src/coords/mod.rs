//! Geometry shared by the cache and the node graph.
//!
//! Sizes are in pixels. Rotation modes describe how a consumer samples its input;
//! quarter-turn modes swap width and height of the produced frame.

mod rotation;
mod size;

pub use rotation::{RotationMode, QUAD_POSITIONS};
pub use size::Size;
