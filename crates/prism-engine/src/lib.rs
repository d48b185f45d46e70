//! Prism engine crate.
//!
//! Execution core of a GPU image/video filter pipeline: the graphics device
//! abstraction, a pooled framebuffer cache, the rendering context with its
//! serialized render queue, and the processing-node protocol filter graphs are
//! built from.

pub mod cache;
pub mod context;
pub mod coords;
pub mod device;
pub mod logging;
pub mod node;
pub mod time;
