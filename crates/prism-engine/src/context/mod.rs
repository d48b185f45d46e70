//! Rendering context.
//!
//! The graphics device is only ever driven from one thread: the render queue. A
//! [`RenderContext`] bundles that queue with everything shared by a filter graph
//! (framebuffer cache, compiled programs, current program binding, capabilities)
//! and is passed explicitly to every node. Several contexts may coexist.

mod capabilities;
mod queue;
mod render;

pub use capabilities::Capabilities;
pub use queue::{QueueStopped, RenderQueue};
pub use render::{ContextConfig, ContextError, Program, RenderContext};
