//! Processing node protocol.
//!
//! A filter graph is a set of [`ProcessingNode`]s wired producer → consumer through
//! [`Targets`]. Producers hand GPU-resident frames (pooled [`Framebuffer`]s) to their
//! targets together with the size and rotation the consumer should assume; consumers
//! retain a frame for as long as they need it and release it to the cache afterwards.
//!
//! Stock nodes:
//! - [`RawDataSource`]: uploads raw pixel data (optionally a luminance plane)
//! - [`Filter`]: one program pass over N inputs
//! - [`FrameSink`]: terminal consumer holding the latest frame
//!
//! Node lifecycle: `Idle → Receiving → Processing → Idle`, with `Ended` terminal and
//! reachable from anywhere through [`ProcessingNode::end_processing`].

mod error;
mod filter;
mod inputs;
mod shaders;
mod sink;
mod source;
mod targets;

use std::sync::Arc;

pub use error::NodeError;
pub use filter::{Filter, FilterConfig};
pub use shaders::{PASSTHROUGH_FRAGMENT, PASSTHROUGH_VERTEX};
pub use sink::{FrameSink, SinkFrame};
pub use source::{RawDataSource, RawFrame, SourceConfig};
pub use targets::{Target, Targets};

use crate::cache::Framebuffer;
use crate::coords::{RotationMode, Size};
use crate::time::FrameTime;

/// Where a node is in its per-frame cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NodeState {
    /// Holds no input frames.
    Idle,
    /// Holds some input frames, waiting for the rest.
    Receiving,
    /// A pass is in flight.
    Processing,
    /// Terminated. Accepts nothing and delivers nothing.
    Ended,
}

/// A stage of the filter graph.
///
/// Methods take `&self`: nodes are shared as `Arc<dyn ProcessingNode>` between their
/// producers and may be driven from the render queue and from producer threads.
pub trait ProcessingNode: Send + Sync {
    /// Retains `frame` into input slot `index`, releasing the frame previously held there.
    fn set_input_frame(&self, frame: &Arc<Framebuffer>, index: usize) -> Result<(), NodeError>;

    /// Unrotated size of the frame arriving at `index`.
    fn set_input_size(&self, size: Size, index: usize) -> Result<(), NodeError>;

    /// Transform to apply when sampling input `index`.
    fn set_input_rotation(&self, rotation: RotationMode, index: usize) -> Result<(), NodeError>;

    /// The frame at `index` is complete. Once every input is ready the node runs its pass.
    fn notify_frame_ready(&self, time: FrameTime, index: usize) -> Result<(), NodeError>;

    /// Lowest input slot no producer has claimed yet.
    fn next_available_input_index(&self) -> Result<usize, NodeError>;

    /// A producer registered itself for slot `index`.
    fn attach_input(&self, index: usize) -> Result<(), NodeError> {
        let _ = index;
        Ok(())
    }

    /// The producer registered for `index` went away.
    fn detach_input(&self, index: usize) {
        let _ = index;
    }

    /// Size of the frame the node would produce, `Size::UNCONSTRAINED` when unknown.
    fn maximum_output_size(&self) -> Size {
        Size::UNCONSTRAINED
    }

    /// Terminates the node, releasing every frame it holds exactly once, and cascades
    /// to its targets. Idempotent.
    fn end_processing(&self);

    fn state(&self) -> NodeState;

    fn enabled(&self) -> bool {
        true
    }

    /// Producers skip a node that wants to ignore updates.
    fn should_ignore_updates(&self) -> bool {
        false
    }

    fn wants_monochrome_input(&self) -> bool {
        false
    }

    /// Tells the node whether the frames it is about to receive are single-channel.
    fn set_receiving_monochrome_input(&self, receiving: bool) {
        let _ = receiving;
    }
}
