//! Frame timestamps.
//!
//! Sources stamp every frame with a [`FrameTime`]; filters forward the stamp unchanged.
//! A [`FrameClock`] derives monotonic stamps for sources whose capture layer does not
//! provide presentation times.

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};
