//! Framebuffer cache.
//!
//! Per-frame allocation of GPU images is too slow for a video pipeline, so every
//! output frame comes from a pool keyed by (width, height, format, texture options).
//! Producers `acquire` an object, consumers `retain` it for as long as they sample it,
//! and each party `release`s its reference; at zero the object goes back to the pool.

mod error;
mod framebuffer;
mod pool;

pub use error::CacheError;
pub use framebuffer::{Framebuffer, FramebufferId, FramebufferKey};
pub use pool::{CacheConfig, CacheStats, FramebufferCache};
