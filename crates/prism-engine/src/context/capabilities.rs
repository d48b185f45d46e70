use std::sync::Arc;

use super::{QueueStopped, RenderQueue};
use crate::device::{Limit, EXT_FRAMEBUFFER_FETCH, EXT_RED_TEXTURES};

/// Device limits and well-known extensions, queried once per context.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Capabilities {
    pub max_texture_size: u32,
    pub max_texture_units: u32,
    pub max_varying_vectors: u32,
    pub framebuffer_readback: bool,
    pub red_channel_textures: bool,
}

impl Capabilities {
    /// Asks the device on the render queue.
    pub fn query(queue: &Arc<RenderQueue>) -> Result<Self, QueueStopped> {
        queue.device_sync(|device| Self {
            max_texture_size: device.query_limit(Limit::MaxTextureSize),
            max_texture_units: device.query_limit(Limit::MaxTextureUnits),
            max_varying_vectors: device.query_limit(Limit::MaxVaryingVectors),
            framebuffer_readback: device.query_extension(EXT_FRAMEBUFFER_FETCH),
            red_channel_textures: device.query_extension(EXT_RED_TEXTURES),
        })
    }
}
