//! Graphics device abstraction.
//!
//! The pipeline core never talks to a graphics API directly. Everything it needs
//! (texture and render-target creation, program compilation and binding, limit and
//! extension queries, uploads and quad draws) goes through [`GraphicsDevice`].
//!
//! Backends:
//! - [`WgpuDevice`]: a headless wgpu device (no surface)
//! - [`HeadlessDevice`]: a bookkeeping-only device with allocation counters
//!
//! A device is owned by a rendering context and is only ever called from that
//! context's render queue.

mod error;
mod format;
mod gpu;
mod handle;
mod headless;
mod init;

pub use error::{DeviceError, ShaderError};
pub use format::{
    FilterMode, Limit, PixelFormat, TextureOptions, WrapMode, EXT_FRAMEBUFFER_FETCH,
    EXT_RED_TEXTURES,
};
pub use gpu::WgpuDevice;
pub use handle::{FramebufferHandle, GpuHandle, ProgramHandle, TextureHandle};
pub use headless::{DeviceStats, DrawRecord, HeadlessDevice, HeadlessDeviceBuilder};
pub use init::GpuInit;

pub(crate) use handle::HandleIds;

/// One textured quad draw into a render target.
///
/// Inputs are bound in order: input `i` at binding `2 * i`, its sampler at `2 * i + 1`.
/// Texture coordinates follow the GL convention: `t = 0` is the first uploaded row, and
/// an unrotated draw keeps every row where it was.
#[derive(Debug, Clone)]
pub struct QuadDraw<'a> {
    pub program: ProgramHandle,
    pub target: FramebufferHandle,
    pub inputs: &'a [TextureHandle],
    /// Clip-space positions, 4 vertices as a triangle strip.
    pub positions: [f32; 8],
    /// One set of texture coordinates for the 4 vertices per input, in input order.
    pub texture_coordinates: &'a [[f32; 8]],
    /// Linear RGBA the target is cleared to before drawing.
    pub clear_color: [f32; 4],
}

/// Capability surface the pipeline core depends on.
///
/// All methods take `&mut self`: a device is single-threaded by contract and the
/// rendering context serializes every call onto its queue.
pub trait GraphicsDevice: Send {
    /// Allocates texture storage.
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        options: &TextureOptions,
    ) -> Result<TextureHandle, DeviceError>;

    /// Creates a render target drawing into `texture`.
    fn create_framebuffer(&mut self, texture: TextureHandle) -> Result<FramebufferHandle, DeviceError>;

    /// Releases a texture, framebuffer or program. Unknown handles are ignored.
    fn destroy(&mut self, handle: GpuHandle);

    /// Compiles both stages and links them into a program.
    fn compile(&mut self, vertex: &str, fragment: &str) -> Result<ProgramHandle, ShaderError>;

    /// Makes `program` current for subsequent draws.
    fn bind_program(&mut self, program: ProgramHandle);

    fn query_limit(&mut self, limit: Limit) -> u32;

    fn query_extension(&mut self, name: &str) -> bool;

    /// Replaces the whole contents of `texture` with tightly packed rows of `format` pixels.
    fn upload(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
        bytes: &[u8],
    ) -> Result<(), DeviceError>;

    /// Clears the target and draws one quad with the bound program.
    fn draw_quad(&mut self, draw: &QuadDraw<'_>) -> Result<(), DeviceError>;
}

/// Number of bytes a tightly packed `width`×`height` image of `format` occupies.
#[inline]
pub(crate) fn packed_len(width: u32, height: u32, format: PixelFormat) -> usize {
    width as usize * height as usize * format.bytes_per_pixel() as usize
}
