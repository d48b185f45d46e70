use std::sync::atomic::{AtomicU32, Ordering};

use crate::coords::Size;
use crate::device::{FramebufferHandle, PixelFormat, TextureHandle, TextureOptions};

/// Stable identity of a pooled framebuffer. Never reused within one cache.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FramebufferId(pub(crate) u64);

impl FramebufferId {
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Pool key. Two framebuffers are interchangeable iff their keys are equal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FramebufferKey {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub options: TextureOptions,
}

impl FramebufferKey {
    pub fn new(width: u32, height: u32, format: PixelFormat, options: TextureOptions) -> Self {
        Self {
            width,
            height,
            format,
            options,
        }
    }
}

/// One GPU-resident image handed out by the [`FramebufferCache`](super::FramebufferCache).
///
/// Shared as `Arc<Framebuffer>`. The reference count is the pipeline's explicit
/// retain/release count, not the `Arc` strong count: while it is above zero the
/// object stays checked out and is never handed to another producer.
#[derive(Debug)]
pub struct Framebuffer {
    id: FramebufferId,
    key: FramebufferKey,
    texture: TextureHandle,
    framebuffer: Option<FramebufferHandle>,
    generation: u64,

    // Only written with the cache lock held.
    refcount: AtomicU32,
}

impl Framebuffer {
    pub(crate) fn new(
        id: FramebufferId,
        key: FramebufferKey,
        texture: TextureHandle,
        framebuffer: Option<FramebufferHandle>,
        generation: u64,
    ) -> Self {
        Self {
            id,
            key,
            texture,
            framebuffer,
            generation,
            refcount: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> FramebufferId {
        self.id
    }

    #[inline]
    pub fn key(&self) -> FramebufferKey {
        self.key
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.key.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.key.height
    }

    #[inline]
    pub fn size(&self) -> Size {
        Size::from_pixels(self.key.width, self.key.height)
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.key.format
    }

    #[inline]
    pub fn options(&self) -> TextureOptions {
        self.key.options
    }

    #[inline]
    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    /// Render-target handle; `None` for upload-only textures.
    #[inline]
    pub fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer
    }

    /// Cache generation the object was allocated in.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current retain count. Zero while the object sits in the pool.
    #[inline]
    pub fn retain_count(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn set_retain_count(&self, count: u32) {
        self.refcount.store(count, Ordering::Release);
    }
}
