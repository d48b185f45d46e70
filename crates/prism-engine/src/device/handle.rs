/// Opaque texture handle issued by a [`GraphicsDevice`](super::GraphicsDevice).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TextureHandle(pub(crate) u64);

/// Opaque render-target handle bound to one texture.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FramebufferHandle(pub(crate) u64);

/// Opaque linked shader program.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProgramHandle(pub(crate) u64);

macro_rules! raw_handle {
    ($ty:ident) => {
        impl $ty {
            /// Wraps a backend-defined id. Backends outside this crate use this to mint handles.
            #[inline]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

raw_handle!(TextureHandle);
raw_handle!(FramebufferHandle);
raw_handle!(ProgramHandle);

/// Any handle a device can destroy.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum GpuHandle {
    Texture(TextureHandle),
    Framebuffer(FramebufferHandle),
    Program(ProgramHandle),
}

impl From<TextureHandle> for GpuHandle {
    fn from(h: TextureHandle) -> Self {
        GpuHandle::Texture(h)
    }
}

impl From<FramebufferHandle> for GpuHandle {
    fn from(h: FramebufferHandle) -> Self {
        GpuHandle::Framebuffer(h)
    }
}

impl From<ProgramHandle> for GpuHandle {
    fn from(h: ProgramHandle) -> Self {
        GpuHandle::Program(h)
    }
}

/// Monotonic id source shared by the backends. Id 0 is never issued.
#[derive(Debug, Default)]
pub(crate) struct HandleIds {
    next: u64,
}

impl HandleIds {
    pub(crate) fn next(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}
