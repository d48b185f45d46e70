/// Pixel storage of a texture.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Bgra8,
    /// Single-channel luminance, stored in the red channel.
    Luminance8,
    Rgba16Float,
}

impl PixelFormat {
    #[inline]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Luminance8 => 1,
            PixelFormat::Rgba16Float => 8,
        }
    }

    /// True for formats that need red-channel-only texture support on the device.
    #[inline]
    pub const fn is_single_channel(self) -> bool {
        matches!(self, PixelFormat::Luminance8)
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

impl WrapMode {
    /// Repeating modes are only defined for power-of-two textures on the lowest-common-denominator
    /// devices this pipeline targets.
    #[inline]
    pub const fn requires_power_of_two(self) -> bool {
        !matches!(self, WrapMode::ClampToEdge)
    }
}

/// Sampling and usage options of a texture; part of the framebuffer cache key.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TextureOptions {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,

    /// Attach a framebuffer so the texture can be drawn into.
    ///
    /// Sources that only upload pixel data set this to `false`.
    pub render_target: bool,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::ClampToEdge,
            render_target: true,
        }
    }
}

impl TextureOptions {
    /// Options for an upload-only texture (no render target).
    pub fn texture_only() -> Self {
        Self {
            render_target: false,
            ..Self::default()
        }
    }

    #[inline]
    pub const fn requires_power_of_two(&self) -> bool {
        self.wrap_s.requires_power_of_two() || self.wrap_t.requires_power_of_two()
    }
}

/// Device limits the core asks about.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Limit {
    MaxTextureSize,
    MaxTextureUnits,
    MaxVaryingVectors,
}

/// Extension name for red-channel-only (single-channel) textures.
pub const EXT_RED_TEXTURES: &str = "texture_rg";

/// Extension name for reading the current framebuffer value inside a fragment shader.
pub const EXT_FRAMEBUFFER_FETCH: &str = "framebuffer_fetch";
