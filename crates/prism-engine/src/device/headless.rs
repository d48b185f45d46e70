use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    packed_len, DeviceError, FramebufferHandle, GpuHandle, GraphicsDevice, HandleIds, Limit,
    PixelFormat, ProgramHandle, QuadDraw, ShaderError, TextureHandle, TextureOptions,
    EXT_RED_TEXTURES,
};

/// Counters shared between a [`HeadlessDevice`] and whoever holds its stats handle.
///
/// The device is moved into a rendering context; tests keep the `Arc<DeviceStats>`
/// to observe allocations from outside the render queue.
#[derive(Debug, Default)]
pub struct DeviceStats {
    textures_created: AtomicUsize,
    textures_destroyed: AtomicUsize,
    framebuffers_created: AtomicUsize,
    framebuffers_destroyed: AtomicUsize,
    programs_compiled: AtomicUsize,
    programs_destroyed: AtomicUsize,
    program_binds: AtomicUsize,
    uploads: AtomicUsize,
    draws: AtomicUsize,
    last_draw: Mutex<Option<DrawRecord>>,
}

/// What the most recent quad draw looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: ProgramHandle,
    pub target: FramebufferHandle,
    pub inputs: Vec<TextureHandle>,
    /// One set per input.
    pub texture_coordinates: Vec<[f32; 8]>,
}

impl DeviceStats {
    pub fn textures_created(&self) -> usize {
        self.textures_created.load(Ordering::SeqCst)
    }

    pub fn textures_destroyed(&self) -> usize {
        self.textures_destroyed.load(Ordering::SeqCst)
    }

    pub fn live_textures(&self) -> usize {
        self.textures_created() - self.textures_destroyed()
    }

    pub fn framebuffers_created(&self) -> usize {
        self.framebuffers_created.load(Ordering::SeqCst)
    }

    pub fn framebuffers_destroyed(&self) -> usize {
        self.framebuffers_destroyed.load(Ordering::SeqCst)
    }

    pub fn programs_compiled(&self) -> usize {
        self.programs_compiled.load(Ordering::SeqCst)
    }

    pub fn programs_destroyed(&self) -> usize {
        self.programs_destroyed.load(Ordering::SeqCst)
    }

    pub fn program_binds(&self) -> usize {
        self.program_binds.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }

    pub fn last_draw(&self) -> Option<DrawRecord> {
        self.last_draw.lock().ok().and_then(|d| d.clone())
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct ProgramRecord {
    /// `@binding` declarations in the fragment stage; 0 when the source declares none.
    bindings: usize,
}

#[derive(Debug)]
struct TextureRecord {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

/// Builder for [`HeadlessDevice`].
#[derive(Debug, Clone)]
pub struct HeadlessDeviceBuilder {
    max_texture_size: u32,
    max_texture_units: u32,
    max_varying_vectors: u32,
    extensions: HashSet<String>,
    texture_budget: Option<usize>,
    reject_draws: bool,
}

impl Default for HeadlessDeviceBuilder {
    fn default() -> Self {
        Self {
            max_texture_size: 4096,
            max_texture_units: 8,
            max_varying_vectors: 8,
            extensions: HashSet::from([EXT_RED_TEXTURES.to_string()]),
            texture_budget: None,
            reject_draws: false,
        }
    }
}

impl HeadlessDeviceBuilder {
    pub fn max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }

    pub fn max_texture_units(mut self, units: u32) -> Self {
        self.max_texture_units = units;
        self
    }

    pub fn max_varying_vectors(mut self, vectors: u32) -> Self {
        self.max_varying_vectors = vectors;
        self
    }

    pub fn extension(mut self, name: &str) -> Self {
        self.extensions.insert(name.to_string());
        self
    }

    pub fn without_extension(mut self, name: &str) -> Self {
        self.extensions.remove(name);
        self
    }

    /// Fails texture creation with `OutOfMemory` once this many textures are alive.
    pub fn texture_budget(mut self, live_textures: usize) -> Self {
        self.texture_budget = Some(live_textures);
        self
    }

    /// Fails every quad draw with a backend error.
    pub fn reject_draws(mut self) -> Self {
        self.reject_draws = true;
        self
    }

    pub fn build(self) -> HeadlessDevice {
        HeadlessDevice {
            limits: self,
            ids: HandleIds::default(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            bound: None,
            stats: Arc::new(DeviceStats::default()),
        }
    }
}

/// Graphics device that performs no rendering.
///
/// It issues handles, keeps texture storage on the CPU, validates every call the
/// way a real backend would (unknown handles, upload sizes, entry points) and counts
/// what happened. Used by the test suite and as a fallback when no GPU adapter exists.
#[derive(Debug)]
pub struct HeadlessDevice {
    limits: HeadlessDeviceBuilder,
    ids: HandleIds,
    textures: HashMap<TextureHandle, TextureRecord>,
    framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    programs: HashMap<ProgramHandle, ProgramRecord>,
    bound: Option<ProgramHandle>,
    stats: Arc<DeviceStats>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HeadlessDeviceBuilder {
        HeadlessDeviceBuilder::default()
    }

    /// Shared counters; stays valid after the device moves into a context.
    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }

    /// CPU copy of a texture's contents.
    pub fn pixels(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture).map(|t| t.pixels.as_slice())
    }

    pub fn bound_program(&self) -> Option<ProgramHandle> {
        self.bound
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        _options: &TextureOptions,
    ) -> Result<TextureHandle, DeviceError> {
        if let Some(budget) = self.limits.texture_budget {
            if self.textures.len() >= budget {
                return Err(DeviceError::OutOfMemory { what: "texture" });
            }
        }

        let handle = TextureHandle(self.ids.next());
        self.textures.insert(
            handle,
            TextureRecord {
                width,
                height,
                format,
                pixels: vec![0; packed_len(width, height, format)],
            },
        );
        DeviceStats::bump(&self.stats.textures_created);
        log::trace!("headless: texture {handle:?} {width}x{height} {format:?}");
        Ok(handle)
    }

    fn create_framebuffer(&mut self, texture: TextureHandle) -> Result<FramebufferHandle, DeviceError> {
        if !self.textures.contains_key(&texture) {
            return Err(DeviceError::UnknownHandle(texture.into()));
        }
        let handle = FramebufferHandle(self.ids.next());
        self.framebuffers.insert(handle, texture);
        DeviceStats::bump(&self.stats.framebuffers_created);
        Ok(handle)
    }

    fn destroy(&mut self, handle: GpuHandle) {
        match handle {
            GpuHandle::Texture(t) => {
                if self.textures.remove(&t).is_some() {
                    DeviceStats::bump(&self.stats.textures_destroyed);
                }
            }
            GpuHandle::Framebuffer(f) => {
                if self.framebuffers.remove(&f).is_some() {
                    DeviceStats::bump(&self.stats.framebuffers_destroyed);
                }
            }
            GpuHandle::Program(p) => {
                if self.programs.remove(&p).is_some() {
                    DeviceStats::bump(&self.stats.programs_destroyed);
                }
                if self.bound == Some(p) {
                    self.bound = None;
                }
            }
        }
    }

    fn compile(&mut self, vertex: &str, fragment: &str) -> Result<ProgramHandle, ShaderError> {
        if vertex.trim().is_empty() {
            return Err(ShaderError::Compile("vertex stage: empty source".to_string()));
        }
        if fragment.trim().is_empty() {
            return Err(ShaderError::Compile("fragment stage: empty source".to_string()));
        }
        if !vertex.contains("vs_main") {
            return Err(ShaderError::Link("vertex entry point `vs_main` not found".to_string()));
        }
        if !fragment.contains("fs_main") {
            return Err(ShaderError::Link("fragment entry point `fs_main` not found".to_string()));
        }

        let handle = ProgramHandle(self.ids.next());
        self.programs.insert(
            handle,
            ProgramRecord {
                bindings: fragment.matches("@binding(").count(),
            },
        );
        DeviceStats::bump(&self.stats.programs_compiled);
        Ok(handle)
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        if self.programs.contains_key(&program) {
            self.bound = Some(program);
            DeviceStats::bump(&self.stats.program_binds);
        } else {
            log::warn!("headless: bind of unknown program {program:?} ignored");
        }
    }

    fn query_limit(&mut self, limit: Limit) -> u32 {
        match limit {
            Limit::MaxTextureSize => self.limits.max_texture_size,
            Limit::MaxTextureUnits => self.limits.max_texture_units,
            Limit::MaxVaryingVectors => self.limits.max_varying_vectors,
        }
    }

    fn query_extension(&mut self, name: &str) -> bool {
        self.limits.extensions.contains(name)
    }

    fn upload(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
        bytes: &[u8],
    ) -> Result<(), DeviceError> {
        let record = self
            .textures
            .get_mut(&texture)
            .ok_or(DeviceError::UnknownHandle(texture.into()))?;

        let expected = packed_len(record.width, record.height, record.format);
        if (width, height, format) != (record.width, record.height, record.format)
            || bytes.len() != expected
        {
            return Err(DeviceError::InvalidUpload {
                expected,
                got: bytes.len(),
            });
        }

        record.pixels.copy_from_slice(bytes);
        DeviceStats::bump(&self.stats.uploads);
        Ok(())
    }

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) -> Result<(), DeviceError> {
        let program = self
            .programs
            .get(&draw.program)
            .ok_or(DeviceError::UnknownHandle(draw.program.into()))?;
        if !self.framebuffers.contains_key(&draw.target) {
            return Err(DeviceError::UnknownHandle(draw.target.into()));
        }
        if let Some(missing) = draw.inputs.iter().find(|t| !self.textures.contains_key(t)) {
            return Err(DeviceError::UnknownHandle((*missing).into()));
        }
        if draw.texture_coordinates.len() != draw.inputs.len() {
            return Err(DeviceError::Backend(format!(
                "{} texture coordinate sets for {} inputs",
                draw.texture_coordinates.len(),
                draw.inputs.len()
            )));
        }
        // Same rule as an auto-derived bind group layout: every binding the program
        // declares must be supplied, and nothing more.
        if program.bindings != 0 && program.bindings != 2 * draw.inputs.len() {
            return Err(DeviceError::Backend(format!(
                "program declares {} bindings, draw supplies {}",
                program.bindings,
                2 * draw.inputs.len()
            )));
        }
        if self.limits.reject_draws {
            return Err(DeviceError::Backend("draw rejected".to_string()));
        }

        DeviceStats::bump(&self.stats.draws);
        if let Ok(mut last) = self.stats.last_draw.lock() {
            *last = Some(DrawRecord {
                program: draw.program,
                target: draw.target,
                inputs: draw.inputs.to_vec(),
                texture_coordinates: draw.texture_coordinates.to_vec(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "@vertex fn vs_main() {}";
    const FS: &str = "@fragment fn fs_main() {}";

    #[test]
    fn counts_allocations_and_destruction() {
        let mut dev = HeadlessDevice::new();
        let stats = dev.stats();

        let t = dev
            .create_texture(4, 4, PixelFormat::Rgba8, &TextureOptions::default())
            .unwrap();
        let f = dev.create_framebuffer(t).unwrap();
        assert_eq!(stats.textures_created(), 1);
        assert_eq!(stats.framebuffers_created(), 1);

        dev.destroy(f.into());
        dev.destroy(t.into());
        dev.destroy(t.into());
        assert_eq!(stats.textures_destroyed(), 1);
        assert_eq!(stats.framebuffers_destroyed(), 1);
        assert_eq!(stats.live_textures(), 0);
    }

    #[test]
    fn framebuffer_needs_live_texture() {
        let mut dev = HeadlessDevice::new();
        let err = dev.create_framebuffer(TextureHandle(99)).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownHandle(GpuHandle::Texture(_))));
    }

    #[test]
    fn compile_reports_empty_and_unlinkable_sources() {
        let mut dev = HeadlessDevice::new();
        assert!(matches!(dev.compile("  ", FS), Err(ShaderError::Compile(_))));
        assert!(matches!(dev.compile(VS, "@fragment fn main() {}"), Err(ShaderError::Link(_))));
        assert!(dev.compile(VS, FS).is_ok());
    }

    #[test]
    fn upload_checks_length() {
        let mut dev = HeadlessDevice::new();
        let t = dev
            .create_texture(2, 2, PixelFormat::Luminance8, &TextureOptions::texture_only())
            .unwrap();
        assert!(matches!(
            dev.upload(t, 2, 2, PixelFormat::Luminance8, &[0; 3]),
            Err(DeviceError::InvalidUpload { expected: 4, got: 3 })
        ));
        dev.upload(t, 2, 2, PixelFormat::Luminance8, &[1, 2, 3, 4]).unwrap();
        assert_eq!(dev.pixels(t), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn texture_budget_reports_out_of_memory() {
        let mut dev = HeadlessDevice::builder().texture_budget(1).build();
        let opts = TextureOptions::default();
        dev.create_texture(1, 1, PixelFormat::Rgba8, &opts).unwrap();
        assert!(matches!(
            dev.create_texture(1, 1, PixelFormat::Rgba8, &opts),
            Err(DeviceError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn draw_must_supply_every_declared_binding() {
        let mut dev = HeadlessDevice::new();
        let opts = TextureOptions::default();
        let a = dev.create_texture(4, 4, PixelFormat::Rgba8, &opts).unwrap();
        let b = dev.create_texture(4, 4, PixelFormat::Rgba8, &opts).unwrap();
        let out = dev.create_texture(4, 4, PixelFormat::Rgba8, &opts).unwrap();
        let target = dev.create_framebuffer(out).unwrap();
        let one_input = "@group(0) @binding(0) var t: texture_2d<f32>;\n\
                         @group(0) @binding(1) var s: sampler;\n\
                         @fragment fn fs_main() {}";
        let program = dev.compile(VS, one_input).unwrap();

        let coords = [[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0]; 2];
        let draw = QuadDraw {
            program,
            target,
            inputs: &[a, b],
            positions: [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0],
            texture_coordinates: &coords,
            clear_color: [0.0; 4],
        };
        assert!(matches!(dev.draw_quad(&draw), Err(DeviceError::Backend(_))));

        let short = QuadDraw {
            inputs: &[a],
            texture_coordinates: &coords,
            ..draw.clone()
        };
        assert!(matches!(dev.draw_quad(&short), Err(DeviceError::Backend(_))));

        let single = QuadDraw {
            texture_coordinates: &coords[..1],
            ..short
        };
        dev.draw_quad(&single).unwrap();
        assert_eq!(dev.stats().draws(), 1);
    }

    #[test]
    fn destroying_bound_program_unbinds_it() {
        let mut dev = HeadlessDevice::new();
        let p = dev.compile(VS, FS).unwrap();
        dev.bind_program(p);
        assert_eq!(dev.bound_program(), Some(p));
        dev.destroy(p.into());
        assert_eq!(dev.bound_program(), None);
    }
}
