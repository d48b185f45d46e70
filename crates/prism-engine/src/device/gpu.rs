use std::collections::HashMap;

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;

use super::{
    packed_len, DeviceError, FilterMode, FramebufferHandle, GpuHandle, GpuInit, GraphicsDevice,
    HandleIds, Limit, PixelFormat, ProgramHandle, QuadDraw, ShaderError, TextureHandle,
    TextureOptions, WrapMode, EXT_FRAMEBUFFER_FETCH, EXT_RED_TEXTURES,
};
use crate::coords::RotationMode;

/// WebGPU guarantees at least 16 inter-stage variables and exposes no query for more.
const INTER_STAGE_VARIABLES: u32 = 16;

/// Interleaved triangle-strip vertices: position at location 0, then one texture
/// coordinate per input at locations 1..=N.
struct QuadVertices {
    floats: Vec<f32>,
    sets: usize,
}

impl QuadVertices {
    /// Converts GL-style coordinates (first row at `t = 0`, drawn at the bottom) to
    /// wgpu's top-left origin by flipping `t`. Without it every pass mirrors vertically.
    fn new(positions: &[f32; 8], coordinates: &[[f32; 8]]) -> Self {
        static IDENTITY: [[f32; 8]; 1] = [RotationMode::None.texture_coordinates()];
        let coordinates = if coordinates.is_empty() { &IDENTITY[..] } else { coordinates };

        let mut floats = Vec::with_capacity(4 * (2 + 2 * coordinates.len()));
        for i in 0..4 {
            floats.extend_from_slice(&[positions[2 * i], positions[2 * i + 1]]);
            for uv in coordinates {
                floats.extend_from_slice(&[uv[2 * i], 1.0 - uv[2 * i + 1]]);
            }
        }
        Self {
            floats,
            sets: coordinates.len(),
        }
    }

    fn attributes(sets: usize) -> Vec<wgpu::VertexAttribute> {
        (0..=sets)
            .map(|location| wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: (location * 2 * std::mem::size_of::<f32>()) as u64,
                shader_location: location as u32,
            })
            .collect()
    }

    fn stride(sets: usize) -> u64 {
        ((1 + sets) * 2 * std::mem::size_of::<f32>()) as u64
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: PixelFormat,
    options: TextureOptions,
}

struct RenderTarget {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

struct GpuProgram {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    /// Pipelines depend on the target format and the number of coordinate sets; built
    /// on first use.
    pipelines: HashMap<(wgpu::TextureFormat, usize), wgpu::RenderPipeline>,
}

/// [`GraphicsDevice`] backed by a headless wgpu device.
///
/// Programs are WGSL: the vertex stage entry point is `vs_main` (inputs: location 0
/// position, location `1 + i` texture coordinate of input `i`), the fragment stage entry
/// point is `fs_main`. Sources are validated with naga before they reach wgpu so that
/// diagnostics come back as [`ShaderError`] instead of a device error.
///
/// Every wgpu call runs inside validation and out-of-memory error scopes; captured
/// errors are returned as [`DeviceError`] rather than reaching wgpu's uncaptured-error
/// handler, which panics.
pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    label: String,

    ids: HandleIds,
    textures: HashMap<TextureHandle, GpuTexture>,
    targets: HashMap<FramebufferHandle, RenderTarget>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    samplers: HashMap<TextureOptions, wgpu::Sampler>,
    bound: Option<ProgramHandle>,
}

impl WgpuDevice {
    /// Requests an adapter and device without a surface.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: GpuInit) -> Result<Self> {
        let GpuInit {
            power_preference,
            force_fallback_adapter,
            required_features,
            required_limits,
            label,
        } = init;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(label.as_str()),
                required_features,
                required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let info = adapter.get_info();
        log::info!("wgpu device ready: {} ({:?})", info.name, info.backend);

        Ok(Self {
            adapter,
            device,
            queue,
            label,
            ids: HandleIds::default(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            programs: HashMap::new(),
            samplers: HashMap::new(),
            bound: None,
        })
    }

    /// Blocking variant of [`WgpuDevice::new`].
    pub fn new_blocking(init: GpuInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Copies a texture back to the CPU as tightly packed rows, first row first.
    ///
    /// Blocks until the GPU has finished every submitted draw.
    pub fn read_pixels(&mut self, texture: TextureHandle) -> Result<Vec<u8>, DeviceError> {
        let tex = self
            .textures
            .get(&texture)
            .ok_or(DeviceError::UnknownHandle(texture.into()))?;
        let row = tex.width * tex.format.bytes_per_pixel();
        let padded_row = row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = scoped(&self.device, "readback", || {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("prism readback buffer"),
                size: u64::from(padded_row) * u64::from(tex.height),
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("prism readback encoder"),
                });
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &tex.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_row),
                        rows_per_image: Some(tex.height),
                    },
                },
                wgpu::Extent3d {
                    width: tex.width,
                    height: tex.height,
                    depth_or_array_layers: 1,
                },
            );
            self.queue.submit(std::iter::once(encoder.finish()));
            staging
        })?;

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| DeviceError::Backend(format!("readback poll: {e}")))?;
        rx.recv()
            .map_err(|_| DeviceError::Backend("readback callback dropped".to_string()))?
            .map_err(|e| DeviceError::Backend(format!("readback map: {e}")))?;

        let mut pixels = Vec::with_capacity(packed_len(tex.width, tex.height, tex.format));
        {
            let mapped = slice.get_mapped_range();
            for chunk in mapped.chunks(padded_row as usize) {
                pixels.extend_from_slice(&chunk[..row as usize]);
            }
        }
        staging.unmap();
        Ok(pixels)
    }

    fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
        match format {
            PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
            PixelFormat::Luminance8 => wgpu::TextureFormat::R8Unorm,
            PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        }
    }
}

fn filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn address_mode(mode: WrapMode) -> wgpu::AddressMode {
    match mode {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

/// Parses and validates one WGSL stage, checking that `entry` exists for `stage`.
fn validate_stage(
    source: &str,
    stage: naga::ShaderStage,
    entry: &str,
) -> Result<(), ShaderError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| ShaderError::Compile(e.emit_to_string(source)))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| ShaderError::Compile(e.emit_to_string(source)))?;

    if !module
        .entry_points
        .iter()
        .any(|ep| ep.stage == stage && ep.name == entry)
    {
        return Err(ShaderError::Link(format!(
            "{stage:?} entry point `{entry}` not found"
        )));
    }
    Ok(())
}

/// Runs `f` inside out-of-memory and validation error scopes and turns whatever they
/// captured into a [`DeviceError`]. Scopes are per thread; all calls come from the
/// render queue.
fn scoped<T>(
    device: &wgpu::Device,
    what: &'static str,
    f: impl FnOnce() -> T,
) -> Result<T, DeviceError> {
    let oom = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let validation = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let invalid = pollster::block_on(validation.pop());
    let exhausted = pollster::block_on(oom.pop());

    match (exhausted, invalid) {
        (Some(_), _) => Err(DeviceError::OutOfMemory { what }),
        (None, Some(e)) => Err(DeviceError::Backend(format!("{what}: {e}"))),
        (None, None) => Ok(value),
    }
}

fn ensure_pipeline<'p>(
    device: &wgpu::Device,
    label: &str,
    program: &'p mut GpuProgram,
    format: wgpu::TextureFormat,
    sets: usize,
) -> Result<&'p wgpu::RenderPipeline, DeviceError> {
    let key = (format, sets);
    if !program.pipelines.contains_key(&key) {
        let attributes = QuadVertices::attributes(sets);
        let pipeline = scoped(device, "render pipeline", || {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(format!("{label} program pipeline").as_str()),
                // Auto layout: bindings are whatever the program declares.
                layout: None,
                vertex: wgpu::VertexState {
                    module: &program.vertex,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: QuadVertices::stride(sets),
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.fragment,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        })?;
        program.pipelines.insert(key, pipeline);
    }
    program
        .pipelines
        .get(&key)
        .ok_or_else(|| DeviceError::Backend("pipeline missing after creation".to_string()))
}

impl GraphicsDevice for WgpuDevice {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        options: &TextureOptions,
    ) -> Result<TextureHandle, DeviceError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(DeviceError::Backend(format!(
                "{width}x{height} exceeds the {max}px texture limit"
            )));
        }

        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if options.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }

        let (texture, view) = scoped(&self.device, "texture", || {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(format!("{} framebuffer texture", self.label).as_str()),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: Self::texture_format(format),
                usage,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            (texture, view)
        })?;

        let handle = TextureHandle(self.ids.next());
        self.textures.insert(
            handle,
            GpuTexture {
                texture,
                view,
                width,
                height,
                format,
                options: *options,
            },
        );
        Ok(handle)
    }

    fn create_framebuffer(&mut self, texture: TextureHandle) -> Result<FramebufferHandle, DeviceError> {
        let tex = self
            .textures
            .get(&texture)
            .ok_or(DeviceError::UnknownHandle(texture.into()))?;
        if !tex.options.render_target {
            return Err(DeviceError::Backend(
                "texture was created without render-target usage".to_string(),
            ));
        }

        let view = scoped(&self.device, "render target view", || {
            tex.texture.create_view(&wgpu::TextureViewDescriptor::default())
        })?;
        let handle = FramebufferHandle(self.ids.next());
        self.targets.insert(
            handle,
            RenderTarget {
                view,
                format: Self::texture_format(tex.format),
            },
        );
        Ok(handle)
    }

    fn destroy(&mut self, handle: GpuHandle) {
        match handle {
            GpuHandle::Texture(t) => {
                if let Some(tex) = self.textures.remove(&t) {
                    tex.texture.destroy();
                }
            }
            GpuHandle::Framebuffer(f) => {
                self.targets.remove(&f);
            }
            GpuHandle::Program(p) => {
                self.programs.remove(&p);
                if self.bound == Some(p) {
                    self.bound = None;
                }
            }
        }
    }

    fn compile(&mut self, vertex: &str, fragment: &str) -> Result<ProgramHandle, ShaderError> {
        validate_stage(vertex, naga::ShaderStage::Vertex, "vs_main")?;
        validate_stage(fragment, naga::ShaderStage::Fragment, "fs_main")?;

        let (vertex, fragment) = scoped(&self.device, "shader module", || {
            let vertex = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(format!("{} vertex stage", self.label).as_str()),
                source: wgpu::ShaderSource::Wgsl(vertex.into()),
            });
            let fragment = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(format!("{} fragment stage", self.label).as_str()),
                source: wgpu::ShaderSource::Wgsl(fragment.into()),
            });
            (vertex, fragment)
        })
        .map_err(|e| ShaderError::Compile(e.to_string()))?;

        let handle = ProgramHandle(self.ids.next());
        self.programs.insert(
            handle,
            GpuProgram {
                vertex,
                fragment,
                pipelines: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        // wgpu binds pipelines per pass; remember the choice for validation in draw_quad.
        self.bound = Some(program);
    }

    fn query_limit(&mut self, limit: Limit) -> u32 {
        let limits = self.device.limits();
        match limit {
            Limit::MaxTextureSize => limits.max_texture_dimension_2d,
            Limit::MaxTextureUnits => limits.max_sampled_textures_per_shader_stage,
            Limit::MaxVaryingVectors => INTER_STAGE_VARIABLES,
        }
    }

    fn query_extension(&mut self, name: &str) -> bool {
        let features = self.device.features();
        match name {
            EXT_RED_TEXTURES => true,
            // WGSL has no framebuffer fetch.
            EXT_FRAMEBUFFER_FETCH => false,
            "float32_filterable" => features.contains(wgpu::Features::FLOAT32_FILTERABLE),
            "timestamp_query" => features.contains(wgpu::Features::TIMESTAMP_QUERY),
            "texture_compression_bc" => features.contains(wgpu::Features::TEXTURE_COMPRESSION_BC),
            _ => false,
        }
    }

    fn upload(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
        bytes: &[u8],
    ) -> Result<(), DeviceError> {
        let tex = self
            .textures
            .get(&texture)
            .ok_or(DeviceError::UnknownHandle(texture.into()))?;

        let expected = packed_len(tex.width, tex.height, tex.format);
        if (width, height, format) != (tex.width, tex.height, tex.format) || bytes.len() != expected {
            return Err(DeviceError::InvalidUpload {
                expected,
                got: bytes.len(),
            });
        }

        scoped(&self.device, "texture upload", || {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &tex.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytes,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * format.bytes_per_pixel()),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            )
        })
    }

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) -> Result<(), DeviceError> {
        if self.bound != Some(draw.program) {
            log::debug!("draw with {:?} while {:?} is bound", draw.program, self.bound);
        }
        if draw.texture_coordinates.len() != draw.inputs.len() {
            return Err(DeviceError::Backend(format!(
                "{} texture coordinate sets for {} inputs",
                draw.texture_coordinates.len(),
                draw.inputs.len()
            )));
        }

        // Samplers first: they need `&mut self.samplers` before the views are borrowed.
        for input in draw.inputs {
            let tex = self
                .textures
                .get(input)
                .ok_or(DeviceError::UnknownHandle((*input).into()))?;
            let options = tex.options;
            let device = &self.device;
            if !self.samplers.contains_key(&options) {
                let sampler = scoped(device, "sampler", || {
                    device.create_sampler(&wgpu::SamplerDescriptor {
                        label: Some("prism input sampler"),
                        address_mode_u: address_mode(options.wrap_s),
                        address_mode_v: address_mode(options.wrap_t),
                        address_mode_w: wgpu::AddressMode::ClampToEdge,
                        mag_filter: filter_mode(options.mag_filter),
                        min_filter: filter_mode(options.min_filter),
                        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
                        ..Default::default()
                    })
                })?;
                self.samplers.insert(options, sampler);
            }
        }

        let target = self
            .targets
            .get(&draw.target)
            .ok_or(DeviceError::UnknownHandle(draw.target.into()))?;
        let program = self
            .programs
            .get_mut(&draw.program)
            .ok_or(DeviceError::UnknownHandle(draw.program.into()))?;
        let vertices = QuadVertices::new(&draw.positions, draw.texture_coordinates);
        let pipeline = ensure_pipeline(&self.device, &self.label, program, target.format, vertices.sets)?;

        let mut entries = Vec::with_capacity(draw.inputs.len() * 2);
        for (i, input) in draw.inputs.iter().enumerate() {
            let tex = &self.textures[input];
            let sampler = &self.samplers[&tex.options];
            entries.push(wgpu::BindGroupEntry {
                binding: (2 * i) as u32,
                resource: wgpu::BindingResource::TextureView(&tex.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: (2 * i + 1) as u32,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        let device = &self.device;
        let queue = &self.queue;
        scoped(device, "quad draw", || {
            let bind_group = (!entries.is_empty()).then(|| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("prism input bind group"),
                    layout: &pipeline.get_bind_group_layout(0),
                    entries: &entries,
                })
            });

            let vbo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("prism quad vbo"),
                contents: bytemuck::cast_slice(&vertices.floats),
                usage: wgpu::BufferUsages::VERTEX,
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("prism quad encoder"),
            });
            {
                let [r, g, b, a] = draw.clear_color;
                let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("prism quad pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: r as f64,
                                g: g as f64,
                                b: b as f64,
                                a: a as f64,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });

                rpass.set_pipeline(pipeline);
                if let Some(bind_group) = bind_group.as_ref() {
                    rpass.set_bind_group(0, bind_group, &[]);
                }
                rpass.set_vertex_buffer(0, vbo.slice(..));
                rpass.draw(0..4, 0..1);
            }

            queue.submit(std::iter::once(encoder.finish()));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{PASSTHROUGH_FRAGMENT, PASSTHROUGH_VERTEX};

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    /// `None` on machines without any adapter; those tests then have nothing to check.
    fn device() -> Option<WgpuDevice> {
        match WgpuDevice::new_blocking(GpuInit::default()) {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("no wgpu adapter, skipping: {e:#}");
                None
            }
        }
    }

    /// 64x2 input, first row red and second row blue, plus a target of the same size.
    fn two_rows(dev: &mut WgpuDevice) -> (TextureHandle, TextureHandle, FramebufferHandle) {
        let input = dev
            .create_texture(64, 2, PixelFormat::Rgba8, &TextureOptions::texture_only())
            .unwrap();
        let mut pixels = RED.repeat(64);
        pixels.extend(BLUE.repeat(64));
        dev.upload(input, 64, 2, PixelFormat::Rgba8, &pixels).unwrap();

        let output = dev
            .create_texture(64, 2, PixelFormat::Rgba8, &TextureOptions::default())
            .unwrap();
        let target = dev.create_framebuffer(output).unwrap();
        (input, output, target)
    }

    fn rows(pixels: &[u8]) -> ([u8; 4], [u8; 4]) {
        let first: [u8; 4] = pixels[..4].try_into().unwrap();
        let second: [u8; 4] = pixels[64 * 4..64 * 4 + 4].try_into().unwrap();
        (first, second)
    }

    #[test]
    fn unrotated_pass_keeps_rows_in_place() {
        let Some(mut dev) = device() else { return };
        let (input, output, target) = two_rows(&mut dev);
        let program = dev.compile(PASSTHROUGH_VERTEX, PASSTHROUGH_FRAGMENT).unwrap();
        dev.bind_program(program);

        for (rotation, expected) in [
            (RotationMode::None, (RED, BLUE)),
            (RotationMode::FlipVertical, (BLUE, RED)),
        ] {
            let coords = [rotation.texture_coordinates()];
            dev.draw_quad(&QuadDraw {
                program,
                target,
                inputs: &[input],
                positions: crate::coords::QUAD_POSITIONS,
                texture_coordinates: &coords,
                clear_color: [0.0; 4],
            })
            .unwrap();
            assert_eq!(rows(&dev.read_pixels(output).unwrap()), expected, "{rotation:?}");
        }
    }

    #[test]
    fn unbound_extra_input_is_reported_not_raised() {
        let Some(mut dev) = device() else { return };
        let (input, _, target) = two_rows(&mut dev);
        let program = dev.compile(PASSTHROUGH_VERTEX, PASSTHROUGH_FRAGMENT).unwrap();

        let coords = [RotationMode::None.texture_coordinates(); 2];
        let err = dev
            .draw_quad(&QuadDraw {
                program,
                target,
                inputs: &[input, input],
                positions: crate::coords::QUAD_POSITIONS,
                texture_coordinates: &coords,
                clear_color: [0.0; 4],
            })
            .unwrap_err();
        assert!(matches!(err, DeviceError::Backend(_)), "{err:?}");
    }

    #[test]
    fn invalid_wgsl_is_a_shader_error() {
        let Some(mut dev) = device() else { return };
        assert!(matches!(
            dev.compile(PASSTHROUGH_VERTEX, "@fragment fn fs_main( {"),
            Err(ShaderError::Compile(_))
        ));
    }
}
