use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::inputs::{release_logged, InputSlots};
use super::{
    NodeError, NodeState, ProcessingNode, Targets, PASSTHROUGH_FRAGMENT, PASSTHROUGH_VERTEX,
};
use crate::cache::Framebuffer;
use crate::context::{Program, RenderContext};
use crate::coords::{RotationMode, Size, QUAD_POSITIONS};
use crate::device::{PixelFormat, QuadDraw, TextureHandle, TextureOptions};
use crate::time::FrameTime;

/// Filter configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Number of input slots. Input `i` binds as texture `2 * i`, sampler `2 * i + 1`.
    pub inputs: usize,
    pub vertex_shader: String,
    pub fragment_shader: String,

    /// Render at this size regardless of the input size.
    pub forced_size: Option<Size>,

    pub output_format: PixelFormat,
    pub output_options: TextureOptions,
    pub clear_color: [f32; 4],

    /// Accept single-channel frames from sources that can provide them.
    pub wants_monochrome_input: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            inputs: 1,
            vertex_shader: PASSTHROUGH_VERTEX.to_string(),
            fragment_shader: PASSTHROUGH_FRAGMENT.to_string(),
            forced_size: None,
            output_format: PixelFormat::Rgba8,
            output_options: TextureOptions::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            wants_monochrome_input: false,
        }
    }
}

impl FilterConfig {
    pub fn with_fragment(fragment_shader: &str) -> Self {
        Self {
            fragment_shader: fragment_shader.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct FilterState {
    inputs: InputSlots,
    forced_size: Option<Size>,
    processing: bool,
    ended: bool,
}

/// Frames and geometry a pass owns while it runs.
struct Pass {
    frames: Vec<Arc<Framebuffer>>,
    input_size: Size,
    /// Per input, in slot order. Input 0 also decides the output size.
    rotations: Vec<RotationMode>,
    forced_size: Option<Size>,
}

impl Pass {
    fn rotation(&self) -> RotationMode {
        self.rotations.first().copied().unwrap_or_default()
    }
}

/// N-input program pass producing one output frame.
///
/// Each input's rotation is applied through its own texture coordinates, so the
/// output is upright (`RotationMode::None`). The output is sized by
/// [`ProcessingNode::maximum_output_size`], which follows input 0.
pub struct Filter {
    context: RenderContext,
    program: Program,
    output_format: PixelFormat,
    output_options: TextureOptions,
    clear_color: [f32; 4],
    wants_monochrome: bool,

    this: Weak<Filter>,
    targets: Targets,
    state: Mutex<FilterState>,
    enabled: AtomicBool,
    receiving_monochrome: AtomicBool,
}

impl Filter {
    /// Builds the filter and compiles its program. Shader errors surface here, never
    /// per frame.
    pub fn new(context: &RenderContext, config: FilterConfig) -> Result<Arc<Self>, NodeError> {
        let units = context.max_texture_units() as usize;
        if config.inputs == 0 || config.inputs > units {
            return Err(NodeError::InvalidConfiguration(format!(
                "{} inputs requested, the device has {units} texture units",
                config.inputs
            )));
        }

        if config.inputs != 1 && config.fragment_shader == PASSTHROUGH_FRAGMENT {
            return Err(NodeError::InvalidConfiguration(format!(
                "the passthrough fragment samples one input, {} requested",
                config.inputs
            )));
        }

        let program = context.compile_program(&config.vertex_shader, &config.fragment_shader)?;
        let output_options = TextureOptions {
            render_target: true,
            ..config.output_options
        };

        Ok(Arc::new_cyclic(|this| Self {
            context: context.clone(),
            program,
            output_format: config.output_format,
            output_options,
            clear_color: config.clear_color,
            wants_monochrome: config.wants_monochrome_input,
            this: this.clone(),
            targets: Targets::new(),
            state: Mutex::new(FilterState {
                inputs: InputSlots::new(config.inputs),
                forced_size: config.forced_size,
                processing: false,
                ended: false,
            }),
            enabled: AtomicBool::new(true),
            receiving_monochrome: AtomicBool::new(false),
        }))
    }

    /// Single-input passthrough filter.
    pub fn passthrough(context: &RenderContext) -> Result<Arc<Self>, NodeError> {
        Self::new(context, FilterConfig::default())
    }

    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    pub fn program(&self) -> Program {
        self.program
    }

    pub fn input_count(&self) -> usize {
        self.lock_state().inputs.len()
    }

    /// Overrides the output size; `None` goes back to deriving it from input 0.
    pub fn force_processing_size(&self, size: Option<Size>) {
        self.lock_state().forced_size = size.filter(|s| !s.is_unconstrained());
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_receiving_monochrome_input(&self) -> bool {
        self.receiving_monochrome.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> MutexGuard<'_, FilterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn output_size(&self, input_size: Size, rotation: RotationMode, forced: Option<Size>) -> Size {
        match forced {
            Some(size) => size,
            None if input_size.is_unconstrained() => Size::UNCONSTRAINED,
            None => self.context.size_that_fits(rotation.apply(input_size)),
        }
    }

    /// Runs on the render queue.
    fn render(&self, pass: Pass, time: FrameTime) {
        let cache = self.context.framebuffer_cache();

        let output = if self.lock_state().ended {
            None
        } else {
            match self.draw(&pass) {
                Ok(output) => Some(output),
                Err(e) => {
                    log::warn!("filter dropped frame {}: {e}", time.frame_index);
                    None
                }
            }
        };

        let ended = {
            let mut state = self.lock_state();
            state.processing = false;
            state.ended
        };

        if let Some(output) = output {
            if !ended {
                self.targets
                    .deliver(&output, output.size(), RotationMode::None, time);
            }
            release_logged(cache, &output);
        }

        for frame in &pass.frames {
            release_logged(cache, frame);
        }
    }

    fn draw(&self, pass: &Pass) -> Result<Arc<Framebuffer>, NodeError> {
        let size = self.output_size(pass.input_size, pass.rotation(), pass.forced_size);
        let (width, height) = size.to_pixels();
        let cache = self.context.framebuffer_cache();
        let output = cache.acquire(width, height, self.output_format, self.output_options)?;

        let drawn = self.draw_into(&output, pass);
        if drawn.is_err() {
            release_logged(cache, &output);
        }
        drawn.map(|()| output)
    }

    fn draw_into(&self, output: &Framebuffer, pass: &Pass) -> Result<(), NodeError> {
        let Some(target) = output.framebuffer() else {
            return Err(NodeError::InvalidConfiguration(
                "filter output has no render target".to_string(),
            ));
        };

        self.context.set_active_program(self.program)?;

        let inputs: Vec<TextureHandle> = pass.frames.iter().map(|f| f.texture()).collect();
        let coordinates: Vec<[f32; 8]> = pass
            .rotations
            .iter()
            .map(|r| r.texture_coordinates())
            .collect();
        let draw = QuadDraw {
            program: self.program.handle(),
            target,
            inputs: &inputs,
            positions: QUAD_POSITIONS,
            texture_coordinates: &coordinates,
            clear_color: self.clear_color,
        };
        self.context.with_device(|device| device.draw_quad(&draw))?;
        Ok(())
    }
}

impl ProcessingNode for Filter {
    fn set_input_frame(&self, frame: &Arc<Framebuffer>, index: usize) -> Result<(), NodeError> {
        let mut state = self.lock_state();
        if state.ended {
            return Err(NodeError::Ended);
        }
        state
            .inputs
            .store(self.context.framebuffer_cache(), frame, index)
    }

    fn set_input_size(&self, size: Size, index: usize) -> Result<(), NodeError> {
        let mut state = self.lock_state();
        if state.ended {
            return Err(NodeError::Ended);
        }
        state.inputs.slot_mut(index)?.size = size;
        Ok(())
    }

    fn set_input_rotation(&self, rotation: RotationMode, index: usize) -> Result<(), NodeError> {
        let mut state = self.lock_state();
        if state.ended {
            return Err(NodeError::Ended);
        }
        state.inputs.slot_mut(index)?.rotation = rotation;
        Ok(())
    }

    fn notify_frame_ready(&self, time: FrameTime, index: usize) -> Result<(), NodeError> {
        let pass = {
            let mut state = self.lock_state();
            if state.ended {
                return Err(NodeError::Ended);
            }
            state.inputs.slot_mut(index)?.ready = true;
            if !state.inputs.all_ready() {
                return Ok(());
            }

            let input_size = state
                .inputs
                .get(0)
                .map_or(Size::UNCONSTRAINED, |first| first.effective_size());
            state.processing = true;
            Pass {
                rotations: state.inputs.rotations(),
                frames: state.inputs.take_frames(),
                input_size,
                forced_size: state.forced_size,
            }
        };

        log::trace!("filter pass for frame {}", time.frame_index);

        if self.context.is_current() {
            self.render(pass, time);
            return Ok(());
        }

        let Some(this) = self.this.upgrade() else {
            return Ok(());
        };
        self.context.run_sync(move || this.render(pass, time))?;
        Ok(())
    }

    fn next_available_input_index(&self) -> Result<usize, NodeError> {
        self.lock_state().inputs.next_free()
    }

    fn attach_input(&self, index: usize) -> Result<(), NodeError> {
        self.lock_state().inputs.slot_mut(index)?.attached = true;
        Ok(())
    }

    fn detach_input(&self, index: usize) {
        if let Ok(slot) = self.lock_state().inputs.slot_mut(index) {
            slot.attached = false;
        }
    }

    fn maximum_output_size(&self) -> Size {
        let state = self.lock_state();
        let (size, rotation) = match state.inputs.get(0) {
            Some(first) => (first.effective_size(), first.rotation),
            None => (Size::UNCONSTRAINED, RotationMode::None),
        };
        self.output_size(size, rotation, state.forced_size)
    }

    fn end_processing(&self) {
        let held = {
            let mut state = self.lock_state();
            if state.ended {
                return;
            }
            state.ended = true;
            state.inputs.take_frames()
        };

        log::debug!("filter ended, releasing {} held inputs", held.len());
        let cache = self.context.framebuffer_cache();
        for frame in &held {
            release_logged(cache, frame);
        }
        self.targets.end_processing();
    }

    fn state(&self) -> NodeState {
        let state = self.lock_state();
        if state.ended {
            NodeState::Ended
        } else if state.processing {
            NodeState::Processing
        } else if state.inputs.holds_frames() {
            NodeState::Receiving
        } else {
            NodeState::Idle
        }
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn wants_monochrome_input(&self) -> bool {
        self.wants_monochrome
    }

    fn set_receiving_monochrome_input(&self, receiving: bool) {
        self.receiving_monochrome.store(receiving, Ordering::Release);
    }
}
