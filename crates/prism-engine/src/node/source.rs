use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::inputs::release_logged;
use super::{NodeError, NodeState, ProcessingNode, Targets};
use crate::cache::Framebuffer;
use crate::context::RenderContext;
use crate::coords::{RotationMode, Size};
use crate::device::{DeviceError, PixelFormat, TextureOptions};
use crate::time::{FrameClock, FrameTime};

/// Raw data source configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,

    /// Layout of [`RawFrame::pixels`].
    pub format: PixelFormat,

    /// How consumers should sample the frames, e.g. a sensor mounted sideways.
    pub rotation: RotationMode,
    pub options: TextureOptions,

    /// Upload on the render queue without blocking the caller.
    pub asynchronous: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Rgba8,
            rotation: RotationMode::None,
            options: TextureOptions::texture_only(),
            asynchronous: true,
        }
    }
}

impl SourceConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

/// One frame of raw pixel data.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// Tightly packed rows in the source's configured format.
    pub pixels: Vec<u8>,

    /// Optional one-byte-per-pixel luminance plane of the same frame.
    pub luminance: Option<Vec<u8>>,

    /// Presentation time; stamped by the source's clock when absent.
    pub time: Option<FrameTime>,
}

impl RawFrame {
    pub fn new(pixels: Vec<u8>) -> Self {
        Self {
            pixels,
            ..Self::default()
        }
    }

    pub fn with_luminance(mut self, luminance: Vec<u8>) -> Self {
        self.luminance = Some(luminance);
        self
    }

    pub fn at(mut self, time: FrameTime) -> Self {
        self.time = Some(time);
        self
    }
}

/// Source node wrapping uploads of CPU pixel data (camera frames, decoded video).
///
/// Each pushed frame is uploaded into a pooled texture and delivered to the targets
/// with the configured rotation. When every active target wants monochrome input,
/// the device supports red-channel textures and the frame carries a luminance plane,
/// that plane is uploaded as a single-channel texture instead.
pub struct RawDataSource {
    context: RenderContext,
    config: Mutex<SourceConfig>,
    clock: Mutex<FrameClock>,
    targets: Targets,
    this: Weak<RawDataSource>,
    in_flight: AtomicUsize,
    ended: AtomicBool,
}

impl RawDataSource {
    pub fn new(context: &RenderContext, config: SourceConfig) -> Result<Arc<Self>, NodeError> {
        validate(&config)?;
        Ok(Arc::new_cyclic(|this| Self {
            context: context.clone(),
            config: Mutex::new(config),
            clock: Mutex::new(FrameClock::new()),
            targets: Targets::new(),
            this: this.clone(),
            in_flight: AtomicUsize::new(0),
            ended: AtomicBool::new(false),
        }))
    }

    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    pub fn config(&self) -> SourceConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Changes the geometry of subsequent frames.
    pub fn reconfigure(&self, width: u32, height: u32, rotation: RotationMode) -> Result<(), NodeError> {
        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        let updated = SourceConfig {
            width,
            height,
            rotation,
            ..config.clone()
        };
        validate(&updated)?;
        *config = updated;
        Ok(())
    }

    /// Restarts generated timestamps at zero.
    pub fn reset_clock(&self) {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    /// Uploads `frame` and delivers it.
    ///
    /// Asynchronous sources return once the frame is queued; failures on the queue
    /// drop the frame with a warning. Synchronous sources return the outcome.
    pub fn push(&self, frame: RawFrame) -> Result<(), NodeError> {
        if self.ended.load(Ordering::Acquire) {
            return Err(NodeError::Ended);
        }

        let config = self.config();
        check_len(&frame.pixels, config.width, config.height, config.format)?;
        if let Some(luminance) = &frame.luminance {
            check_len(luminance, config.width, config.height, PixelFormat::Luminance8)?;
        }

        if self.context.is_current() {
            return self.process(frame, config);
        }
        let Some(this) = self.this.upgrade() else {
            return Ok(());
        };

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if config.asynchronous {
            let queued = self.context.run_async(move || {
                if let Err(e) = this.process(frame, config) {
                    log::warn!("raw data source dropped a frame: {e}");
                }
                this.in_flight.fetch_sub(1, Ordering::AcqRel);
            });
            if queued.is_err() {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            queued.map_err(NodeError::from)
        } else {
            let outcome = self.context.run_sync(move || {
                let outcome = this.process(frame, config);
                this.in_flight.fetch_sub(1, Ordering::AcqRel);
                outcome
            });
            match outcome {
                Ok(outcome) => outcome,
                Err(stopped) => {
                    self.in_flight.fetch_sub(1, Ordering::AcqRel);
                    Err(stopped.into())
                }
            }
        }
    }

    /// Runs on the render queue.
    fn process(&self, frame: RawFrame, config: SourceConfig) -> Result<(), NodeError> {
        if self.ended.load(Ordering::Acquire) {
            return Ok(());
        }

        let time = frame.time.unwrap_or_else(|| {
            self.clock
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .tick()
        });

        let monochrome = frame.luminance.is_some()
            && self.context.supports_red_channel_textures()
            && self.targets.all_want_monochrome();
        let (format, bytes) = match frame.luminance {
            Some(luminance) if monochrome => (PixelFormat::Luminance8, luminance),
            _ => (config.format, frame.pixels),
        };

        let (width, height) = (config.width, config.height);
        let cache = self.context.framebuffer_cache();
        let output = cache
            .acquire(width, height, format, config.options)
            .inspect_err(|e| log::warn!("dropping frame {}: {e}", time.frame_index))?;

        if let Err(e) = upload(&self.context, &output, format, &bytes) {
            log::warn!("dropping frame {}: upload failed: {e}", time.frame_index);
            release_logged(cache, &output);
            return Err(e.into());
        }

        log::trace!("uploaded frame {} ({width}x{height} {format:?})", time.frame_index);
        self.targets
            .deliver(&output, Size::from_pixels(width, height), config.rotation, time);
        release_logged(cache, &output);
        Ok(())
    }
}

fn validate(config: &SourceConfig) -> Result<(), NodeError> {
    if config.width == 0 || config.height == 0 {
        return Err(NodeError::InvalidConfiguration(format!(
            "source size {}x{} is empty",
            config.width, config.height
        )));
    }
    if config.format.is_single_channel() {
        return Err(NodeError::InvalidConfiguration(
            "single-channel data goes in RawFrame::luminance".to_string(),
        ));
    }
    Ok(())
}

fn check_len(bytes: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<(), NodeError> {
    let expected = crate::device::packed_len(width, height, format);
    if bytes.len() != expected {
        return Err(DeviceError::InvalidUpload {
            expected,
            got: bytes.len(),
        }
        .into());
    }
    Ok(())
}

fn upload(
    context: &RenderContext,
    output: &Framebuffer,
    format: PixelFormat,
    bytes: &[u8],
) -> Result<(), DeviceError> {
    let texture = output.texture();
    let (width, height) = (output.width(), output.height());
    context.with_device(|device| device.upload(texture, width, height, format, bytes))
}

impl ProcessingNode for RawDataSource {
    fn set_input_frame(&self, _frame: &Arc<Framebuffer>, index: usize) -> Result<(), NodeError> {
        Err(NodeError::InvalidIndex { index, inputs: 0 })
    }

    fn set_input_size(&self, _size: Size, index: usize) -> Result<(), NodeError> {
        Err(NodeError::InvalidIndex { index, inputs: 0 })
    }

    fn set_input_rotation(&self, _rotation: RotationMode, index: usize) -> Result<(), NodeError> {
        Err(NodeError::InvalidIndex { index, inputs: 0 })
    }

    fn notify_frame_ready(&self, _time: FrameTime, index: usize) -> Result<(), NodeError> {
        Err(NodeError::InvalidIndex { index, inputs: 0 })
    }

    fn next_available_input_index(&self) -> Result<usize, NodeError> {
        Err(NodeError::NoFreeSlot)
    }

    fn attach_input(&self, index: usize) -> Result<(), NodeError> {
        Err(NodeError::InvalidIndex { index, inputs: 0 })
    }

    fn maximum_output_size(&self) -> Size {
        let config = self.config();
        Size::from_pixels(config.width, config.height)
    }

    fn end_processing(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("raw data source ended");
        self.targets.end_processing();
    }

    fn state(&self) -> NodeState {
        if self.ended.load(Ordering::Acquire) {
            NodeState::Ended
        } else if self.in_flight.load(Ordering::Acquire) > 0 {
            NodeState::Processing
        } else {
            NodeState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::ContextConfig;
    use crate::device::{DeviceStats, HeadlessDevice, EXT_RED_TEXTURES};
    use crate::node::FrameSink;

    fn context_with(device: HeadlessDevice) -> (RenderContext, Arc<DeviceStats>) {
        let stats = device.stats();
        let ctx = RenderContext::new(Box::new(device), ContextConfig::default()).unwrap();
        (ctx, stats)
    }

    fn sync_config(width: u32, height: u32) -> SourceConfig {
        SourceConfig {
            asynchronous: false,
            ..SourceConfig::new(width, height)
        }
    }

    fn rgba(width: u32, height: u32) -> RawFrame {
        RawFrame::new(vec![0x7f; (width * height * 4) as usize])
    }

    #[test]
    fn sync_push_uploads_and_delivers() {
        let (ctx, dev) = context_with(HeadlessDevice::new());
        let source = RawDataSource::new(
            &ctx,
            SourceConfig {
                rotation: RotationMode::RotateLeft,
                ..sync_config(4, 2)
            },
        )
        .unwrap();
        let sink = FrameSink::new(&ctx);
        source.targets().add_target(sink.clone()).unwrap();

        source.push(rgba(4, 2)).unwrap();
        assert_eq!(dev.uploads(), 1);

        let got = sink.take_frame().unwrap();
        assert_eq!(got.size, Size::new(4.0, 2.0));
        assert_eq!(got.rotation, RotationMode::RotateLeft);
        assert_eq!(got.frame.format(), PixelFormat::Rgba8);
        assert!(got.frame.framebuffer().is_none());
        assert_eq!(got.frame.retain_count(), 1);
        sink.release_frame(got).unwrap();
        assert_eq!(source.state(), NodeState::Idle);
    }

    #[test]
    fn async_push_completes_on_the_queue() {
        let (ctx, _) = context_with(HeadlessDevice::new());
        let source = RawDataSource::new(&ctx, SourceConfig::new(2, 2)).unwrap();
        let sink = FrameSink::new(&ctx);
        source.targets().add_target(sink.clone()).unwrap();

        source.push(rgba(2, 2)).unwrap();
        source.push(rgba(2, 2)).unwrap();
        ctx.run_sync(|| ()).unwrap();

        assert_eq!(sink.frames_received(), 2);
        let got = sink.take_frame().unwrap();
        assert_eq!(got.time.frame_index, 1);
        sink.release_frame(got).unwrap();
    }

    #[test]
    fn supplied_timestamps_win() {
        let (ctx, _) = context_with(HeadlessDevice::new());
        let source = RawDataSource::new(&ctx, sync_config(2, 2)).unwrap();
        let sink = FrameSink::new(&ctx);
        source.targets().add_target(sink.clone()).unwrap();

        let time = FrameTime::new(Duration::from_millis(40), 7);
        source.push(rgba(2, 2).at(time)).unwrap();
        assert_eq!(sink.take_frame().unwrap().time, time);
    }

    #[test]
    fn luminance_plane_used_when_everyone_wants_monochrome() {
        let (ctx, _) = context_with(HeadlessDevice::new());
        let source = RawDataSource::new(&ctx, sync_config(2, 2)).unwrap();
        let sink = FrameSink::new(&ctx);
        source.targets().add_target(sink.clone()).unwrap();

        source.push(rgba(2, 2).with_luminance(vec![1, 2, 3, 4])).unwrap();
        let color = sink.take_frame().unwrap();
        assert_eq!(color.frame.format(), PixelFormat::Rgba8);
        sink.release_frame(color).unwrap();

        sink.set_wants_monochrome_input(true);
        source.push(rgba(2, 2).with_luminance(vec![1, 2, 3, 4])).unwrap();
        let mono = sink.take_frame().unwrap();
        assert_eq!(mono.frame.format(), PixelFormat::Luminance8);
        sink.release_frame(mono).unwrap();
    }

    #[test]
    fn no_monochrome_without_red_textures() {
        let (ctx, _) = context_with(HeadlessDevice::builder().without_extension(EXT_RED_TEXTURES).build());
        let source = RawDataSource::new(&ctx, sync_config(2, 2)).unwrap();
        let sink = FrameSink::new(&ctx);
        sink.set_wants_monochrome_input(true);
        source.targets().add_target(sink.clone()).unwrap();

        source.push(rgba(2, 2).with_luminance(vec![0; 4])).unwrap();
        assert_eq!(sink.take_frame().unwrap().frame.format(), PixelFormat::Rgba8);
    }

    #[test]
    fn wrong_length_is_rejected_up_front() {
        let (ctx, dev) = context_with(HeadlessDevice::new());
        let source = RawDataSource::new(&ctx, sync_config(2, 2)).unwrap();
        assert_eq!(
            source.push(RawFrame::new(vec![0; 3])),
            Err(NodeError::Device(DeviceError::InvalidUpload { expected: 16, got: 3 }))
        );
        assert_eq!(dev.textures_created(), 0);
    }

    #[test]
    fn out_of_memory_drops_the_frame_and_recovers() {
        let (ctx, _) = context_with(HeadlessDevice::builder().texture_budget(1).build());
        let source = RawDataSource::new(&ctx, sync_config(2, 2)).unwrap();
        let sink = FrameSink::new(&ctx);
        source.targets().add_target(sink.clone()).unwrap();

        source.push(rgba(2, 2)).unwrap();
        assert!(matches!(source.push(rgba(2, 2)), Err(NodeError::Cache(_))));
        assert_eq!(sink.frames_received(), 1);

        let held = sink.take_frame().unwrap();
        sink.release_frame(held).unwrap();
        source.push(rgba(2, 2)).unwrap();
        assert_eq!(sink.frames_received(), 2);
    }

    #[test]
    fn end_processing_stops_the_source_and_cascades() {
        let (ctx, _) = context_with(HeadlessDevice::new());
        let source = RawDataSource::new(&ctx, sync_config(2, 2)).unwrap();
        let sink = FrameSink::new(&ctx);
        source.targets().add_target(sink.clone()).unwrap();

        source.end_processing();
        source.end_processing();
        assert_eq!(source.state(), NodeState::Ended);
        assert_eq!(sink.state(), NodeState::Ended);
        assert_eq!(source.push(rgba(2, 2)), Err(NodeError::Ended));
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let (ctx, _) = context_with(HeadlessDevice::new());
        assert!(matches!(
            RawDataSource::new(&ctx, SourceConfig::new(0, 4)).err(),
            Some(NodeError::InvalidConfiguration(_))
        ));
        let source = RawDataSource::new(&ctx, SourceConfig::new(4, 4)).unwrap();
        assert!(source.reconfigure(8, 0, RotationMode::None).is_err());
        source.reconfigure(8, 4, RotationMode::Rotate180).unwrap();
        assert_eq!(source.maximum_output_size(), Size::new(8.0, 4.0));
        assert_eq!(source.config().rotation, RotationMode::Rotate180);
    }
}
