use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::inputs::{release_logged, InputSlots};
use super::{NodeError, NodeState, ProcessingNode};
use crate::cache::{CacheError, Framebuffer};
use crate::context::RenderContext;
use crate::coords::{RotationMode, Size};
use crate::time::FrameTime;

/// A frame handed to the consumer of a [`FrameSink`].
///
/// Carries one reference on `frame`; give it back with [`FrameSink::release_frame`].
#[derive(Debug)]
pub struct SinkFrame {
    pub frame: Arc<Framebuffer>,
    pub size: Size,
    pub rotation: RotationMode,
    pub time: FrameTime,
}

type FrameCallback = Box<dyn Fn(&SinkFrame) + Send + Sync>;

struct SinkState {
    input: InputSlots,
    latest: Option<SinkFrame>,
    received: u64,
    dropped: u64,
    ended: bool,
}

/// Terminal node: the hand-off point to a presenter or encoder.
///
/// Keeps the most recent frame until the consumer takes it. A frame that arrives
/// before the previous one was taken replaces it and the old one is released.
pub struct FrameSink {
    context: RenderContext,
    state: Mutex<SinkState>,
    on_frame: Option<FrameCallback>,
    wants_monochrome: AtomicBool,
    enabled: AtomicBool,
}

impl FrameSink {
    pub fn new(context: &RenderContext) -> Arc<Self> {
        Self::build(context, None)
    }

    /// Calls `on_frame` on the delivering thread (usually the render queue) for every
    /// frame that arrives, before it becomes available to [`FrameSink::take_frame`].
    pub fn with_callback(
        context: &RenderContext,
        on_frame: impl Fn(&SinkFrame) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::build(context, Some(Box::new(on_frame)))
    }

    fn build(context: &RenderContext, on_frame: Option<FrameCallback>) -> Arc<Self> {
        Arc::new(Self {
            context: context.clone(),
            state: Mutex::new(SinkState {
                input: InputSlots::new(1),
                latest: None,
                received: 0,
                dropped: 0,
                ended: false,
            }),
            on_frame,
            wants_monochrome: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the latest frame. The caller now owns its reference.
    pub fn take_frame(&self) -> Option<SinkFrame> {
        self.lock_state().latest.take()
    }

    /// Returns a taken frame's reference to the cache.
    pub fn release_frame(&self, frame: SinkFrame) -> Result<(), CacheError> {
        self.context.framebuffer_cache().release(&frame.frame)
    }

    pub fn has_frame(&self) -> bool {
        self.lock_state().latest.is_some()
    }

    /// Frames delivered so far.
    pub fn frames_received(&self) -> u64 {
        self.lock_state().received
    }

    /// Frames replaced before anyone took them.
    pub fn frames_dropped(&self) -> u64 {
        self.lock_state().dropped
    }

    pub fn set_wants_monochrome_input(&self, wants: bool) {
        self.wants_monochrome.store(wants, Ordering::Release);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

impl ProcessingNode for FrameSink {
    fn set_input_frame(&self, frame: &Arc<Framebuffer>, index: usize) -> Result<(), NodeError> {
        let mut state = self.lock_state();
        if state.ended {
            return Err(NodeError::Ended);
        }
        state
            .input
            .store(self.context.framebuffer_cache(), frame, index)
    }

    fn set_input_size(&self, size: Size, index: usize) -> Result<(), NodeError> {
        let mut state = self.lock_state();
        if state.ended {
            return Err(NodeError::Ended);
        }
        state.input.slot_mut(index)?.size = size;
        Ok(())
    }

    fn set_input_rotation(&self, rotation: RotationMode, index: usize) -> Result<(), NodeError> {
        let mut state = self.lock_state();
        if state.ended {
            return Err(NodeError::Ended);
        }
        state.input.slot_mut(index)?.rotation = rotation;
        Ok(())
    }

    fn notify_frame_ready(&self, time: FrameTime, index: usize) -> Result<(), NodeError> {
        let arrived = {
            let mut state = self.lock_state();
            if state.ended {
                return Err(NodeError::Ended);
            }
            let slot = state.input.slot_mut(index)?;
            let size = slot.effective_size();
            let rotation = slot.rotation;
            let Some(frame) = slot.frame.take() else {
                return Ok(());
            };
            slot.ready = false;
            state.received += 1;
            SinkFrame {
                frame,
                size,
                rotation,
                time,
            }
        };

        if let Some(on_frame) = &self.on_frame {
            on_frame(&arrived);
        }

        let replaced = {
            let mut state = self.lock_state();
            if state.ended {
                Some(arrived)
            } else {
                let replaced = state.latest.replace(arrived);
                if replaced.is_some() {
                    state.dropped += 1;
                }
                replaced
            }
        };
        if let Some(old) = replaced {
            log::trace!("sink dropping frame {}", old.time.frame_index);
            release_logged(self.context.framebuffer_cache(), &old.frame);
        }
        Ok(())
    }

    fn next_available_input_index(&self) -> Result<usize, NodeError> {
        self.lock_state().input.next_free()
    }

    fn attach_input(&self, index: usize) -> Result<(), NodeError> {
        self.lock_state().input.slot_mut(index)?.attached = true;
        Ok(())
    }

    fn detach_input(&self, index: usize) {
        if let Ok(slot) = self.lock_state().input.slot_mut(index) {
            slot.attached = false;
        }
    }

    fn maximum_output_size(&self) -> Size {
        self.lock_state()
            .input
            .get(0)
            .map_or(Size::UNCONSTRAINED, |slot| slot.effective_size())
    }

    fn end_processing(&self) {
        let (mut held, latest) = {
            let mut state = self.lock_state();
            if state.ended {
                return;
            }
            state.ended = true;
            (state.input.take_frames(), state.latest.take())
        };
        held.extend(latest.map(|l| l.frame));

        log::debug!("frame sink ended, releasing {} frames", held.len());
        let cache = self.context.framebuffer_cache();
        for frame in &held {
            release_logged(cache, frame);
        }
    }

    fn state(&self) -> NodeState {
        let state = self.lock_state();
        if state.ended {
            NodeState::Ended
        } else if state.input.holds_frames() {
            NodeState::Receiving
        } else {
            NodeState::Idle
        }
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn wants_monochrome_input(&self) -> bool {
        self.wants_monochrome.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::context::ContextConfig;
    use crate::device::{HeadlessDevice, PixelFormat, TextureOptions};
    use crate::node::Targets;

    fn context() -> RenderContext {
        RenderContext::new(Box::new(HeadlessDevice::new()), ContextConfig::default()).unwrap()
    }

    fn produce(ctx: &RenderContext, targets: &Targets, frame_index: u64) -> Arc<Framebuffer> {
        let cache = ctx.framebuffer_cache();
        let fb = cache
            .acquire(8, 8, PixelFormat::Rgba8, TextureOptions::default())
            .unwrap();
        let time = FrameTime::new(Default::default(), frame_index);
        targets.deliver(&fb, fb.size(), RotationMode::FlipVertical, time);
        cache.release(&fb).unwrap();
        fb
    }

    #[test]
    fn keeps_latest_until_taken() {
        let ctx = context();
        let sink = FrameSink::new(&ctx);
        let targets = Targets::new();
        targets.add_target(sink.clone()).unwrap();

        let fb = produce(&ctx, &targets, 0);
        assert_eq!(fb.retain_count(), 1);
        assert!(sink.has_frame());

        let taken = sink.take_frame().unwrap();
        assert_eq!(taken.rotation, RotationMode::FlipVertical);
        assert_eq!(taken.size, Size::new(8.0, 8.0));
        assert!(sink.take_frame().is_none());

        sink.release_frame(taken).unwrap();
        assert_eq!(fb.retain_count(), 0);
    }

    #[test]
    fn newer_frame_replaces_untaken_one() {
        let ctx = context();
        let sink = FrameSink::new(&ctx);
        let targets = Targets::new();
        targets.add_target(sink.clone()).unwrap();

        let first = produce(&ctx, &targets, 0);
        let second = produce(&ctx, &targets, 1);
        assert_ne!(first.id(), second.id());
        assert_eq!(first.retain_count(), 0);
        assert_eq!((sink.frames_received(), sink.frames_dropped()), (2, 1));

        let taken = sink.take_frame().unwrap();
        assert_eq!(taken.time.frame_index, 1);
        sink.release_frame(taken).unwrap();
    }

    #[test]
    fn callback_sees_every_frame() {
        let ctx = context();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let sink = FrameSink::with_callback(&ctx, move |f| {
            assert_eq!(f.frame.retain_count(), 2);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let targets = Targets::new();
        targets.add_target(sink.clone()).unwrap();

        produce(&ctx, &targets, 0);
        produce(&ctx, &targets, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn end_processing_releases_held_frame_once() {
        let ctx = context();
        let sink = FrameSink::new(&ctx);
        let targets = Targets::new();
        targets.add_target(sink.clone()).unwrap();

        let fb = produce(&ctx, &targets, 0);
        sink.end_processing();
        sink.end_processing();
        assert_eq!(fb.retain_count(), 0);
        assert_eq!(sink.state(), NodeState::Ended);
        assert!(sink.take_frame().is_none());
        assert_eq!(ctx.framebuffer_cache().checked_out_count(), 0);
    }
}
