use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{NodeError, ProcessingNode};
use crate::cache::Framebuffer;
use crate::coords::{RotationMode, Size};
use crate::time::FrameTime;

/// One registered consumer and the input slot it receives on.
#[derive(Clone)]
pub struct Target {
    pub node: Arc<dyn ProcessingNode>,
    pub index: usize,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("node", &Arc::as_ptr(&self.node).cast::<()>())
            .field("index", &self.index)
            .finish()
    }
}

/// Ordered registry of a producer's consumers.
///
/// Delivery follows registration order. The registry holds strong references; a
/// consumer lives at least as long as some producer targets it.
#[derive(Debug, Default)]
pub struct Targets {
    entries: Mutex<Vec<Target>>,
}

fn same_node(a: &Arc<dyn ProcessingNode>, b: &Arc<dyn ProcessingNode>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl Targets {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Target>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `node` on its next free input slot and returns that slot. A node that
    /// is already registered keeps its slot, which is returned.
    pub fn add_target(&self, node: Arc<dyn ProcessingNode>) -> Result<usize, NodeError> {
        let mut entries = self.entries();
        if let Some(existing) = entries.iter().find(|t| same_node(&t.node, &node)) {
            return Ok(existing.index);
        }
        let index = node.next_available_input_index()?;
        node.attach_input(index)?;
        entries.push(Target { node, index });
        Ok(index)
    }

    /// Registers `node` on slot `index`. Registering the same node twice is a no-op.
    pub fn add_target_at(&self, node: Arc<dyn ProcessingNode>, index: usize) -> Result<(), NodeError> {
        let mut entries = self.entries();
        if entries.iter().any(|t| same_node(&t.node, &node)) {
            return Ok(());
        }
        node.attach_input(index)?;
        entries.push(Target { node, index });
        Ok(())
    }

    /// Unregisters `node`. Returns whether it was registered.
    pub fn remove_target(&self, node: &Arc<dyn ProcessingNode>) -> bool {
        let removed = {
            let mut entries = self.entries();
            match entries.iter().position(|t| same_node(&t.node, node)) {
                Some(pos) => entries.remove(pos),
                None => return false,
            }
        };
        removed.node.detach_input(removed.index);
        true
    }

    pub fn remove_all_targets(&self) {
        let removed = std::mem::take(&mut *self.entries());
        for t in removed {
            t.node.detach_input(t.index);
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Registered targets in order.
    pub fn snapshot(&self) -> Vec<Target> {
        self.entries().clone()
    }

    /// Targets that currently accept frames.
    pub fn active(&self) -> Vec<Target> {
        self.entries()
            .iter()
            .filter(|t| t.node.enabled() && !t.node.should_ignore_updates())
            .cloned()
            .collect()
    }

    /// True when there is at least one active target and all of them want monochrome input.
    pub fn all_want_monochrome(&self) -> bool {
        let active = self.active();
        !active.is_empty() && active.iter().all(|t| t.node.wants_monochrome_input())
    }

    /// Pushes `frame` to every active target.
    ///
    /// Two phases: first every target gets size, rotation and the frame, then every
    /// target that accepted the frame is told it is ready. Returns how many were notified.
    pub fn deliver(
        &self,
        frame: &Arc<Framebuffer>,
        size: Size,
        rotation: RotationMode,
        time: FrameTime,
    ) -> usize {
        let monochrome = frame.format().is_single_channel();
        let mut accepted = Vec::new();

        for t in self.active() {
            t.node.set_receiving_monochrome_input(monochrome);
            let offered = t
                .node
                .set_input_size(size, t.index)
                .and_then(|()| t.node.set_input_rotation(rotation, t.index))
                .and_then(|()| t.node.set_input_frame(frame, t.index));
            match offered {
                Ok(()) => accepted.push(t),
                Err(e) => log::warn!("target on input {} rejected frame {}: {e}", t.index, time.frame_index),
            }
        }

        let mut notified = 0;
        for t in accepted {
            match t.node.notify_frame_ready(time, t.index) {
                Ok(()) => notified += 1,
                Err(e) => log::warn!("target on input {} failed frame {}: {e}", t.index, time.frame_index),
            }
        }
        log::trace!("frame {} delivered to {notified} targets", time.frame_index);
        notified
    }

    /// Ends every registered target.
    pub fn end_processing(&self) {
        for t in self.snapshot() {
            t.node.end_processing();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::context::{ContextConfig, RenderContext};
    use crate::device::{HeadlessDevice, PixelFormat, TextureOptions};
    use crate::node::NodeState;

    /// Consumer that records every protocol call into a shared log.
    pub(crate) struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        inputs: usize,
        attached: Mutex<Vec<usize>>,
        pub enabled: AtomicBool,
        pub monochrome: AtomicBool,
        pub ended: AtomicUsize,
    }

    impl Recorder {
        pub(crate) fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>, inputs: usize) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                inputs,
                attached: Mutex::new(Vec::new()),
                enabled: AtomicBool::new(true),
                monochrome: AtomicBool::new(false),
                ended: AtomicUsize::new(0),
            })
        }

        fn record(&self, what: String) {
            self.log.lock().unwrap().push(format!("{}:{what}", self.name));
        }
    }

    impl ProcessingNode for Recorder {
        fn set_input_frame(&self, frame: &Arc<Framebuffer>, index: usize) -> Result<(), NodeError> {
            self.record(format!("frame{}@{index}", frame.width()));
            Ok(())
        }

        fn set_input_size(&self, size: Size, index: usize) -> Result<(), NodeError> {
            self.record(format!("size{}x{}@{index}", size.width, size.height));
            Ok(())
        }

        fn set_input_rotation(&self, rotation: RotationMode, index: usize) -> Result<(), NodeError> {
            self.record(format!("{rotation:?}@{index}"));
            Ok(())
        }

        fn notify_frame_ready(&self, time: FrameTime, index: usize) -> Result<(), NodeError> {
            self.record(format!("ready{}@{index}", time.frame_index));
            Ok(())
        }

        fn next_available_input_index(&self) -> Result<usize, NodeError> {
            let attached = self.attached.lock().unwrap();
            (0..self.inputs)
                .find(|i| !attached.contains(i))
                .ok_or(NodeError::NoFreeSlot)
        }

        fn attach_input(&self, index: usize) -> Result<(), NodeError> {
            self.attached.lock().unwrap().push(index);
            Ok(())
        }

        fn detach_input(&self, index: usize) {
            self.attached.lock().unwrap().retain(|&i| i != index);
        }

        fn end_processing(&self) {
            self.ended.fetch_add(1, Ordering::SeqCst);
        }

        fn state(&self) -> NodeState {
            NodeState::Idle
        }

        fn enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        fn wants_monochrome_input(&self) -> bool {
            self.monochrome.load(Ordering::SeqCst)
        }
    }

    fn frame(ctx: &RenderContext) -> Arc<Framebuffer> {
        ctx.framebuffer_cache()
            .acquire(16, 8, PixelFormat::Rgba8, TextureOptions::default())
            .unwrap()
    }

    fn context() -> RenderContext {
        RenderContext::new(Box::new(HeadlessDevice::new()), ContextConfig::default()).unwrap()
    }

    #[test]
    fn fan_out_is_two_phase_in_registration_order() {
        let ctx = context();
        let fb = frame(&ctx);

        let mut runs = Vec::new();
        for _ in 0..3 {
            let log = Arc::new(Mutex::new(Vec::new()));
            let targets = Targets::new();
            for name in ["A", "B", "C"] {
                targets.add_target(Recorder::new(name, &log, 1)).unwrap();
            }
            let n = targets.deliver(&fb, fb.size(), RotationMode::RotateLeft, FrameTime::default());
            assert_eq!(n, 3);
            runs.push(log.lock().unwrap().clone());
        }

        let expected: Vec<String> = [
            "A:size16x8@0",
            "A:RotateLeft@0",
            "A:frame16@0",
            "B:size16x8@0",
            "B:RotateLeft@0",
            "B:frame16@0",
            "C:size16x8@0",
            "C:RotateLeft@0",
            "C:frame16@0",
            "A:ready0@0",
            "B:ready0@0",
            "C:ready0@0",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        for run in runs {
            assert_eq!(run, expected);
        }
    }

    #[test]
    fn add_target_claims_successive_slots() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let two = Recorder::new("T", &log, 2);
        let a = Targets::new();
        let b = Targets::new();
        let c = Targets::new();

        assert_eq!(a.add_target(two.clone()).unwrap(), 0);
        assert_eq!(b.add_target(two.clone()).unwrap(), 1);
        assert_eq!(c.add_target(two.clone()), Err(NodeError::NoFreeSlot));

        let node: Arc<dyn ProcessingNode> = two.clone();
        assert!(a.remove_target(&node));
        assert!(!a.remove_target(&node));
        assert_eq!(c.add_target(two).unwrap(), 0);
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let t = Recorder::new("T", &log, 4);
        let targets = Targets::new();
        targets.add_target(t.clone()).unwrap();
        targets.add_target_at(t, 3).unwrap();
        assert_eq!(targets.len(), 1);
        targets.remove_all_targets();
        assert!(targets.is_empty());
    }

    #[test]
    fn re_adding_a_full_consumer_returns_its_slot() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let single = Recorder::new("S", &log, 1);
        let targets = Targets::new();
        assert_eq!(targets.add_target(single.clone()).unwrap(), 0);
        assert_eq!(single.next_available_input_index(), Err(NodeError::NoFreeSlot));

        assert_eq!(targets.add_target(single).unwrap(), 0);
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn disabled_targets_are_skipped() {
        let ctx = context();
        let fb = frame(&ctx);
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Recorder::new("A", &log, 1);
        let b = Recorder::new("B", &log, 1);
        let targets = Targets::new();
        targets.add_target(a.clone()).unwrap();
        targets.add_target(b.clone()).unwrap();

        b.enabled.store(false, Ordering::SeqCst);
        assert_eq!(targets.deliver(&fb, fb.size(), RotationMode::None, FrameTime::default()), 1);
        assert!(log.lock().unwrap().iter().all(|e| e.starts_with("A:")));
    }

    #[test]
    fn monochrome_needs_every_active_target() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Recorder::new("A", &log, 1);
        let b = Recorder::new("B", &log, 1);
        let targets = Targets::new();
        assert!(!targets.all_want_monochrome());

        targets.add_target(a.clone()).unwrap();
        targets.add_target(b.clone()).unwrap();
        a.monochrome.store(true, Ordering::SeqCst);
        assert!(!targets.all_want_monochrome());

        b.enabled.store(false, Ordering::SeqCst);
        assert!(targets.all_want_monochrome());
    }

    #[test]
    fn end_processing_cascades_to_every_target() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Recorder::new("A", &log, 1);
        let b = Recorder::new("B", &log, 1);
        let targets = Targets::new();
        targets.add_target(a.clone()).unwrap();
        targets.add_target(b.clone()).unwrap();
        targets.end_processing();
        assert_eq!(a.ended.load(Ordering::SeqCst), 1);
        assert_eq!(b.ended.load(Ordering::SeqCst), 1);
    }
}
