use std::sync::Arc;

use super::NodeError;
use crate::cache::{CacheError, Framebuffer, FramebufferCache};
use crate::coords::{RotationMode, Size};

#[derive(Debug, Default)]
pub(crate) struct InputSlot {
    pub frame: Option<Arc<Framebuffer>>,
    pub size: Size,
    pub rotation: RotationMode,
    pub ready: bool,

    /// An upstream producer is registered for this slot.
    pub attached: bool,
}

impl InputSlot {
    /// Declared size, falling back to the held frame's size.
    pub fn effective_size(&self) -> Size {
        match &self.frame {
            Some(frame) if self.size.is_unconstrained() => frame.size(),
            _ => self.size,
        }
    }
}

/// Input slots of a consuming node.
#[derive(Debug)]
pub(crate) struct InputSlots {
    slots: Vec<InputSlot>,
}

impl InputSlots {
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| InputSlot::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<&InputSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Result<&mut InputSlot, NodeError> {
        let inputs = self.slots.len();
        debug_assert!(index < inputs, "input index {index} out of range for {inputs} inputs");
        self.slots
            .get_mut(index)
            .ok_or(NodeError::InvalidIndex { index, inputs })
    }

    /// Lowest slot with neither a registered producer nor a held frame.
    pub fn next_free(&self) -> Result<usize, NodeError> {
        self.slots
            .iter()
            .position(|s| !s.attached && s.frame.is_none())
            .ok_or(NodeError::NoFreeSlot)
    }

    pub fn holds_frames(&self) -> bool {
        self.slots.iter().any(|s| s.frame.is_some())
    }

    pub fn all_ready(&self) -> bool {
        self.slots.iter().all(|s| s.ready && s.frame.is_some())
    }

    /// Declared rotation of every slot, in slot order.
    pub fn rotations(&self) -> Vec<RotationMode> {
        self.slots.iter().map(|s| s.rotation).collect()
    }

    /// Moves every held frame out, clearing the ready flags.
    pub fn take_frames(&mut self) -> Vec<Arc<Framebuffer>> {
        self.slots
            .iter_mut()
            .filter_map(|s| {
                s.ready = false;
                s.frame.take()
            })
            .collect()
    }

    /// Retains `frame` into the slot, releasing whatever it held before.
    pub fn store(
        &mut self,
        cache: &FramebufferCache,
        frame: &Arc<Framebuffer>,
        index: usize,
    ) -> Result<(), NodeError> {
        let slot = self.slot_mut(index)?;
        if slot
            .frame
            .as_ref()
            .is_some_and(|held| held.id() == frame.id())
        {
            return Ok(());
        }

        cache.retain(frame)?;
        slot.ready = false;
        if let Some(previous) = slot.frame.replace(Arc::clone(frame)) {
            release_logged(cache, &previous);
        }
        Ok(())
    }
}

/// Releases a frame the node owns a reference to. Failures mean bookkeeping went wrong
/// elsewhere; the node cannot do anything about them beyond reporting.
pub(crate) fn release_logged(cache: &FramebufferCache, frame: &Arc<Framebuffer>) {
    match cache.release(frame) {
        Ok(()) => {}
        // Bookkeeping is done; only the GPU object outlived its queue.
        Err(CacheError::QueueStopped(_)) => {
            log::debug!("framebuffer {:?} released after its render queue stopped", frame.id());
        }
        Err(e) => log::error!("releasing framebuffer {:?}: {e}", frame.id()),
    }
}
