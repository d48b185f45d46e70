use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CacheError, Framebuffer, FramebufferId, FramebufferKey};
use crate::context::{Capabilities, RenderQueue};
use crate::device::{DeviceError, GpuHandle, PixelFormat, TextureOptions};

/// Framebuffer cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound of idle objects kept per key. Objects released beyond it are destroyed.
    pub max_idle_per_key: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_idle_per_key: 4 }
    }
}

/// Snapshot of the cache counters.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub created: u64,
    pub destroyed: u64,
    pub available: usize,
    pub checked_out: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    available: HashMap<FramebufferKey, Vec<Arc<Framebuffer>>>,
    checked_out: HashMap<FramebufferId, Arc<Framebuffer>>,
    generation: u64,
    next_id: u64,
    hits: u64,
    misses: u64,
    created: u64,
    destroyed: u64,
}

impl CacheState {
    fn available_count(&self) -> usize {
        self.available.values().map(Vec::len).sum()
    }
}

/// Pool of framebuffer objects keyed by size, format and texture options.
///
/// Every object is either checked out (retain count > 0) or available, never both.
/// Bookkeeping sits behind its own mutex so producers on any thread can acquire and
/// release; allocation and destruction run on the render queue.
pub struct FramebufferCache {
    queue: Arc<RenderQueue>,
    config: CacheConfig,
    max_texture_size: u32,
    red_textures: bool,
    state: Mutex<CacheState>,
}

impl FramebufferCache {
    pub fn new(queue: Arc<RenderQueue>, config: CacheConfig, capabilities: &Capabilities) -> Self {
        Self {
            queue,
            config,
            max_texture_size: capabilities.max_texture_size,
            red_textures: capabilities.red_channel_textures,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks a request against the device before anything is allocated.
    fn validate(&self, key: &FramebufferKey) -> Result<(), CacheError> {
        if key.width == 0 || key.height == 0 {
            return Err(CacheError::InvalidConfiguration(format!(
                "zero-sized framebuffer {}x{}",
                key.width, key.height
            )));
        }
        if key.width > self.max_texture_size || key.height > self.max_texture_size {
            return Err(CacheError::InvalidConfiguration(format!(
                "{}x{} exceeds the maximum texture size {}",
                key.width, key.height, self.max_texture_size
            )));
        }
        if key.format.is_single_channel() && !self.red_textures {
            return Err(CacheError::InvalidConfiguration(format!(
                "{:?} needs red-channel texture support",
                key.format
            )));
        }
        if key.options.requires_power_of_two()
            && !(key.width.is_power_of_two() && key.height.is_power_of_two())
        {
            return Err(CacheError::InvalidConfiguration(format!(
                "repeat wrapping needs power-of-two dimensions, got {}x{}",
                key.width, key.height
            )));
        }
        Ok(())
    }

    /// Hands out a framebuffer matching the key with retain count 1.
    ///
    /// Reuses an idle object when one exists, otherwise allocates on the render queue.
    pub fn acquire(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        options: TextureOptions,
    ) -> Result<Arc<Framebuffer>, CacheError> {
        let key = FramebufferKey::new(width, height, format, options);
        self.validate(&key)?;

        let (id, generation) = {
            let mut state = self.state();
            if let Some(fb) = state.available.get_mut(&key).and_then(Vec::pop) {
                fb.set_retain_count(1);
                state.checked_out.insert(fb.id(), Arc::clone(&fb));
                state.hits += 1;
                log::debug!("framebuffer cache hit {:?} {width}x{height} {format:?}", fb.id());
                return Ok(fb);
            }

            state.misses += 1;
            state.next_id += 1;
            (FramebufferId(state.next_id), state.generation)
        };

        log::debug!("framebuffer cache miss {width}x{height} {format:?}, allocating {id:?}");

        let (texture, framebuffer) = self.queue.device_sync(move |device| -> Result<_, DeviceError> {
            let texture = device.create_texture(width, height, format, &options)?;
            if !options.render_target {
                return Ok((texture, None));
            }
            match device.create_framebuffer(texture) {
                Ok(fb) => Ok((texture, Some(fb))),
                Err(e) => {
                    device.destroy(texture.into());
                    Err(e)
                }
            }
        })??;

        let fb = Arc::new(Framebuffer::new(id, key, texture, framebuffer, generation));
        fb.set_retain_count(1);

        let mut state = self.state();
        state.created += 1;
        state.checked_out.insert(id, Arc::clone(&fb));
        Ok(fb)
    }

    /// Adds one reference to a checked-out framebuffer.
    pub fn retain(&self, fb: &Arc<Framebuffer>) -> Result<(), CacheError> {
        let state = self.state();
        if !state.checked_out.contains_key(&fb.id()) {
            return Err(CacheError::NotCheckedOut(fb.id()));
        }
        fb.set_retain_count(fb.retain_count() + 1);
        Ok(())
    }

    /// Drops one reference. At zero the object returns to the pool, or is destroyed when
    /// the pool for its key is full or it predates the last purge.
    pub fn release(&self, fb: &Arc<Framebuffer>) -> Result<(), CacheError> {
        let doomed = {
            let mut state = self.state();
            if !state.checked_out.contains_key(&fb.id()) {
                return Err(CacheError::DoubleRelease(fb.id()));
            }

            let count = fb.retain_count().saturating_sub(1);
            fb.set_retain_count(count);
            if count > 0 {
                return Ok(());
            }

            let Some(fb) = state.checked_out.remove(&fb.id()) else {
                return Ok(());
            };

            if fb.generation() == state.generation {
                let idle = state.available.get(&fb.key()).map_or(0, Vec::len);
                if idle < self.config.max_idle_per_key {
                    state.available.entry(fb.key()).or_default().push(fb);
                    return Ok(());
                }
            }

            state.destroyed += 1;
            fb
        };

        log::debug!(
            "framebuffer {:?} not pooled (generation {}), destroying",
            doomed.id(),
            doomed.generation()
        );
        let handles = gpu_handles(&doomed);
        self.queue.device_async(move |device| {
            for handle in handles {
                device.destroy(handle);
            }
        })?;
        Ok(())
    }

    /// Destroys every idle object now.
    ///
    /// Checked-out objects are left alone; since the generation moves on, they are
    /// destroyed instead of pooled when their last reference goes away.
    pub fn purge(&self) -> Result<(), CacheError> {
        let doomed: Vec<Arc<Framebuffer>> = {
            let mut state = self.state();
            state.generation += 1;
            let doomed: Vec<_> = state.available.drain().flat_map(|(_, v)| v).collect();
            state.destroyed += doomed.len() as u64;
            doomed
        };

        log::debug!("framebuffer cache purge: destroying {} idle objects", doomed.len());
        if doomed.is_empty() {
            return Ok(());
        }

        let handles: Vec<GpuHandle> = doomed.iter().flat_map(|fb| gpu_handles(fb)).collect();
        self.queue.device_sync(move |device| {
            for handle in handles {
                device.destroy(handle);
            }
        })?;
        Ok(())
    }

    pub fn available_count(&self) -> usize {
        self.state().available_count()
    }

    pub fn checked_out_count(&self) -> usize {
        self.state().checked_out.len()
    }

    pub fn is_checked_out(&self, fb: &Framebuffer) -> bool {
        self.state().checked_out.contains_key(&fb.id())
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            created: state.created,
            destroyed: state.destroyed,
            available: state.available_count(),
            checked_out: state.checked_out.len(),
        }
    }
}

impl std::fmt::Debug for FramebufferCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramebufferCache")
            .field("queue", &self.queue.name())
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn gpu_handles(fb: &Framebuffer) -> Vec<GpuHandle> {
    let mut handles = Vec::with_capacity(2);
    if let Some(f) = fb.framebuffer() {
        handles.push(f.into());
    }
    handles.push(fb.texture().into());
    handles
}
