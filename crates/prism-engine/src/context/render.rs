use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Capabilities, QueueStopped, RenderQueue};
use crate::cache::{CacheConfig, FramebufferCache};
use crate::coords::Size;
use crate::device::{GraphicsDevice, ProgramHandle, ShaderError};

/// Rendering context configuration.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Name of the render queue thread.
    pub queue_name: String,
    pub cache: CacheConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            queue_name: "prism-render".to_string(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to spawn the render queue: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    QueueStopped(#[from] QueueStopped),

    #[error(transparent)]
    Shader(#[from] ShaderError),
}

/// A compiled and linked shader program owned by a context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Program {
    handle: ProgramHandle,
}

impl Program {
    #[inline]
    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }
}

/// Shared rendering context.
///
/// Owns the render queue (and through it the graphics device), the framebuffer cache,
/// compiled programs and the current program binding. Cloning is cheap; every node of
/// a graph holds a clone. The context shuts down when [`RenderContext::shutdown`] is
/// called or the last clone is dropped.
#[derive(Clone)]
pub struct RenderContext {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Arc<RenderQueue>,
    cache: Arc<FramebufferCache>,
    capabilities: Capabilities,
    extensions: Mutex<HashMap<String, bool>>,
    programs: Mutex<HashMap<(String, String), Program>>,

    // Only touched on the render queue.
    active_program: Arc<Mutex<Option<ProgramHandle>>>,
    shut_down: AtomicBool,
}

impl RenderContext {
    /// Moves `device` onto a new render queue and queries its capabilities.
    pub fn new(device: Box<dyn GraphicsDevice>, config: ContextConfig) -> Result<Self, ContextError> {
        let queue = RenderQueue::new(&config.queue_name, device)?;
        let capabilities = Capabilities::query(&queue)?;
        let cache = Arc::new(FramebufferCache::new(
            Arc::clone(&queue),
            config.cache,
            &capabilities,
        ));

        log::info!(
            "render context `{}` started (max texture {}, {} texture units, red textures: {})",
            config.queue_name,
            capabilities.max_texture_size,
            capabilities.max_texture_units,
            capabilities.red_channel_textures,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                queue,
                cache,
                capabilities,
                extensions: Mutex::new(HashMap::new()),
                programs: Mutex::new(HashMap::new()),
                active_program: Arc::new(Mutex::new(None)),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn queue(&self) -> &Arc<RenderQueue> {
        &self.inner.queue
    }

    pub fn framebuffer_cache(&self) -> &Arc<FramebufferCache> {
        &self.inner.cache
    }

    /// True when called from the render queue.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.inner.queue.is_current()
    }

    pub fn run_sync<F, R>(&self, task: F) -> Result<R, QueueStopped>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner.queue.run_sync(task)
    }

    pub fn run_async<F>(&self, task: F) -> Result<(), QueueStopped>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.run_async(task)
    }

    /// Device access. Only valid on the render queue.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut dyn GraphicsDevice) -> R) -> R {
        self.inner.queue.with_device(f)
    }

    /// Runs `f` with the device on the render queue and waits for the result.
    pub fn device_sync<F, R>(&self, f: F) -> Result<R, QueueStopped>
    where
        F: FnOnce(&mut dyn GraphicsDevice) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner.queue.device_sync(f)
    }

    /// Binds `program` unless it is already the current one.
    pub fn set_active_program(&self, program: Program) -> Result<(), QueueStopped> {
        let active = Arc::clone(&self.inner.active_program);
        self.inner.queue.device_sync(move |device| {
            let mut active = active.lock().unwrap_or_else(PoisonError::into_inner);
            if *active != Some(program.handle) {
                device.bind_program(program.handle);
                *active = Some(program.handle);
            }
        })
    }

    /// Compiles and links a program, reusing an earlier build of the same sources.
    pub fn compile_program(&self, vertex: &str, fragment: &str) -> Result<Program, ContextError> {
        let key = (vertex.to_string(), fragment.to_string());
        if let Some(program) = self.programs().get(&key) {
            return Ok(*program);
        }

        let (vs, fs) = key.clone();
        let handle = self.inner.queue.device_sync(move |device| device.compile(&vs, &fs))??;
        let program = Program { handle };
        log::debug!("compiled program {handle:?}");

        let mut programs = self.programs();
        if let Some(existing) = programs.get(&key) {
            // Lost a race against another compile of the same sources.
            let existing = *existing;
            drop(programs);
            self.inner.queue.device_async(move |device| device.destroy(handle.into()))?;
            return Ok(existing);
        }
        programs.insert(key, program);
        Ok(program)
    }

    fn programs(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Program>> {
        self.inner.programs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    pub fn max_texture_size(&self) -> u32 {
        self.inner.capabilities.max_texture_size
    }

    pub fn max_texture_units(&self) -> u32 {
        self.inner.capabilities.max_texture_units
    }

    pub fn max_varying_vectors(&self) -> u32 {
        self.inner.capabilities.max_varying_vectors
    }

    pub fn supports_framebuffer_readback(&self) -> bool {
        self.inner.capabilities.framebuffer_readback
    }

    pub fn supports_red_channel_textures(&self) -> bool {
        self.inner.capabilities.red_channel_textures
    }

    /// Whether the device exposes extension `name`. Each name is queried once.
    pub fn supports_extension(&self, name: &str) -> bool {
        if let Some(&known) = self
            .inner
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return known;
        }

        let owned = name.to_string();
        let supported = match self.inner.queue.device_sync(move |device| device.query_extension(&owned)) {
            Ok(supported) => supported,
            Err(QueueStopped) => return false,
        };

        self.inner
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), supported);
        supported
    }

    /// Largest size not exceeding the maximum texture size with the aspect ratio of `size`.
    pub fn size_that_fits(&self, size: Size) -> Size {
        size_within(size, self.inner.capabilities.max_texture_size as f32)
    }

    /// Purges the framebuffer cache, destroys compiled programs and stops the queue.
    ///
    /// Idempotent. Also runs when the last clone is dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("queue", &self.inner.queue.name())
            .field("capabilities", &self.inner.capabilities)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Inner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("render context `{}` shutting down", self.queue.name());

        if let Err(e) = self.cache.purge() {
            log::warn!("framebuffer cache purge failed during shutdown: {e}");
        }

        let programs: Vec<ProgramHandle> = self
            .programs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, p)| p.handle)
            .collect();
        let active = Arc::clone(&self.active_program);
        let destroyed = self.queue.device_sync(move |device| {
            for program in programs {
                device.destroy(program.into());
            }
            *active.lock().unwrap_or_else(PoisonError::into_inner) = None;
        });
        if destroyed.is_err() {
            log::warn!("render queue `{}` stopped before programs were destroyed", self.queue.name());
        }

        self.queue.stop();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn size_within(size: Size, max: f32) -> Size {
    if size.width <= max && size.height <= max {
        return size;
    }
    let scale = max / size.width.max(size.height);
    Size::new(
        (size.width * scale).floor().min(max),
        (size.height * scale).floor().min(max),
    )
}
