use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crate::device::GraphicsDevice;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The render queue has been stopped; no further tasks are accepted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("render queue has been stopped")]
pub struct QueueStopped;

/// Serial execution queue that owns the graphics device.
///
/// One worker thread runs every submitted task in FIFO order. The device may only
/// be touched from that thread ([`RenderQueue::with_device`]), which models a graphics
/// context being current on exactly one thread.
pub struct RenderQueue {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    device: Mutex<Box<dyn GraphicsDevice>>,
}

impl RenderQueue {
    /// Spawns the worker thread and moves `device` behind the queue.
    pub fn new(name: &str, device: Box<dyn GraphicsDevice>) -> std::io::Result<Arc<Self>> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.to_string();

        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                log::debug!("render queue `{thread_name}` started");
                while let Ok(job) = receiver.recv() {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        log::error!(
                            "render queue `{thread_name}`: task panicked: {}",
                            panic_message(payload.as_ref())
                        );
                    }
                }
                log::debug!("render queue `{thread_name}` stopped");
            })?;

        Ok(Arc::new(Self {
            name: name.to_string(),
            worker_id: worker.thread().id(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            device: Mutex::new(device),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when called from the queue's worker thread.
    #[inline]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Enqueues `task` and returns immediately.
    pub fn run_async<F>(&self, task: F) -> Result<(), QueueStopped>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(s) => s.send(Box::new(task)).map_err(|_| QueueStopped),
            None => Err(QueueStopped),
        }
    }

    /// Runs `task` on the queue and blocks until it has finished.
    ///
    /// Called from the queue itself, the task runs inline. A panic inside the task is
    /// resumed on the calling thread.
    pub fn run_sync<F, R>(&self, task: F) -> Result<R, QueueStopped>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(task());
        }

        let (tx, rx) = mpsc::sync_channel(1);
        self.run_async(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task));
            let _ = tx.send(result);
        })?;

        match rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            // Worker exited with the task still queued.
            Err(_) => Err(QueueStopped),
        }
    }

    /// Gives `f` the device. Only valid on the queue.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut dyn GraphicsDevice) -> R) -> R {
        debug_assert!(
            self.is_current(),
            "graphics device used off the `{}` render queue",
            self.name
        );
        let mut device = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        f(device.as_mut())
    }

    /// Runs `f` with the device on the queue, inline if already there, and waits for it.
    pub fn device_sync<F, R>(self: &Arc<Self>, f: F) -> Result<R, QueueStopped>
    where
        F: FnOnce(&mut dyn GraphicsDevice) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(self.with_device(f));
        }
        let queue = Arc::clone(self);
        self.run_sync(move || queue.with_device(f))
    }

    /// Runs `f` with the device on the queue without waiting; inline if already there.
    pub fn device_async<F>(self: &Arc<Self>, f: F) -> Result<(), QueueStopped>
    where
        F: FnOnce(&mut dyn GraphicsDevice) + Send + 'static,
    {
        if self.is_current() {
            self.with_device(f);
            return Ok(());
        }
        let queue = Arc::clone(self);
        self.run_async(move || queue.with_device(f))
    }

    /// Stops accepting tasks, drains the ones already queued and joins the worker.
    ///
    /// Idempotent. When called from the worker itself the thread is detached instead
    /// of joined.
    pub fn stop(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if self.is_current() {
                return;
            }
            if worker.join().is_err() {
                log::error!("render queue `{}`: worker thread panicked", self.name);
            }
        }
    }
}

impl Drop for RenderQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    fn queue() -> Arc<RenderQueue> {
        RenderQueue::new("test-queue", Box::new(HeadlessDevice::new())).unwrap()
    }

    #[test]
    fn async_tasks_run_in_submission_order() {
        let q = queue();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let log = Arc::clone(&log);
            q.run_async(move || log.lock().unwrap().push(i)).unwrap();
        }
        q.run_sync(|| ()).unwrap();
        assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn sync_returns_value_from_worker_thread() {
        let q = queue();
        let q2 = Arc::clone(&q);
        let on_queue = q.run_sync(move || q2.is_current()).unwrap();
        assert!(on_queue);
        assert!(!q.is_current());
    }

    #[test]
    fn nested_sync_runs_inline() {
        let q = queue();
        let q2 = Arc::clone(&q);
        let v = q
            .run_sync(move || {
                let q3 = Arc::clone(&q2);
                q2.run_sync(move || q3.is_current()).unwrap()
            })
            .unwrap();
        assert!(v);
    }

    #[test]
    fn panic_is_resumed_on_caller_and_queue_survives() {
        let q = queue();
        let q2 = Arc::clone(&q);
        let caught = panic::catch_unwind(AssertUnwindSafe(move || {
            q2.run_sync(|| -> u32 { panic!("boom") }).unwrap();
        }));
        assert!(caught.is_err());
        assert_eq!(q.run_sync(|| 7).unwrap(), 7);
    }

    #[test]
    fn stopped_queue_rejects_tasks() {
        let q = queue();
        q.stop();
        q.stop();
        assert_eq!(q.run_async(|| ()), Err(QueueStopped));
        assert_eq!(q.run_sync(|| 1), Err(QueueStopped));
    }

    #[test]
    fn device_sync_hops_onto_queue() {
        let q = queue();
        let limit = q
            .device_sync(|d| d.query_limit(crate::device::Limit::MaxTextureSize))
            .unwrap();
        assert_eq!(limit, 4096);
    }
}
