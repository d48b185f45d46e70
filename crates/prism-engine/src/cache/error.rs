use super::FramebufferId;
use crate::context::QueueStopped;
use crate::device::DeviceError;

/// Framebuffer cache failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("invalid framebuffer configuration: {0}")]
    InvalidConfiguration(String),

    #[error("framebuffer {0:?} released while not checked out")]
    DoubleRelease(FramebufferId),

    #[error("framebuffer {0:?} is not checked out")]
    NotCheckedOut(FramebufferId),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    QueueStopped(#[from] QueueStopped),
}
