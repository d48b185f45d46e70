use crate::cache::CacheError;
use crate::context::{ContextError, QueueStopped};
use crate::device::{DeviceError, ShaderError};

/// Processing node failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeError {
    #[error("input index {index} out of range for a node with {inputs} inputs")]
    InvalidIndex { index: usize, inputs: usize },

    #[error("node has no free input slot")]
    NoFreeSlot,

    #[error("node has ended processing")]
    Ended,

    #[error("invalid node configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    QueueStopped(#[from] QueueStopped),
}

impl From<ContextError> for NodeError {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::Shader(e) => NodeError::Shader(e),
            ContextError::QueueStopped(e) => NodeError::QueueStopped(e),
            ContextError::Spawn(e) => NodeError::Device(DeviceError::Backend(e.to_string())),
        }
    }
}
