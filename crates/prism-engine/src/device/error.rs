use super::GpuHandle;

/// Failure reported by a graphics device.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("device out of memory allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("unknown handle {0:?}")]
    UnknownHandle(GpuHandle),

    #[error("upload of {got} bytes does not match the {expected} bytes the texture needs")]
    InvalidUpload { expected: usize, got: usize },

    #[error("graphics backend error: {0}")]
    Backend(String),
}

/// Shader program build failure. Carries the backend's diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShaderError {
    #[error("shader compilation failed: {0}")]
    Compile(String),

    #[error("program link failed: {0}")]
    Link(String),
}
