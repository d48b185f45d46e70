/// Initialization parameters for [`WgpuDevice`](super::WgpuDevice).
///
/// Keep this structure minimal. Add flags only when a concrete backend requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Adapter selection preference.
    pub power_preference: wgpu::PowerPreference,

    /// Allow a software adapter when no hardware adapter is available.
    pub force_fallback_adapter: bool,

    /// Required wgpu features.
    ///
    /// Favor an empty set for portability unless a feature is strictly necessary.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Label attached to the device and used as a prefix for resource labels.
    pub label: String,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            label: "prism".to_string(),
        }
    }
}
