use std::fmt;
use std::str::FromStr;

/// Environment variable consulted by [`BackendKind::from_env`].
pub const BACKEND_ENV_VAR: &str = "SURFELVIEW_BACKEND";

/// Native backend used for windowless contexts.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BackendKind {
    /// Hardware context on a wgpu device (Vulkan/Metal/DX12/GL, picked by wgpu).
    Gpu,
    /// CPU context with host-memory buffers and an RGBA8 framebuffer.
    ///
    /// Used on machines without an adapter and by the test suite.
    Software,
}

impl BackendKind {
    /// Reads `SURFELVIEW_BACKEND` (`gpu` or `software`), falling back to `Gpu`.
    pub fn from_env() -> Self {
        match std::env::var(BACKEND_ENV_VAR) {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                log::warn!("ignoring unknown {BACKEND_ENV_VAR}={value:?}; using gpu");
                BackendKind::Gpu
            }),
            Err(_) => BackendKind::Gpu,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Gpu => f.write_str("gpu"),
            BackendKind::Software => f.write_str("software"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" | "wgpu" | "hardware" => Ok(BackendKind::Gpu),
            "software" | "cpu" | "soft" => Ok(BackendKind::Software),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

/// Creation parameters for windowless contexts.
///
/// Keep this structure small. Add flags only when a backend needs one.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Backend used by `ContextManager::create_windowless`.
    pub backend: BackendKind,

    /// Adapter selection preference (gpu backend only).
    pub power_preference: wgpu::PowerPreference,

    /// Allow wgpu to pick a software adapter when no hardware one exists.
    pub force_fallback_adapter: bool,

    /// Required wgpu features.
    ///
    /// Interop buffers only need core usages, so the default is empty.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Prefer an sRGB format for the offscreen frame target.
    pub prefer_srgb: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Gpu,
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            prefer_srgb: true,
        }
    }
}

impl ContextConfig {
    /// Default configuration for the software backend.
    pub fn software() -> Self {
        Self {
            backend: BackendKind::Software,
            ..Self::default()
        }
    }

    /// Default configuration with the backend taken from the environment.
    pub fn from_env() -> Self {
        Self {
            backend: BackendKind::from_env(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!("gpu".parse::<BackendKind>(), Ok(BackendKind::Gpu));
        assert_eq!(" Software ".parse::<BackendKind>(), Ok(BackendKind::Software));
        assert_eq!("cpu".parse::<BackendKind>(), Ok(BackendKind::Software));
        assert!("vulkan-ish".parse::<BackendKind>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for kind in [BackendKind::Gpu, BackendKind::Software] {
            assert_eq!(kind.to_string().parse::<BackendKind>(), Ok(kind));
        }
    }

    #[test]
    fn software_config_keeps_defaults() {
        let config = ContextConfig::software();
        assert_eq!(config.backend, BackendKind::Software);
        assert!(config.prefer_srgb);
    }
}
