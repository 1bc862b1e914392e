//! Renderer configuration — the enumerated options the core honors.

use super::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Present-mode preference. Falls back per a priority list when unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VsyncMode {
    /// No frame pacing; tears if the GPU is faster than the display.
    Immediate,
    /// Non-blocking, drops stale frames instead of tearing.
    Mailbox,
    /// Blocking FIFO; always supported.
    Fifo,
    /// Fifo with tearing allowed when the application misses the deadline.
    FifoRelaxed,
}

impl VsyncMode {
    /// Present modes to try, in priority order, before falling back to `Fifo`.
    #[must_use]
    pub fn priority(self) -> &'static [VsyncMode] {
        match self {
            Self::Immediate => &[Self::Immediate, Self::Mailbox, Self::Fifo],
            Self::Mailbox => &[Self::Mailbox, Self::Fifo],
            Self::Fifo => &[Self::Fifo],
            Self::FifoRelaxed => &[Self::FifoRelaxed, Self::Fifo],
        }
    }
}

/// Window-adapt upscaling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScalingFilter {
    NearestNeighbor,
    #[default]
    Bilinear,
    Bicubic,
    Gaussian,
    ScaleForce,
    Fsr,
}

/// Output aspect ratio, driving `emulation_aspect_ratio` framebuffer layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[default]
    R16To9,
    R4To3,
    R21To9,
    R16To10,
    R32To9,
    Stretch,
}

impl AspectRatio {
    /// Numeric ratio, or `None` for `Stretch` (which ignores source aspect entirely).
    #[must_use]
    pub fn ratio(self) -> Option<f32> {
        match self {
            Self::R16To9 => Some(16.0 / 9.0),
            Self::R4To3 => Some(4.0 / 3.0),
            Self::R21To9 => Some(21.0 / 9.0),
            Self::R16To10 => Some(16.0 / 10.0),
            Self::R32To9 => Some(32.0 / 9.0),
            Self::Stretch => None,
        }
    }
}

/// ASTC texture recompression target for devices lacking native ASTC support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AstcRecompression {
    #[default]
    Uncompressed,
    Bc1,
    Bc3,
}

/// Where ASTC decode work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AstcDecodeMode {
    Cpu,
    #[default]
    Gpu,
    CpuAsynchronous,
}

/// Overall VRAM usage policy, used by the staging and texture caches to decide
/// how aggressively to keep device-local copies around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VRamUsageMode {
    #[default]
    Conservative,
    Aggressive,
}

/// The complete set of options the rendering core honors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Vulkan application name, forwarded into `VkApplicationInfo`.
    pub application_name: String,
    /// Desired presentation mode; actual mode may fall back per priority list.
    pub vsync_mode: VsyncMode,
    /// Window-adapt upscaling filter.
    pub scaling_filter: ScalingFilter,
    /// Output aspect ratio policy.
    pub aspect_ratio: AspectRatio,
    /// Master vsync toggle; when false, `vsync_mode` is ignored in favor of `Immediate`.
    pub use_vsync: bool,
    /// Whether a dedicated present thread consumes the presentation queue.
    pub use_present_thread: bool,
    /// Whether draws may be skipped while their pipeline compiles asynchronously.
    pub use_asynchronous_shaders: bool,
    /// Whether the driver pipeline cache is persisted to disk.
    pub use_pipeline_cache: bool,
    /// Whether `VK_KHR_dynamic_rendering` is used instead of render passes.
    pub use_dynamic_rendering: bool,
    /// Whether validation layers and verbose render logging are enabled.
    pub render_debug: bool,
    /// FSR sharpening amount, 0..=100.
    pub fsr_sharpening_slider: u8,
    /// ASTC recompression target for devices lacking native ASTC.
    pub astc_recompression: AstcRecompression,
    /// Where ASTC decode work runs.
    pub astc_decode_mode: AstcDecodeMode,
    /// VRAM usage policy.
    pub v_ram_usage_mode: VRamUsageMode,
    /// Number of frames the scheduler/presentation allow in flight.
    pub max_frames_in_flight: usize,
    /// Size of the presentation frame pool.
    pub presentation_frame_pool_size: usize,
}

impl RendererConfig {
    /// Validate cross-field constraints, returning an error describing the first violation.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if any field is out of its documented range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application_name must not be empty".into()));
        }
        if self.max_frames_in_flight == 0 || self.max_frames_in_flight > 8 {
            return Err(ConfigError::Invalid(
                "max_frames_in_flight must be in 1..=8".into(),
            ));
        }
        if self.presentation_frame_pool_size < self.max_frames_in_flight {
            return Err(ConfigError::Invalid(
                "presentation_frame_pool_size must be >= max_frames_in_flight".into(),
            ));
        }
        if self.fsr_sharpening_slider > 100 {
            return Err(ConfigError::Invalid(
                "fsr_sharpening_slider must be in 0..=100".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "vk-render-core application".to_string(),
            vsync_mode: VsyncMode::Fifo,
            scaling_filter: ScalingFilter::default(),
            aspect_ratio: AspectRatio::default(),
            use_vsync: true,
            use_present_thread: true,
            use_asynchronous_shaders: true,
            use_pipeline_cache: true,
            use_dynamic_rendering: false,
            render_debug: cfg!(debug_assertions),
            fsr_sharpening_slider: 50,
            astc_recompression: AstcRecompression::default(),
            astc_decode_mode: AstcDecodeMode::default(),
            v_ram_usage_mode: VRamUsageMode::default(),
            max_frames_in_flight: 3,
            presentation_frame_pool_size: 7,
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        RendererConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_empty_application_name() {
        let mut config = RendererConfig::default();
        config.application_name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_frame_pool_smaller_than_frames_in_flight() {
        let mut config = RendererConfig::default();
        config.presentation_frame_pool_size = 1;
        config.max_frames_in_flight = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn vsync_priority_falls_back_to_fifo() {
        assert_eq!(*VsyncMode::Mailbox.priority().last().unwrap(), VsyncMode::Fifo);
    }
}
