//! Renderer configuration.
//!
//! [`RendererConfig`] starts from sensible defaults, can be overridden from
//! `VKINTEROP_*` environment variables and is validated once before the
//! renderer is built. The demo binary layers its command-line flags on top.

use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

/// Upper bound on frames in flight accepted by [`RendererConfig::validate`].
pub const MAX_SUPPORTED_FRAMES_IN_FLIGHT: usize = 4;

const ENV_FRAMES_IN_FLIGHT: &str = "VKINTEROP_FRAMES_IN_FLIGHT";
const ENV_FENCE_TIMEOUT_MS: &str = "VKINTEROP_FENCE_TIMEOUT_MS";
const ENV_VALIDATION: &str = "VKINTEROP_VALIDATION";
const ENV_PRESENT_MODE: &str = "VKINTEROP_PRESENT_MODE";

/// Which presentation mode the swap chain should ask for first.
///
/// FIFO is always available and is used whenever the preference is not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    /// Low-latency triple buffering without tearing.
    #[default]
    Mailbox,
    /// Classic vsync.
    Fifo,
    /// No vsync, may tear.
    Immediate,
}

impl FromStr for PresentModePreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mailbox" => Ok(Self::Mailbox),
            "fifo" | "vsync" => Ok(Self::Fifo),
            "immediate" => Ok(Self::Immediate),
            other => Err(Error::config(
                ENV_PRESENT_MODE,
                format!("unknown present mode '{other}'"),
            )),
        }
    }
}

/// Tunables for window, synchronization and presentation.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    pub window_width: u32,
    pub window_height: u32,
    pub title: String,
    /// Number of frame slots the CPU may run ahead of the GPU.
    pub max_frames_in_flight: usize,
    /// Bound on every CPU-side wait (fences, acquire, device idle).
    /// `None` waits forever.
    pub fence_timeout: Option<Duration>,
    pub enable_validation: bool,
    pub present_mode: PresentModePreference,
    /// Clear color of the main render pass.
    pub clear_color: [f32; 4],
    /// Clear color of offscreen passes.
    pub offscreen_clear_color: [f32; 4],
    /// Enable exportable device memory for the cross-API image bridge.
    pub enable_interop: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_width: 1280,
            window_height: 720,
            title: "vkinterop".to_string(),
            max_frames_in_flight: 2,
            fence_timeout: None,
            enable_validation: cfg!(debug_assertions),
            present_mode: PresentModePreference::Mailbox,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            offscreen_clear_color: [0.1, 0.1, 0.3, 1.0],
            enable_interop: false,
        }
    }
}

impl RendererConfig {
    /// Applies `VKINTEROP_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// Split out from [`with_env_overrides`](Self::with_env_overrides) so the
    /// parsing can be exercised without touching the real environment.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_FRAMES_IN_FLIGHT) {
            self.max_frames_in_flight = value.trim().parse().map_err(|_| {
                Error::config(ENV_FRAMES_IN_FLIGHT, format!("not an integer: '{value}'"))
            })?;
            debug!(frames = self.max_frames_in_flight, "frames in flight overridden");
        }

        if let Some(value) = lookup(ENV_FENCE_TIMEOUT_MS) {
            let millis: u64 = value.trim().parse().map_err(|_| {
                Error::config(ENV_FENCE_TIMEOUT_MS, format!("not an integer: '{value}'"))
            })?;
            self.fence_timeout = (millis > 0).then(|| Duration::from_millis(millis));
            debug!(timeout = ?self.fence_timeout, "fence timeout overridden");
        }

        if let Some(value) = lookup(ENV_VALIDATION) {
            self.enable_validation = match value.trim() {
                "1" | "true" | "on" => true,
                "0" | "false" | "off" => false,
                other => {
                    return Err(Error::config(
                        ENV_VALIDATION,
                        format!("expected a boolean, got '{other}'"),
                    ));
                }
            };
        }

        if let Some(value) = lookup(ENV_PRESENT_MODE) {
            self.present_mode = value.trim().parse()?;
        }

        Ok(self)
    }

    /// Rejects values the renderer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_frames_in_flight == 0
            || self.max_frames_in_flight > MAX_SUPPORTED_FRAMES_IN_FLIGHT
        {
            return Err(Error::config(
                "max_frames_in_flight",
                format!(
                    "must be between 1 and {MAX_SUPPORTED_FRAMES_IN_FLIGHT}, got {}",
                    self.max_frames_in_flight
                ),
            ));
        }

        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::config(
                "window_size",
                format!(
                    "window must have a non-zero area, got {}x{}",
                    self.window_width, self.window_height
                ),
            ));
        }

        if self.fence_timeout == Some(Duration::ZERO) {
            return Err(Error::config(
                "fence_timeout",
                "a zero timeout would fail every wait; use None to wait forever",
            ));
        }

        Ok(())
    }

    /// The fence timeout in nanoseconds as Vulkan expects it.
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout
            .map(|timeout| u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.fence_timeout_ns(), u64::MAX);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = RendererConfig::default()
            .with_overrides(lookup_from(&[
                ("VKINTEROP_FRAMES_IN_FLIGHT", "3"),
                ("VKINTEROP_FENCE_TIMEOUT_MS", "250"),
                ("VKINTEROP_VALIDATION", "off"),
                ("VKINTEROP_PRESENT_MODE", "FIFO"),
            ]))
            .unwrap();

        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.fence_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.fence_timeout_ns(), 250_000_000);
        assert!(!config.enable_validation);
        assert_eq!(config.present_mode, PresentModePreference::Fifo);
    }

    #[test]
    fn test_zero_timeout_override_means_forever() {
        let config = RendererConfig::default()
            .with_overrides(lookup_from(&[("VKINTEROP_FENCE_TIMEOUT_MS", "0")]))
            .unwrap();
        assert_eq!(config.fence_timeout, None);
    }

    #[test]
    fn test_malformed_override_is_rejected() {
        let err = RendererConfig::default()
            .with_overrides(lookup_from(&[("VKINTEROP_FRAMES_IN_FLIGHT", "two")]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                key: "VKINTEROP_FRAMES_IN_FLIGHT",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_frames() {
        let zero = RendererConfig {
            max_frames_in_flight: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let too_many = RendererConfig {
            max_frames_in_flight: MAX_SUPPORTED_FRAMES_IN_FLIGHT + 1,
            ..Default::default()
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_window() {
        let config = RendererConfig {
            window_height: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_present_mode_parsing() {
        assert_eq!(
            "mailbox".parse::<PresentModePreference>().unwrap(),
            PresentModePreference::Mailbox
        );
        assert_eq!(
            "vsync".parse::<PresentModePreference>().unwrap(),
            PresentModePreference::Fifo
        );
        assert!("triple".parse::<PresentModePreference>().is_err());
    }
}
