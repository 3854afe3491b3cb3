// SPDX-License-Identifier: GPL-3.0-only

//! Server configuration
//!
//! Read from a JSON file (`--config`, else `<config dir>/vfx-relay/config.json` when
//! present), then overridden by command-line flags. Every field has a default so a
//! partial file is fine.

use crate::capture::candidate_paths;
use crate::constants::{self, defaults, limits};
use crate::effects::PerfMode;
use crate::errors::ConfigError;
use crate::relay::RelayTiming;
use crate::state::{CameraSettings, EffectMode, InitialState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Name of the config file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Relay pacing, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub idle_tick_ms: u64,
    pub placeholder_interval_ms: u64,
    pub open_retry_ms: u64,
    pub read_retry_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let t = RelayTiming::default();
        Self {
            idle_tick_ms: t.idle_tick.as_millis() as u64,
            placeholder_interval_ms: t.placeholder_interval.as_millis() as u64,
            open_retry_ms: t.open_retry.as_millis() as u64,
            read_retry_ms: t.read_retry.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Named pipe for control commands
    pub control_pipe: PathBuf,
    /// v4l2loopback device frames are written to
    pub sink_device: PathBuf,
    /// Effect engine model/tuning directory
    pub model_dir: Option<PathBuf>,
    pub perf_mode: PerfMode,
    /// Explicit camera; `None` probes `/dev/video0..=probe_last_index`
    pub input_device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub effect_mode: EffectMode,
    pub blur_strength: f32,
    pub vcam_enabled: bool,
    pub window_visible: bool,
    pub overlay_enabled: bool,
    pub pid_file: PathBuf,
    pub preview_file: PathBuf,
    pub probe_last_index: u32,
    pub timing: TimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_pipe: PathBuf::from(constants::CONTROL_PIPE_PATH),
            sink_device: PathBuf::from(constants::VIRTUAL_CAMERA_DEVICE),
            model_dir: None,
            perf_mode: PerfMode::default(),
            input_device: None,
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            fps: defaults::FPS,
            effect_mode: EffectMode::default(),
            blur_strength: defaults::BLUR_STRENGTH,
            vcam_enabled: true,
            window_visible: false,
            overlay_enabled: false,
            pid_file: PathBuf::from(constants::PID_FILE_PATH),
            preview_file: PathBuf::from(constants::PREVIEW_FILE_PATH),
            probe_last_index: constants::PROBE_LAST_INDEX,
            timing: TimingConfig::default(),
        }
    }
}

impl Config {
    /// `<config dir>/vfx-relay/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(constants::APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load an explicit file, or the default file if it exists, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file, using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Reject values the relay cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=limits::MAX_WIDTH).contains(&self.width)
            || !(1..=limits::MAX_HEIGHT).contains(&self.height)
        {
            return Err(ConfigError::Invalid(format!(
                "resolution {}x{} outside 1x1..{}x{}",
                self.width,
                self.height,
                limits::MAX_WIDTH,
                limits::MAX_HEIGHT
            )));
        }
        if !(limits::MIN_FPS..=limits::MAX_FPS).contains(&self.fps) {
            return Err(ConfigError::Invalid(format!(
                "fps {} outside {}..={}",
                self.fps,
                limits::MIN_FPS,
                limits::MAX_FPS
            )));
        }
        if !self.blur_strength.is_finite() || !(0.0..=1.0).contains(&self.blur_strength) {
            return Err(ConfigError::Invalid(format!(
                "blur strength {} outside 0..=1",
                self.blur_strength
            )));
        }
        let t = &self.timing;
        // Readers must see a fresh frame at least once a second
        if !(1..=1000).contains(&t.idle_tick_ms) || !(1..=1000).contains(&t.placeholder_interval_ms)
        {
            return Err(ConfigError::Invalid(
                "idle tick and placeholder interval must be 1..=1000 ms".to_string(),
            ));
        }
        if self.control_pipe.as_os_str().is_empty() || self.sink_device.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "control pipe and sink device paths must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Values the shared state starts with
    pub fn initial_state(&self) -> InitialState {
        InitialState {
            effect_mode: self.effect_mode,
            blur_strength: self.blur_strength,
            vcam_enabled: self.vcam_enabled,
            window_visible: self.window_visible,
            overlay_enabled: self.overlay_enabled,
            consumers: 0,
            camera: CameraSettings {
                width: self.width,
                height: self.height,
                fps: self.fps,
            },
            input_device: self.input_device.clone(),
        }
    }

    pub fn relay_timing(&self) -> RelayTiming {
        RelayTiming {
            idle_tick: Duration::from_millis(self.timing.idle_tick_ms),
            placeholder_interval: Duration::from_millis(self.timing.placeholder_interval_ms),
            open_retry: Duration::from_millis(self.timing.open_retry_ms),
            read_retry: Duration::from_millis(self.timing.read_retry_ms),
        }
    }

    /// Auto-detect order for capture devices
    pub fn probe_candidates(&self) -> Vec<String> {
        candidate_paths(self.probe_last_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_defaults_match_relay() {
        assert_eq!(Config::default().relay_timing(), RelayTiming::default());
    }

    #[test]
    fn test_validate_rejects_bad_fps() {
        let config = Config {
            fps: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_initial_state() {
        let config = Config {
            input_device: Some("/dev/video4".into()),
            ..Default::default()
        };
        let initial = config.initial_state();
        assert_eq!(initial.consumers, 0);
        assert_eq!(initial.input_device.as_deref(), Some("/dev/video4"));
        assert_eq!(initial.camera, CameraSettings::default());
    }
}
