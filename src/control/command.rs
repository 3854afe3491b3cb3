// SPDX-License-Identifier: GPL-3.0-only

//! Control protocol commands
//!
//! One command per line, case-sensitive. Each command mutates exactly one group of
//! [`SharedState`] (or the running flag); device handles are never touched here.

use crate::constants::limits;
use crate::errors::CommandError;
use crate::state::{EffectMode, SharedState};
use std::path::PathBuf;
use tracing::{debug, info};

/// A parsed control command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `QUIT`
    Quit,
    /// `MODE:<ordinal>`
    Mode(EffectMode),
    /// `BLUR:<0.0-1.0>`
    Blur(f32),
    /// `BG:<path>`
    Background(PathBuf),
    /// `VCAM:on|off`
    Vcam(bool),
    /// `PREVIEW:on|off`, `WINDOW:visible|hidden`
    Preview(bool),
    /// `OVERLAY:on|off`
    Overlay(bool),
    /// `DEVICE:<path>`; empty path selects auto-detection
    Device(Option<String>),
    /// `RESOLUTION:<W>x<H>`
    Resolution { width: u32, height: u32 },
    /// `FPS:<int>`
    Fps(u32),
    /// `VCAM_CONSUMERS:<int>`
    Consumers(u32),
    /// `VCAM_OPENERS:<int>`, includes our own writer handle
    Openers(u32),
}

fn malformed(command: &'static str, payload: &str) -> CommandError {
    CommandError::Malformed {
        command,
        payload: payload.to_string(),
    }
}

fn parse_toggle(command: &'static str, payload: &str, on: &str, off: &str) -> Result<bool, CommandError> {
    if payload == on {
        Ok(true)
    } else if payload == off {
        Ok(false)
    } else {
        Err(malformed(command, payload))
    }
}

/// Parse a count reported by the consumer watcher.
///
/// Counts have a legitimate default, so garbage and negatives become 0.
fn parse_count(payload: &str) -> u32 {
    payload
        .trim()
        .parse::<i64>()
        .map(|n| n.clamp(0, i64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

impl Command {
    /// Parse a single line (without its terminator)
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line == "QUIT" {
            return Ok(Command::Quit);
        }

        let Some((name, payload)) = line.split_once(':') else {
            return Err(CommandError::Unknown(line.to_string()));
        };

        match name {
            "MODE" => payload
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(EffectMode::from_ordinal)
                .map(Command::Mode)
                .ok_or_else(|| malformed("MODE", payload)),
            "BLUR" => match payload.trim().parse::<f32>() {
                Ok(v) if v.is_finite() => Ok(Command::Blur(v.clamp(0.0, 1.0))),
                _ => Err(malformed("BLUR", payload)),
            },
            "BG" => {
                if payload.is_empty() {
                    Err(malformed("BG", payload))
                } else {
                    Ok(Command::Background(PathBuf::from(payload)))
                }
            }
            "VCAM" => parse_toggle("VCAM", payload, "on", "off").map(Command::Vcam),
            "PREVIEW" => parse_toggle("PREVIEW", payload, "on", "off").map(Command::Preview),
            "WINDOW" => {
                parse_toggle("WINDOW", payload, "visible", "hidden").map(Command::Preview)
            }
            "OVERLAY" => parse_toggle("OVERLAY", payload, "on", "off").map(Command::Overlay),
            "DEVICE" => {
                let path = payload.trim();
                Ok(Command::Device((!path.is_empty()).then(|| path.to_string())))
            }
            "RESOLUTION" => {
                let (w, h) = payload
                    .split_once('x')
                    .ok_or_else(|| malformed("RESOLUTION", payload))?;
                let width = w.trim().parse::<u32>().ok();
                let height = h.trim().parse::<u32>().ok();
                match (width, height) {
                    (Some(width), Some(height))
                        if (1..=limits::MAX_WIDTH).contains(&width)
                            && (1..=limits::MAX_HEIGHT).contains(&height) =>
                    {
                        Ok(Command::Resolution { width, height })
                    }
                    _ => Err(malformed("RESOLUTION", payload)),
                }
            }
            "FPS" => match payload.trim().parse::<u32>() {
                Ok(fps) if (limits::MIN_FPS..=limits::MAX_FPS).contains(&fps) => {
                    Ok(Command::Fps(fps))
                }
                _ => Err(malformed("FPS", payload)),
            },
            "VCAM_CONSUMERS" => Ok(Command::Consumers(parse_count(payload))),
            "VCAM_OPENERS" => Ok(Command::Openers(parse_count(payload))),
            _ => Err(CommandError::Unknown(line.to_string())),
        }
    }

    /// Apply the command to shared state
    pub fn apply(&self, state: &SharedState) {
        match self {
            Command::Quit => {
                info!("Received QUIT command");
                state.request_shutdown();
            }
            Command::Mode(mode) => {
                state.set_effect_mode(*mode);
                info!(mode = %mode, "Effect mode changed");
            }
            Command::Blur(strength) => {
                state.set_blur_strength(*strength);
                debug!(strength, "Blur strength changed");
            }
            Command::Background(path) => {
                info!(path = %path.display(), "Background selected");
                state.set_background(path.clone());
            }
            Command::Vcam(enabled) => {
                state.set_vcam_enabled(*enabled);
                info!(enabled, "Virtual camera output toggled");
            }
            Command::Preview(visible) => {
                state.set_window_visible(*visible);
                info!(visible, "Preview demand changed");
            }
            Command::Overlay(enabled) => {
                state.set_overlay_enabled(*enabled);
                debug!(enabled, "Overlay toggled");
            }
            Command::Device(path) => {
                if state.set_input_device(path.clone()) {
                    info!(device = ?path, "Input device changed");
                }
            }
            Command::Resolution { width, height } => {
                if state.set_resolution(*width, *height) {
                    info!(width, height, "Capture resolution requested");
                }
            }
            Command::Fps(fps) => {
                if state.set_fps(*fps) {
                    info!(fps, "Capture frame rate requested");
                }
            }
            Command::Consumers(count) => set_consumers(state, *count, "consumers"),
            Command::Openers(openers) => {
                set_consumers(state, openers.saturating_sub(1), "openers")
            }
        }
    }
}

fn set_consumers(state: &SharedState, count: u32, source: &'static str) {
    let previous = state.set_consumers(count);
    if previous != count {
        info!(consumers = count, previous, source, "Virtual camera consumers changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toggles() {
        assert_eq!(Command::parse("VCAM:on"), Ok(Command::Vcam(true)));
        assert_eq!(Command::parse("VCAM:off"), Ok(Command::Vcam(false)));
        assert_eq!(Command::parse("WINDOW:hidden"), Ok(Command::Preview(false)));
        assert!(Command::parse("VCAM:ON").is_err(), "commands are case-sensitive");
    }

    #[test]
    fn test_parse_counts_default_to_zero() {
        assert_eq!(Command::parse("VCAM_CONSUMERS:3"), Ok(Command::Consumers(3)));
        assert_eq!(Command::parse("VCAM_CONSUMERS:-4"), Ok(Command::Consumers(0)));
        assert_eq!(Command::parse("VCAM_CONSUMERS:lots"), Ok(Command::Consumers(0)));
        assert_eq!(Command::parse("VCAM_OPENERS:"), Ok(Command::Openers(0)));
    }

    #[test]
    fn test_openers_subtract_own_handle() {
        let state = SharedState::default();
        Command::Openers(3).apply(&state);
        assert_eq!(state.consumers(), 2);
        Command::Openers(0).apply(&state);
        assert_eq!(state.consumers(), 0);
    }

    #[test]
    fn test_resolution_bounds() {
        assert_eq!(
            Command::parse("RESOLUTION:1920x1080"),
            Ok(Command::Resolution {
                width: 1920,
                height: 1080
            })
        );
        assert!(Command::parse("RESOLUTION:8192x4320").is_err());
        assert!(Command::parse("RESOLUTION:0x720").is_err());
        assert!(Command::parse("RESOLUTION:1920").is_err());
    }

    #[test]
    fn test_crlf_trimmed() {
        assert_eq!(Command::parse("QUIT\r"), Ok(Command::Quit));
        assert_eq!(Command::parse("FPS:60\r"), Ok(Command::Fps(60)));
    }
}
