// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the relay server
//!
//! Per-frame errors (`CaptureError`, `SinkError`, `EffectError`) are absorbed by the
//! relay loop. Only `InitError` and `ConfigError` surface as [`AppError`] and end the
//! process.

use crate::constants::FAILURE_LOG_EVERY;
use std::fmt;
use std::io;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Result type for virtual sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Whether the `count`-th occurrence of a per-frame failure should be logged
///
/// The first occurrence is always logged, then every `FAILURE_LOG_EVERY`th.
pub fn should_log_failure(count: u64) -> bool {
    count == 1 || count % FAILURE_LOG_EVERY == 0
}

/// Top-level error, returned from startup and mapped to an exit code
#[derive(Debug)]
pub enum AppError {
    /// Effect engine could not be initialized
    EngineInit(InitError),
    /// Invalid or unreadable configuration
    Config(ConfigError),
    /// Control pipe could not be created
    ControlChannel(String),
    /// Generic I/O failure during startup or shutdown
    Io(io::Error),
}

/// Capture device errors
#[derive(Debug)]
pub enum CaptureError {
    /// No usable capture device was found while probing
    NoDevice,
    /// Device exists but could not be opened (busy, permissions, gone)
    OpenFailed { path: String, reason: String },
    /// Device delivered a pixel format we cannot convert
    UnsupportedFormat(String),
    /// A single read returned nothing usable
    EmptyFrame,
    /// Capture is not open
    NotOpen,
    /// Underlying I/O error while reading
    Io(io::Error),
}

/// Virtual sink errors
#[derive(Debug)]
pub enum SinkError {
    /// Sink device could not be opened
    OpenFailed { path: String, reason: String },
    /// Format (geometry/fps) negotiation rejected by the device
    FormatRejected(String),
    /// Sink is not open
    NotOpen,
    /// Write failed
    Io(io::Error),
}

/// Per-frame effect failure; the relay passes the raw frame through
#[derive(Debug, Clone, PartialEq)]
pub enum EffectError {
    /// Frame geometry does not match the allocated buffers
    GeometryMismatch {
        frame: (u32, u32),
        buffers: (u32, u32),
    },
    /// Buffer allocation failed
    Allocation(String),
    /// Inference or compositing failed
    Inference(String),
}

/// Effect engine initialization failure (fatal)
#[derive(Debug, Clone, PartialEq)]
pub enum InitError {
    /// Configured model directory is missing or not a directory
    ModelDirectory(String),
    /// Model or tuning data could not be parsed
    InvalidModel(String),
}

/// Control command rejected by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Line does not match any known command
    Unknown(String),
    /// Known command with an unusable payload
    Malformed { command: &'static str, payload: String },
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read
    Read { path: String, reason: String },
    /// Config file is not valid JSON for [`crate::config::Config`]
    Parse { path: String, reason: String },
    /// A value is outside its accepted range
    Invalid(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::EngineInit(e) => write!(f, "Effect engine initialization failed: {}", e),
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::ControlChannel(msg) => write!(f, "Control channel error: {}", msg),
            AppError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NoDevice => write!(f, "No capture device found"),
            CaptureError::OpenFailed { path, reason } => {
                write!(f, "Cannot open capture device {}: {}", path, reason)
            }
            CaptureError::UnsupportedFormat(fourcc) => {
                write!(f, "Unsupported capture pixel format: {}", fourcc)
            }
            CaptureError::EmptyFrame => write!(f, "Empty frame"),
            CaptureError::NotOpen => write!(f, "Capture not open"),
            CaptureError::Io(e) => write!(f, "Capture I/O error: {}", e),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::OpenFailed { path, reason } => {
                write!(f, "Cannot open virtual camera {}: {}", path, reason)
            }
            SinkError::FormatRejected(msg) => write!(f, "Format rejected: {}", msg),
            SinkError::NotOpen => write!(f, "Virtual camera not open"),
            SinkError::Io(e) => write!(f, "Virtual camera I/O error: {}", e),
        }
    }
}

impl fmt::Display for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectError::GeometryMismatch { frame, buffers } => write!(
                f,
                "Frame {}x{} does not match buffers {}x{}",
                frame.0, frame.1, buffers.0, buffers.1
            ),
            EffectError::Allocation(msg) => write!(f, "Buffer allocation failed: {}", msg),
            EffectError::Inference(msg) => write!(f, "Inference failed: {}", msg),
        }
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::ModelDirectory(msg) => write!(f, "Model directory: {}", msg),
            InitError::InvalidModel(msg) => write!(f, "Invalid model data: {}", msg),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(line) => write!(f, "Unknown command: {:?}", line),
            CommandError::Malformed { command, payload } => {
                write!(f, "Malformed {} payload: {:?}", command, payload)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, reason } => write!(f, "Cannot read {}: {}", path, reason),
            ConfigError::Parse { path, reason } => write!(f, "Cannot parse {}: {}", path, reason),
            ConfigError::Invalid(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::EngineInit(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Io(e) => Some(e),
            AppError::ControlChannel(_) => None,
        }
    }
}
impl std::error::Error for CaptureError {}
impl std::error::Error for SinkError {}
impl std::error::Error for EffectError {}
impl std::error::Error for InitError {}
impl std::error::Error for CommandError {}
impl std::error::Error for ConfigError {}

impl From<InitError> for AppError {
    fn from(err: InitError) -> Self {
        AppError::EngineInit(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        CaptureError::Io(err)
    }
}

impl From<io::Error> for SinkError {
    fn from(err: io::Error) -> Self {
        SinkError::Io(err)
    }
}
