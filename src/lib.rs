// SPDX-License-Identifier: GPL-3.0-only

//! vfx-relay - webcam effects relay for a v4l2loopback virtual camera
//!
//! The server reads a physical camera, runs the selected effect over each frame
//! and writes the result into a v4l2loopback device that other applications open as
//! an ordinary camera. The physical camera is only held while someone needs it:
//! the control panel is visible, or the virtual camera is enabled and at least one
//! application has it open. Otherwise a placeholder frame keeps the virtual camera
//! alive.
//!
//! # Architecture
//!
//! - [`control`]: named-pipe command channel on its own thread
//! - [`state`]: values shared between the control thread and the relay
//! - [`relay`]: the idle/opening/active loop that owns every device
//! - [`capture`]: physical camera access (V4L2)
//! - [`effects`]: frame processing engine and compositing
//! - [`sink`]: virtual camera output and the idle placeholder
//! - [`preview`] and [`overlay`]: local preview for the control panel
//! - [`server`]: process startup and teardown

pub mod capture;
pub mod config;
pub mod constants;
pub mod control;
pub mod effects;
pub mod errors;
pub mod frame;
pub mod overlay;
pub mod preview;
pub mod relay;
pub mod server;
pub mod sink;
pub mod state;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use relay::{CaptureState, RelayLoop, StepOutcome};
pub use state::{EffectMode, SharedState};
