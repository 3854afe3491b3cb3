// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Named pipe the control channel listens on
pub const CONTROL_PIPE_PATH: &str = "/tmp/blucast/cmd.pipe";

/// PID file written while the server runs
pub const PID_FILE_PATH: &str = "/tmp/blucast/server.pid";

/// Latest processed frame for local preview (JPEG)
pub const PREVIEW_FILE_PATH: &str = "/tmp/blucast/preview.jpg";

/// Well-known v4l2loopback device the relay writes into
pub const VIRTUAL_CAMERA_DEVICE: &str = "/dev/video10";

/// Capture devices probed during auto-detection are `/dev/video{0..=PROBE_LAST_INDEX}`
pub const PROBE_LAST_INDEX: u32 = 9;

/// Name used for the config directory
pub const APP_DIR_NAME: &str = "vfx-relay";

/// Capture geometry limits accepted from the control channel
pub mod limits {
    /// Largest accepted capture width
    pub const MAX_WIDTH: u32 = 4096;
    /// Largest accepted capture height
    pub const MAX_HEIGHT: u32 = 2160;
    /// Accepted frame rate range
    pub const MIN_FPS: u32 = 1;
    pub const MAX_FPS: u32 = 120;
}

/// Default capture request and sink geometry
pub mod defaults {
    pub const WIDTH: u32 = 1280;
    pub const HEIGHT: u32 = 720;
    pub const FPS: u32 = 30;
    pub const BLUR_STRENGTH: f32 = 0.5;
}

/// Relay loop pacing
pub mod timing {
    use super::Duration;

    /// Sleep between iterations while idle
    pub const IDLE_TICK: Duration = Duration::from_millis(1000);

    /// Minimum spacing between idle placeholder writes
    pub const PLACEHOLDER_INTERVAL: Duration = Duration::from_millis(1000);

    /// Back-off after a failed capture open
    pub const OPEN_RETRY: Duration = Duration::from_millis(500);

    /// Back-off after an empty or failed frame read
    pub const READ_RETRY: Duration = Duration::from_millis(10);

    /// Control channel readiness poll timeout
    pub const CONTROL_POLL: Duration = Duration::from_millis(500);

    /// Back-off before reopening the control pipe after a failure
    pub const CONTROL_REOPEN: Duration = Duration::from_millis(200);

    /// Poll timeout for a single capture read
    pub const CAPTURE_READ_TIMEOUT: Duration = Duration::from_millis(1000);
}

/// Consecutive failed reads after which an open capture is torn down and reopened
pub const MAX_CONSECUTIVE_READ_FAILURES: u32 = 50;

/// Per-frame failures are logged once, then every this many occurrences
pub const FAILURE_LOG_EVERY: u64 = 300;

/// JPEG quality for the preview file
pub const PREVIEW_JPEG_QUALITY: u8 = 80;
