// SPDX-License-Identifier: GPL-3.0-only

//! v4l2loopback output device
//!
//! Format is set with `VIDIOC_S_FMT`/`VIDIOC_S_PARM` on the output queue, frames are
//! pushed with plain non-blocking `write(2)` in planar YU12.

use super::SinkOutput;
use crate::errors::{SinkError, SinkResult};
use std::io;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use v4l::capability::Flags;
use v4l::video::Output;
use v4l::video::output::Parameters;
use v4l::{Device, Format, FourCC};

/// Loopback device opened for writing
pub struct LoopbackOutput {
    path: PathBuf,
    device: Option<Device>,
}

impl LoopbackOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            device: None,
        }
    }
}

impl SinkOutput for LoopbackOutput {
    fn open(&mut self) -> SinkResult<()> {
        if self.device.is_some() {
            return Ok(());
        }

        let path = self.path.display().to_string();
        let dev = Device::with_path(&self.path).map_err(|e| SinkError::OpenFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        match dev.query_caps() {
            Ok(caps) => {
                if !caps.capabilities.contains(Flags::VIDEO_OUTPUT) {
                    warn!(path = %path, driver = %caps.driver, "Sink does not advertise video output");
                }
                info!(path = %path, card = %caps.card, "Virtual camera opened");
            }
            Err(e) => debug!(path = %path, error = %e, "Cannot query sink capabilities"),
        }

        self.device = Some(dev);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn set_format(&mut self, width: u32, height: u32, fps: u32) -> SinkResult<()> {
        let dev = self.device.as_ref().ok_or(SinkError::NotOpen)?;

        let request = Format::new(width, height, FourCC::new(b"YU12"));
        let actual = Output::set_format(dev, &request)
            .map_err(|e| SinkError::FormatRejected(e.to_string()))?;
        if actual.width != width || actual.height != height || actual.fourcc != request.fourcc {
            return Err(SinkError::FormatRejected(format!(
                "asked for {}x{} YU12, device kept {}x{} {}",
                width, height, actual.width, actual.height, actual.fourcc
            )));
        }

        if let Err(e) = Output::set_params(dev, &Parameters::with_fps(fps)) {
            debug!(fps, error = %e, "Sink rejected frame interval");
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> SinkResult<()> {
        let dev = self.device.as_ref().ok_or(SinkError::NotOpen)?;
        let fd = dev.handle().fd();
        // SAFETY: fd belongs to the open device and data is a valid slice
        let rc = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        check_written(rc, data.len())
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            info!(path = %self.path.display(), "Virtual camera closed");
        }
    }
}

/// A loopback device consumes a frame in one write; anything less is a torn frame
fn check_written(rc: isize, expected: usize) -> SinkResult<()> {
    if rc < 0 {
        return Err(SinkError::Io(io::Error::last_os_error()));
    }
    if rc as usize != expected {
        return Err(SinkError::Io(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {} of {} bytes", rc, expected),
        )));
    }
    Ok(())
}
