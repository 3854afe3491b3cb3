// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera sink
//!
//! The sink is opened once at startup and stays open for the life of the process,
//! so readers never see the device disappear. Its format follows the frames it is
//! given; when the device refuses a new format the sink keeps writing at the
//! geometry it already has.
//!
//! ```text
//! RGB24 frame ──► [renegotiate if size changed] ──► [scale if rejected]
//!                                                        │
//!                                                        ▼
//!                                              I420 ──► write(2) ──► readers
//! ```

pub mod loopback;
pub mod placeholder;

pub use loopback::LoopbackOutput;

use crate::constants::defaults;
use crate::errors::{SinkError, SinkResult, should_log_failure};
use crate::frame::rgb_to_i420;
use image::RgbImage;
use image::imageops::{self, FilterType};
use tracing::{debug, info, warn};

/// Device-level operations of a video output
pub trait SinkOutput: Send {
    fn open(&mut self) -> SinkResult<()>;

    fn is_open(&self) -> bool;

    /// Negotiate planar I420 at the given geometry
    fn set_format(&mut self, width: u32, height: u32, fps: u32) -> SinkResult<()>;

    /// Write one complete I420 frame without blocking
    fn write(&mut self, data: &[u8]) -> SinkResult<()>;

    fn close(&mut self);
}

/// Format currently in effect on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Cached placeholder, already converted
struct Placeholder {
    width: u32,
    height: u32,
    i420: Vec<u8>,
}

/// Virtual camera with format tracking and idle placeholder
pub struct VirtualSink {
    output: Box<dyn SinkOutput>,
    negotiated: Option<SinkFormat>,
    /// Last format the device refused; not retried until something else is asked for
    rejected: Option<SinkFormat>,
    placeholder: Option<Placeholder>,
    frames_written: u64,
    write_failures: u64,
}

impl VirtualSink {
    pub fn new(output: Box<dyn SinkOutput>) -> Self {
        Self {
            output,
            negotiated: None,
            rejected: None,
            placeholder: None,
            frames_written: 0,
            write_failures: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.output.is_open()
    }

    pub fn negotiated(&self) -> Option<SinkFormat> {
        self.negotiated
    }

    /// Frames handed to the device successfully (placeholders included)
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Open the device and make sure it runs at `width`x`height`@`fps`
    ///
    /// Idempotent. A rejected format change is logged and the previous geometry
    /// stays in effect; only a failure to open the device at all is an error.
    pub fn open(&mut self, width: u32, height: u32, fps: u32) -> SinkResult<()> {
        if !self.output.is_open() {
            self.output.open()?;
            self.negotiated = None;
            self.rejected = None;
        }

        let wanted = SinkFormat { width, height, fps };
        if self.negotiated == Some(wanted) || self.rejected == Some(wanted) {
            return Ok(());
        }

        match self.output.set_format(width, height, fps) {
            Ok(()) => {
                info!(
                    width,
                    height,
                    fps,
                    previous = ?self.negotiated,
                    "Virtual camera format negotiated"
                );
                self.negotiated = Some(wanted);
                self.rejected = None;
            }
            Err(e) => {
                self.rejected = Some(wanted);
                warn!(
                    width,
                    height,
                    fps,
                    current = ?self.negotiated,
                    error = %e,
                    "Virtual camera kept its previous format"
                );
            }
        }
        Ok(())
    }

    /// Convert and write one frame, renegotiating first if its size changed
    ///
    /// Failures are counted and logged at a low rate but never propagated; a slow
    /// or vanished reader must not stall the relay.
    pub fn write_frame(&mut self, frame: &RgbImage) {
        let (width, height) = frame.dimensions();
        let size_changed = self
            .negotiated
            .is_none_or(|f| f.width != width || f.height != height);
        if size_changed || !self.output.is_open() {
            let fps = self.negotiated.map_or(defaults::FPS, |f| f.fps);
            if let Err(e) = self.open(width, height, fps) {
                self.note_failure(&e);
                return;
            }
        }

        let data = match self.negotiated {
            Some(f) if f.width != width || f.height != height => {
                let scaled = imageops::resize(frame, f.width, f.height, FilterType::Triangle);
                rgb_to_i420(&scaled)
            }
            _ => rgb_to_i420(frame),
        };
        let result = self.output.write(&data);
        self.record(result);
    }

    /// Write the "camera off" frame at the current geometry
    ///
    /// Reopens the device first if it could not be opened earlier.
    pub fn write_idle_placeholder(&mut self) {
        if !self.output.is_open() {
            let (w, h, fps) = self
                .negotiated
                .map_or((defaults::WIDTH, defaults::HEIGHT, defaults::FPS), |f| {
                    (f.width, f.height, f.fps)
                });
            if let Err(e) = self.open(w, h, fps) {
                self.note_failure(&e);
                return;
            }
        }

        let (width, height) = self
            .negotiated
            .map_or((defaults::WIDTH, defaults::HEIGHT), |f| (f.width, f.height));

        let stale = self
            .placeholder
            .as_ref()
            .is_none_or(|p| p.width != width || p.height != height);
        if stale {
            debug!(width, height, "Rendering idle placeholder");
            self.placeholder = Some(Placeholder {
                width,
                height,
                i420: rgb_to_i420(&placeholder::render(width, height)),
            });
        }

        let result = match &self.placeholder {
            Some(p) => self.output.write(&p.i420),
            None => return,
        };
        self.record(result);
    }

    fn record(&mut self, result: SinkResult<()>) {
        match result {
            Ok(()) => self.frames_written += 1,
            Err(e) => self.note_failure(&e),
        }
    }

    fn note_failure(&mut self, e: &SinkError) {
        self.write_failures += 1;
        if should_log_failure(self.write_failures) {
            warn!(error = %e, failures = self.write_failures, "Virtual camera write failed");
        }
    }

    /// Release the device
    pub fn close(&mut self) {
        self.output.close();
        self.negotiated = None;
        self.rejected = None;
    }
}
