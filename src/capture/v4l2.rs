// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 capture backend
//!
//! Requests YUYV and falls back to MJPG. Frames come from a memory-mapped stream
//! and are converted to RGB24 on the relay thread.

use super::{CaptureBackend, CaptureStream};
use crate::constants::timing;
use crate::errors::{CaptureError, CaptureResult};
use crate::frame::{self, VideoFrame};
use crate::state::CameraSettings;
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream as _;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Device, Format, FourCC};
use tracing::{debug, info, warn};

const BUFFER_COUNT: u32 = 4;

/// Pixel layouts we can turn into RGB24
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Yuyv,
    Mjpg,
    Rgb3,
}

impl SourceFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(SourceFormat::Yuyv),
            b"MJPG" => Some(SourceFormat::Mjpg),
            b"RGB3" => Some(SourceFormat::Rgb3),
            _ => None,
        }
    }
}

fn open_failed(path: &str, e: impl std::fmt::Display) -> CaptureError {
    CaptureError::OpenFailed {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

/// Capture backend talking to `/dev/video*` nodes
#[derive(Debug, Default)]
pub struct V4l2Backend;

impl CaptureBackend for V4l2Backend {
    fn open(
        &mut self,
        path: &str,
        request: CameraSettings,
    ) -> CaptureResult<Box<dyn CaptureStream>> {
        V4l2Capture::open(path, request).map(|c| Box::new(c) as Box<dyn CaptureStream>)
    }

    fn probe(&mut self, path: &str) -> bool {
        let Ok(dev) = Device::with_path(path) else {
            return false;
        };
        match dev.query_caps() {
            Ok(caps) => {
                debug!(path, card = %caps.card, driver = %caps.driver, "Probed device");
                caps.capabilities.contains(Flags::VIDEO_CAPTURE)
            }
            Err(_) => false,
        }
    }
}

/// An open V4L2 capture stream
pub struct V4l2Capture {
    // Declared before `_device` so buffers are unmapped before the fd closes
    stream: MmapStream<'static>,
    _device: Device,
    format: SourceFormat,
    width: u32,
    height: u32,
}

impl V4l2Capture {
    pub fn open(path: &str, request: CameraSettings) -> CaptureResult<Self> {
        let dev = Device::with_path(path).map_err(|e| open_failed(path, e))?;

        let caps = dev.query_caps().map_err(|e| open_failed(path, e))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(open_failed(path, "not a capture device"));
        }

        let yuyv = Format::new(request.width, request.height, FourCC::new(b"YUYV"));
        let mut actual = dev.set_format(&yuyv).map_err(|e| open_failed(path, e))?;
        if SourceFormat::from_fourcc(actual.fourcc).is_none() {
            let mjpg = Format::new(request.width, request.height, FourCC::new(b"MJPG"));
            actual = dev.set_format(&mjpg).map_err(|e| open_failed(path, e))?;
        }
        let format = SourceFormat::from_fourcc(actual.fourcc)
            .ok_or_else(|| CaptureError::UnsupportedFormat(actual.fourcc.to_string()))?;

        if let Err(e) = dev.set_params(&Parameters::with_fps(request.fps)) {
            warn!(path, fps = request.fps, error = %e, "Device rejected frame rate");
        }

        let mut stream = MmapStream::with_buffers(&dev, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| open_failed(path, e))?;
        stream.set_timeout(timing::CAPTURE_READ_TIMEOUT);

        info!(
            path,
            card = %caps.card,
            width = actual.width,
            height = actual.height,
            fourcc = %actual.fourcc,
            "V4L2 capture configured"
        );

        Ok(Self {
            stream,
            _device: dev,
            format,
            width: actual.width,
            height: actual.height,
        })
    }
}

impl CaptureStream for V4l2Capture {
    fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_frame(&mut self) -> CaptureResult<VideoFrame> {
        let (buf, meta) = self.stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(CaptureError::EmptyFrame);
        }
        let data = &buf[..used];

        let image = match self.format {
            SourceFormat::Yuyv => frame::yuyv_to_rgb(data, self.width, self.height),
            SourceFormat::Rgb3 => frame::rgb3_to_rgb(data, self.width, self.height),
            SourceFormat::Mjpg => frame::mjpeg_to_rgb(data),
        };

        image.map(VideoFrame::new).ok_or(CaptureError::EmptyFrame)
    }
}
