// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles shared by the integration tests

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vfx_relay::capture::{CaptureBackend, CaptureSource, CaptureStream};
use vfx_relay::effects::{EffectEngine, EffectParams, PerfMode, check_geometry};
use vfx_relay::errors::{CaptureError, CaptureResult, EffectError, InitError, SinkError, SinkResult};
use vfx_relay::frame::{VideoFrame, rgb_to_i420};
use vfx_relay::preview::PreviewSink;
use vfx_relay::relay::{RelayLoop, RelayTiming};
use vfx_relay::sink::{SinkOutput, VirtualSink, placeholder};
use vfx_relay::state::{CameraSettings, EffectMode, InitialState, SharedState};

/// Frame every mock camera produces: a gradient that never resembles the placeholder
pub fn test_pattern(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            180,
        ])
    })
}

/// What the engine double turns a frame into
pub fn inverted(image: &RgbImage) -> RgbImage {
    let mut out = image.clone();
    image::imageops::invert(&mut out);
    out
}

pub fn placeholder_i420(width: u32, height: u32) -> Vec<u8> {
    rgb_to_i420(&placeholder::render(width, height))
}

/// Observable state of the mock camera
#[derive(Debug, Default)]
pub struct CameraLog {
    pub opens: usize,
    pub open_now: bool,
    pub last_path: Option<String>,
    pub last_request: Option<CameraSettings>,
    pub frames: usize,
}

/// Knobs and log of the mock camera, shared with the test
#[derive(Clone, Default)]
pub struct CameraHandle {
    pub log: Arc<Mutex<CameraLog>>,
    pub unavailable: Arc<AtomicBool>,
    pub failing_reads: Arc<AtomicBool>,
    pub frame_delay: Arc<Mutex<Option<Duration>>>,
}

impl CameraHandle {
    pub fn opens(&self) -> usize {
        self.log.lock().unwrap().opens
    }

    pub fn is_open(&self) -> bool {
        self.log.lock().unwrap().open_now
    }

    pub fn frames(&self) -> usize {
        self.log.lock().unwrap().frames
    }

    pub fn last_path(&self) -> Option<String> {
        self.log.lock().unwrap().last_path.clone()
    }

    pub fn last_request(&self) -> Option<CameraSettings> {
        self.log.lock().unwrap().last_request
    }
}

pub struct MockCaptureBackend {
    handle: CameraHandle,
}

impl MockCaptureBackend {
    pub fn new() -> (Self, CameraHandle) {
        let handle = CameraHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

struct MockStream {
    handle: CameraHandle,
    width: u32,
    height: u32,
}

impl CaptureStream for MockStream {
    fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_frame(&mut self) -> CaptureResult<VideoFrame> {
        let delay = *self.handle.frame_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.handle.failing_reads.load(Ordering::SeqCst) {
            return Err(CaptureError::EmptyFrame);
        }
        self.handle.log.lock().unwrap().frames += 1;
        Ok(VideoFrame::new(test_pattern(self.width, self.height)))
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.handle.log.lock().unwrap().open_now = false;
    }
}

impl CaptureBackend for MockCaptureBackend {
    fn open(
        &mut self,
        path: &str,
        request: CameraSettings,
    ) -> CaptureResult<Box<dyn CaptureStream>> {
        if self.handle.unavailable.load(Ordering::SeqCst) {
            return Err(CaptureError::OpenFailed {
                path: path.to_string(),
                reason: "busy".to_string(),
            });
        }
        let mut log = self.handle.log.lock().unwrap();
        log.opens += 1;
        log.open_now = true;
        log.last_path = Some(path.to_string());
        log.last_request = Some(request);
        Ok(Box::new(MockStream {
            handle: self.handle.clone(),
            width: request.width,
            height: request.height,
        }))
    }

    fn probe(&mut self, _path: &str) -> bool {
        !self.handle.unavailable.load(Ordering::SeqCst)
    }
}

/// Observable state of the mock virtual camera
#[derive(Debug, Default)]
pub struct SinkLog {
    pub open: bool,
    pub opens: usize,
    pub formats: Vec<(u32, u32, u32)>,
    pub writes: usize,
    pub last_write: Option<Vec<u8>>,
    pub reject_formats: bool,
}

#[derive(Clone, Default)]
pub struct SinkHandle {
    pub log: Arc<Mutex<SinkLog>>,
}

impl SinkHandle {
    pub fn writes(&self) -> usize {
        self.log.lock().unwrap().writes
    }

    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.log.lock().unwrap().last_write.clone()
    }

    pub fn formats(&self) -> Vec<(u32, u32, u32)> {
        self.log.lock().unwrap().formats.clone()
    }
}

pub struct MockSinkOutput {
    handle: SinkHandle,
}

impl MockSinkOutput {
    pub fn new() -> (Self, SinkHandle) {
        let handle = SinkHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl SinkOutput for MockSinkOutput {
    fn open(&mut self) -> SinkResult<()> {
        let mut log = self.handle.log.lock().unwrap();
        log.open = true;
        log.opens += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.log.lock().unwrap().open
    }

    fn set_format(&mut self, width: u32, height: u32, fps: u32) -> SinkResult<()> {
        let mut log = self.handle.log.lock().unwrap();
        if log.reject_formats && !log.formats.is_empty() {
            return Err(SinkError::FormatRejected(format!("{}x{} busy", width, height)));
        }
        log.formats.push((width, height, fps));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> SinkResult<()> {
        let mut log = self.handle.log.lock().unwrap();
        if !log.open {
            return Err(SinkError::NotOpen);
        }
        log.writes += 1;
        log.last_write = Some(data.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.handle.log.lock().unwrap().open = false;
    }
}

/// Counters of the engine double
#[derive(Clone, Default)]
pub struct EngineHandle {
    pub allocations: Arc<AtomicUsize>,
    pub process_calls: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    /// Background handed to each `process` call
    pub backgrounds: Arc<Mutex<Vec<Option<RgbImage>>>>,
}

impl EngineHandle {
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    pub fn last_background(&self) -> Option<RgbImage> {
        self.backgrounds.lock().unwrap().last().cloned().flatten()
    }

    pub fn background_sizes(&self) -> Vec<Option<(u32, u32)>> {
        self.backgrounds
            .lock()
            .unwrap()
            .iter()
            .map(|bg| bg.as_ref().map(|img| img.dimensions()))
            .collect()
    }
}

/// Engine that inverts frames and counts what it is asked to do
#[derive(Default)]
pub struct CountingEngine {
    pub handle: EngineHandle,
}

impl EffectEngine for CountingEngine {
    type Buffers = (u32, u32);

    fn init(_model_dir: Option<&Path>, _perf_mode: PerfMode) -> Result<Self, InitError> {
        Ok(Self::default())
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<Self::Buffers, EffectError> {
        self.handle.allocations.fetch_add(1, Ordering::SeqCst);
        Ok((width, height))
    }

    fn buffer_size(buffers: &Self::Buffers) -> (u32, u32) {
        *buffers
    }

    fn process(
        &mut self,
        frame: &RgbImage,
        _mode: EffectMode,
        params: &EffectParams<'_>,
        buffers: &mut Self::Buffers,
    ) -> Result<RgbImage, EffectError> {
        self.handle.process_calls.fetch_add(1, Ordering::SeqCst);
        self.handle
            .backgrounds
            .lock()
            .unwrap()
            .push(params.background.cloned());
        check_geometry(frame, *buffers)?;
        if self.handle.fail.load(Ordering::SeqCst) {
            return Err(EffectError::Inference("simulated failure".to_string()));
        }
        Ok(inverted(frame))
    }
}

/// Log of the preview double
#[derive(Debug, Default)]
pub struct PreviewLog {
    pub shown: usize,
    pub cleared: usize,
    pub last: Option<RgbImage>,
}

#[derive(Clone, Default)]
pub struct RecordingPreview {
    pub log: Arc<Mutex<PreviewLog>>,
}

impl PreviewSink for RecordingPreview {
    fn show(&mut self, frame: &RgbImage) {
        let mut log = self.log.lock().unwrap();
        log.shown += 1;
        log.last = Some(frame.clone());
    }

    fn clear(&mut self) {
        self.log.lock().unwrap().cleared += 1;
    }
}

/// Small frames keep the tests fast
pub const TEST_WIDTH: u32 = 64;
pub const TEST_HEIGHT: u32 = 48;

pub fn test_initial_state() -> InitialState {
    InitialState {
        effect_mode: EffectMode::Blur,
        blur_strength: 0.5,
        vcam_enabled: true,
        window_visible: false,
        overlay_enabled: false,
        consumers: 0,
        camera: CameraSettings {
            width: TEST_WIDTH,
            height: TEST_HEIGHT,
            fps: 30,
        },
        input_device: None,
    }
}

/// Relay timings that never wait
pub fn instant_timing() -> RelayTiming {
    RelayTiming {
        idle_tick: Duration::from_millis(1),
        placeholder_interval: Duration::ZERO,
        open_retry: Duration::from_millis(1),
        read_retry: Duration::from_millis(1),
    }
}

/// A relay wired to doubles, plus handles to inspect them
pub struct Harness {
    pub state: Arc<SharedState>,
    pub relay: RelayLoop<CountingEngine>,
    pub camera: CameraHandle,
    pub sink: SinkHandle,
    pub engine: EngineHandle,
    pub preview: RecordingPreview,
}

impl Harness {
    pub fn new(initial: InitialState) -> Self {
        Self::with_timing(initial, instant_timing())
    }

    pub fn with_timing(initial: InitialState, timing: RelayTiming) -> Self {
        let state = Arc::new(SharedState::new(initial));
        let (backend, camera) = MockCaptureBackend::new();
        let (output, sink) = MockSinkOutput::new();
        let engine = CountingEngine::default();
        let engine_handle = engine.handle.clone();
        let preview = RecordingPreview::default();

        let capture = CaptureSource::new(
            Box::new(backend),
            vec!["/dev/video0".to_string(), "/dev/video1".to_string()],
            "/dev/video10",
        );
        let relay = RelayLoop::new(
            Arc::clone(&state),
            capture,
            VirtualSink::new(Box::new(output)),
            engine,
            Box::new(preview.clone()),
            timing,
        );

        Self {
            state,
            relay,
            camera,
            sink,
            engine: engine_handle,
            preview,
        }
    }

    /// Apply control lines the way the control thread would
    pub fn send(&self, lines: &[&str]) {
        for line in lines {
            vfx_relay::control::handle_line(&self.state, line);
        }
    }
}
