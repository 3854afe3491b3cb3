// SPDX-License-Identifier: GPL-3.0-only

//! Relay loop
//!
//! Drives Capture -> Effect -> Sink on a single thread and owns every device
//! handle. Each iteration snapshots the demand signals from [`SharedState`] and
//! moves between three capture states:
//!
//! ```text
//!            need_camera                 open ok
//!   IDLE ───────────────► OPENING ───────────────► ACTIVE
//!    ▲                     │   ▲ ▲                    │
//!    │       !need_camera  │   │ └── open failed      │ device/geometry change,
//!    ├─────────────────────┘   │     (retry)          │ repeated read failures
//!    │                         └──────────────────────┤
//!    └────────────────────────────────────────────────┘ !need_camera
//! ```
//!
//! While idle the sink gets a placeholder frame about once per second and the
//! engine is never called.

use crate::capture::CaptureSource;
use crate::constants::timing;
use crate::effects::{EffectEngine, EffectParams};
use crate::errors::should_log_failure;
use crate::frame::VideoFrame;
use crate::overlay::Overlay;
use crate::preview::PreviewSink;
use crate::sink::VirtualSink;
use crate::state::{Demand, SharedState};
use image::RgbImage;
use image::imageops::{self, FilterType};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sleep granularity while waiting, so shutdown is noticed promptly
const NAP_SLICE: Duration = Duration::from_millis(50);

/// Pacing of the relay loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTiming {
    /// Sleep between idle iterations
    pub idle_tick: Duration,
    /// Minimum spacing between placeholder writes
    pub placeholder_interval: Duration,
    /// Back-off after a failed capture open
    pub open_retry: Duration,
    /// Back-off after a failed frame read
    pub read_retry: Duration,
}

impl Default for RelayTiming {
    fn default() -> Self {
        Self {
            idle_tick: timing::IDLE_TICK,
            placeholder_interval: timing::PLACEHOLDER_INTERVAL,
            open_retry: timing::OPEN_RETRY,
            read_retry: timing::READ_RETRY,
        }
    }
}

/// Capture lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Camera not needed, device closed
    Idle,
    /// Camera needed but not open yet (first attempt, retry or reopen pending)
    Opening,
    /// Frames flowing
    Active,
}

/// What a single iteration did; decides how long to wait before the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nobody needs the camera
    Idle,
    /// Camera wanted but could not be opened
    OpenFailed,
    /// Capture torn down after a device or geometry change
    Reconfigured,
    /// Capture open but no frame this time
    ReadFailed,
    /// A frame went through the pipeline
    Relayed,
}

/// Selected background, decoded once and rescaled to the capture size
#[derive(Debug, Default)]
struct BackgroundCache {
    source: Option<RgbImage>,
    scaled: Option<RgbImage>,
}

impl BackgroundCache {
    fn load(&mut self, path: &Path, size: Option<(u32, u32)>) {
        match image::open(path) {
            Ok(img) => {
                info!(path = %path.display(), width = img.width(), height = img.height(), "Background loaded");
                self.source = Some(img.to_rgb8());
                self.scaled = None;
                if let Some(size) = size {
                    self.fit(size);
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot load background");
                self.source = None;
                self.scaled = None;
            }
        }
    }

    fn fit(&mut self, (width, height): (u32, u32)) {
        let Some(source) = &self.source else {
            return;
        };
        if self.scaled.as_ref().is_some_and(|s| s.dimensions() == (width, height)) {
            return;
        }
        self.scaled = Some(if source.dimensions() == (width, height) {
            source.clone()
        } else {
            imageops::resize(source, width, height, FilterType::Triangle)
        });
    }

    fn get(&self) -> Option<&RgbImage> {
        self.scaled.as_ref()
    }
}

/// The orchestrator
pub struct RelayLoop<E: EffectEngine> {
    state: Arc<SharedState>,
    capture: CaptureSource,
    sink: VirtualSink,
    engine: E,
    buffers: Option<E::Buffers>,
    preview: Box<dyn PreviewSink>,
    overlay: Overlay,
    background: BackgroundCache,
    timing: RelayTiming,
    capture_state: CaptureState,
    prev_need: Option<bool>,
    last_placeholder: Option<Instant>,
    preview_live: bool,
    open_failures: u64,
    engine_failures: u64,
    frames_relayed: u64,
}

impl<E: EffectEngine> RelayLoop<E> {
    pub fn new(
        state: Arc<SharedState>,
        capture: CaptureSource,
        sink: VirtualSink,
        engine: E,
        preview: Box<dyn PreviewSink>,
        timing: RelayTiming,
    ) -> Self {
        Self {
            state,
            capture,
            sink,
            engine,
            buffers: None,
            preview,
            overlay: Overlay::new(),
            background: BackgroundCache::default(),
            timing,
            capture_state: CaptureState::Idle,
            prev_need: None,
            last_placeholder: None,
            preview_live: false,
            open_failures: 0,
            engine_failures: 0,
            frames_relayed: 0,
        }
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture_state
    }

    pub fn capture(&self) -> &CaptureSource {
        &self.capture
    }

    pub fn sink(&self) -> &VirtualSink {
        &self.sink
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Geometry of the currently allocated engine buffers
    pub fn buffer_size(&self) -> Option<(u32, u32)> {
        self.buffers.as_ref().map(E::buffer_size)
    }

    pub fn frames_relayed(&self) -> u64 {
        self.frames_relayed
    }

    /// Open the virtual camera and show the placeholder straight away
    pub fn start(&mut self) {
        let settings = self.state.camera_settings();
        if let Err(e) = self.sink.open(settings.width, settings.height, settings.fps) {
            warn!(error = %e, "Virtual camera unavailable, will retry while idle");
        }
        self.write_placeholder(true);
    }

    /// Run until shutdown is requested
    pub fn run(&mut self) {
        info!("Relay loop started");
        self.start();
        while self.state.is_running() {
            let pause = match self.step() {
                StepOutcome::Idle => self.timing.idle_tick,
                StepOutcome::OpenFailed => self.timing.open_retry,
                StepOutcome::ReadFailed => self.timing.read_retry,
                StepOutcome::Reconfigured | StepOutcome::Relayed => Duration::ZERO,
            };
            self.nap(pause);
        }
        self.shutdown();
    }

    fn nap(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.state.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(NAP_SLICE));
        }
    }

    /// Release every device handle
    pub fn shutdown(&mut self) {
        self.capture.close();
        self.capture_state = CaptureState::Idle;
        self.clear_preview();
        self.sink.close();
        info!(frames = self.frames_relayed, "Relay loop stopped");
    }

    /// One iteration of the relay; never sleeps
    pub fn step(&mut self) -> StepOutcome {
        let demand = self.state.demand();
        let need = demand.need_camera();
        if self.prev_need != Some(need) {
            info!(
                need_camera = need,
                consumers = demand.consumers,
                window_visible = demand.window_visible,
                vcam_enabled = demand.vcam_enabled,
                "Camera demand changed"
            );
            self.prev_need = Some(need);
        }

        if !need {
            if self.capture.is_open() || self.capture_state != CaptureState::Idle {
                self.go_idle();
                self.write_placeholder(true);
            } else {
                self.write_placeholder(false);
            }
            return StepOutcome::Idle;
        }

        if !self.capture.is_open() {
            if let Err(outcome) = self.activate(&demand) {
                return outcome;
            }
        }

        // Both flags are consumed even if the first one is set
        let device_changed = self.state.take_device_change();
        let settings_changed = self.state.take_camera_settings_change();
        if device_changed || settings_changed {
            info!(device_changed, settings_changed, "Capture configuration changed, reopening");
            self.capture.close();
            self.buffers = None;
            self.capture_state = CaptureState::Opening;
            return StepOutcome::Reconfigured;
        }

        if let Some(path) = self.state.take_background_change() {
            self.background.load(&path, self.capture.geometry());
        }

        let frame = match self.capture.read_frame() {
            Ok(frame) => frame,
            Err(_) => {
                if !self.capture.is_open() {
                    self.capture_state = CaptureState::Opening;
                }
                // Readers must not see a frozen device while reads keep timing out
                self.write_placeholder(false);
                return StepOutcome::ReadFailed;
            }
        };

        let output = self.apply_effect(&frame);

        if demand.vcam_enabled {
            self.sink.write_frame(&output);
        } else {
            self.write_placeholder(false);
        }

        self.overlay.record_frame(frame.captured_at);
        if demand.window_visible {
            self.show_preview(output, demand.vcam_enabled);
        } else {
            self.clear_preview();
        }

        self.frames_relayed += 1;
        StepOutcome::Relayed
    }

    /// IDLE -> OPENING -> ACTIVE
    fn activate(&mut self, demand: &Demand) -> Result<(), StepOutcome> {
        self.capture_state = CaptureState::Opening;

        // Opening uses the current values, so pending changes are already applied
        self.state.take_device_change();
        self.state.take_camera_settings_change();
        let device = self.state.input_device();
        let settings = self.state.camera_settings();

        let (width, height) = match self.capture.open(device.as_deref(), settings) {
            Ok(geometry) => geometry,
            Err(e) => {
                self.open_failures += 1;
                if should_log_failure(self.open_failures) {
                    warn!(
                        device = ?device,
                        error = %e,
                        attempts = self.open_failures,
                        "Cannot open capture device"
                    );
                }
                self.write_placeholder(false);
                return Err(StepOutcome::OpenFailed);
            }
        };
        self.open_failures = 0;

        if self.buffer_size() != Some((width, height)) {
            self.buffers = None;
            match self.engine.allocate(width, height) {
                Ok(buffers) => {
                    debug!(width, height, "Effect buffers allocated");
                    self.buffers = Some(buffers);
                }
                Err(e) => warn!(width, height, error = %e, "Effect buffers unavailable, passing frames through"),
            }
        }

        if let Err(e) = self.sink.open(width, height, settings.fps) {
            debug!(error = %e, "Virtual camera not available at activation");
        }
        self.background.fit((width, height));
        self.overlay.reset();

        self.capture_state = CaptureState::Active;
        info!(
            width,
            height,
            fps = settings.fps,
            consumers = demand.consumers,
            "Relay active"
        );
        Ok(())
    }

    /// ACTIVE -> IDLE; engine buffers are kept for the next activation
    fn go_idle(&mut self) {
        self.capture.close();
        self.capture_state = CaptureState::Idle;
        self.clear_preview();
        self.overlay.reset();
        info!(frames = self.frames_relayed, "Relay idle");
    }

    fn apply_effect(&mut self, frame: &VideoFrame) -> RgbImage {
        let mode = self.state.effect_mode();
        if !mode.needs_engine() {
            return frame.image.clone();
        }
        let Some(buffers) = self.buffers.as_mut() else {
            return frame.image.clone();
        };

        let params = EffectParams {
            blur_strength: self.state.blur_strength(),
            background: self.background.get(),
        };
        match self.engine.process(&frame.image, mode, &params, buffers) {
            Ok(out) => out,
            Err(e) => {
                self.engine_failures += 1;
                if should_log_failure(self.engine_failures) {
                    warn!(
                        mode = %mode,
                        error = %e,
                        failures = self.engine_failures,
                        "Effect failed, passing frame through"
                    );
                }
                frame.image.clone()
            }
        }
    }

    fn write_placeholder(&mut self, force: bool) {
        let due = self
            .last_placeholder
            .is_none_or(|t| t.elapsed() >= self.timing.placeholder_interval);
        if force || due {
            self.sink.write_idle_placeholder();
            self.last_placeholder = Some(Instant::now());
        }
    }

    fn show_preview(&mut self, mut image: RgbImage, vcam_enabled: bool) {
        if self.state.overlay_enabled() {
            let vcam_live = vcam_enabled && self.sink.is_open();
            self.overlay
                .draw(&mut image, self.state.effect_mode(), vcam_live);
        }
        self.preview.show(&image);
        self.preview_live = true;
    }

    fn clear_preview(&mut self) {
        if self.preview_live {
            self.preview.clear();
            self.preview_live = false;
        }
    }
}
