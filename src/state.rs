// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide shared state
//!
//! One `Arc<SharedState>` is held by the control channel thread and the relay loop.
//! The control thread only sets values and raises dirty flags; the relay loop only
//! reads values and clears the flags it acted on. Scalars are atomics, each group of
//! related fields (device selection, background, camera geometry) has its own mutex.

use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Compositing behavior applied to captured frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EffectMode {
    /// Segmentation matte as a grey image
    Matte,
    /// Background dimmed, subject at full brightness
    Light,
    /// Subject over solid green
    Green,
    /// Subject over solid white
    White,
    /// Raw camera frames, engine bypassed
    None,
    /// Subject over the selected background image
    Background,
    /// Subject over a blurred copy of the frame
    #[default]
    Blur,
    /// Artifact reduction of the whole frame
    Denoise,
}

impl EffectMode {
    /// All modes in protocol ordinal order
    pub const ALL: [EffectMode; 8] = [
        EffectMode::Matte,
        EffectMode::Light,
        EffectMode::Green,
        EffectMode::White,
        EffectMode::None,
        EffectMode::Background,
        EffectMode::Blur,
        EffectMode::Denoise,
    ];

    /// Mode for a protocol ordinal (`MODE:<int>`)
    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Protocol ordinal of this mode
    pub fn ordinal(self) -> u8 {
        match self {
            EffectMode::Matte => 0,
            EffectMode::Light => 1,
            EffectMode::Green => 2,
            EffectMode::White => 3,
            EffectMode::None => 4,
            EffectMode::Background => 5,
            EffectMode::Blur => 6,
            EffectMode::Denoise => 7,
        }
    }

    /// Whether the effect engine has to run for this mode
    pub fn needs_engine(self) -> bool {
        self != EffectMode::None
    }

    /// Human readable name
    pub fn display_name(self) -> &'static str {
        match self {
            EffectMode::Matte => "Matte",
            EffectMode::Light => "Light",
            EffectMode::Green => "Green",
            EffectMode::White => "White",
            EffectMode::None => "Original",
            EffectMode::Background => "Background",
            EffectMode::Blur => "Blur",
            EffectMode::Denoise => "Denoise",
        }
    }
}

impl std::fmt::Display for EffectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Requested capture geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            fps: defaults::FPS,
        }
    }
}

/// Snapshot of the demand signals, taken once per relay iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Demand {
    pub consumers: u32,
    pub window_visible: bool,
    pub vcam_enabled: bool,
}

impl Demand {
    /// Whether the camera has to be capturing
    pub fn need_camera(&self) -> bool {
        self.window_visible || (self.vcam_enabled && self.consumers > 0)
    }
}

/// Initial values for a fresh [`SharedState`]
#[derive(Debug, Clone, PartialEq)]
pub struct InitialState {
    pub effect_mode: EffectMode,
    pub blur_strength: f32,
    pub vcam_enabled: bool,
    pub window_visible: bool,
    pub overlay_enabled: bool,
    pub consumers: u32,
    pub camera: CameraSettings,
    pub input_device: Option<String>,
}

impl Default for InitialState {
    fn default() -> Self {
        Self {
            effect_mode: EffectMode::default(),
            blur_strength: defaults::BLUR_STRENGTH,
            vcam_enabled: true,
            window_visible: false,
            overlay_enabled: false,
            consumers: 0,
            camera: CameraSettings::default(),
            input_device: None,
        }
    }
}

#[derive(Debug)]
struct CameraGroup {
    settings: CameraSettings,
    changed: bool,
}

#[derive(Debug)]
struct DeviceGroup {
    path: Option<String>,
    changed: bool,
}

#[derive(Debug, Default)]
struct BackgroundGroup {
    path: Option<PathBuf>,
    changed: bool,
}

/// Configuration and demand state shared between the control channel and relay loop
#[derive(Debug)]
pub struct SharedState {
    running: AtomicBool,
    effect_mode: AtomicU8,
    blur_bits: AtomicU32,
    vcam_enabled: AtomicBool,
    window_visible: AtomicBool,
    overlay_enabled: AtomicBool,
    consumers: AtomicU32,
    camera: Mutex<CameraGroup>,
    device: Mutex<DeviceGroup>,
    background: Mutex<BackgroundGroup>,
}

/// Lock a group, recovering the data if a previous holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(InitialState::default())
    }
}

impl SharedState {
    pub fn new(initial: InitialState) -> Self {
        Self {
            running: AtomicBool::new(true),
            effect_mode: AtomicU8::new(initial.effect_mode.ordinal()),
            blur_bits: AtomicU32::new(initial.blur_strength.clamp(0.0, 1.0).to_bits()),
            vcam_enabled: AtomicBool::new(initial.vcam_enabled),
            window_visible: AtomicBool::new(initial.window_visible),
            overlay_enabled: AtomicBool::new(initial.overlay_enabled),
            consumers: AtomicU32::new(initial.consumers),
            camera: Mutex::new(CameraGroup {
                settings: initial.camera,
                changed: false,
            }),
            device: Mutex::new(DeviceGroup {
                path: initial.input_device,
                changed: false,
            }),
            background: Mutex::new(BackgroundGroup::default()),
        }
    }

    // ===== Lifecycle =====

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask every loop to wind down
    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    // ===== Scalars =====

    pub fn effect_mode(&self) -> EffectMode {
        EffectMode::from_ordinal(i64::from(self.effect_mode.load(Ordering::Relaxed)))
            .unwrap_or_default()
    }

    pub fn set_effect_mode(&self, mode: EffectMode) {
        self.effect_mode.store(mode.ordinal(), Ordering::Relaxed);
    }

    pub fn blur_strength(&self) -> f32 {
        f32::from_bits(self.blur_bits.load(Ordering::Relaxed))
    }

    /// Store a blur strength, clamped to `[0, 1]`
    pub fn set_blur_strength(&self, strength: f32) {
        let strength = if strength.is_finite() {
            strength.clamp(0.0, 1.0)
        } else {
            defaults::BLUR_STRENGTH
        };
        self.blur_bits.store(strength.to_bits(), Ordering::Relaxed);
    }

    pub fn vcam_enabled(&self) -> bool {
        self.vcam_enabled.load(Ordering::Relaxed)
    }

    pub fn set_vcam_enabled(&self, enabled: bool) {
        self.vcam_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn window_visible(&self) -> bool {
        self.window_visible.load(Ordering::Relaxed)
    }

    pub fn set_window_visible(&self, visible: bool) {
        self.window_visible.store(visible, Ordering::Relaxed);
    }

    pub fn overlay_enabled(&self) -> bool {
        self.overlay_enabled.load(Ordering::Relaxed)
    }

    pub fn set_overlay_enabled(&self, enabled: bool) {
        self.overlay_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn consumers(&self) -> u32 {
        self.consumers.load(Ordering::Relaxed)
    }

    /// Store the consumer count, returning the previous value
    pub fn set_consumers(&self, count: u32) -> u32 {
        self.consumers.swap(count, Ordering::Relaxed)
    }

    /// Non-blocking snapshot of the activity signals
    pub fn demand(&self) -> Demand {
        Demand {
            consumers: self.consumers(),
            window_visible: self.window_visible(),
            vcam_enabled: self.vcam_enabled(),
        }
    }

    // ===== Camera geometry =====

    pub fn camera_settings(&self) -> CameraSettings {
        lock(&self.camera).settings
    }

    /// Request a capture resolution; raises the change flag only if it differs
    pub fn set_resolution(&self, width: u32, height: u32) -> bool {
        let mut group = lock(&self.camera);
        if group.settings.width == width && group.settings.height == height {
            return false;
        }
        group.settings.width = width;
        group.settings.height = height;
        group.changed = true;
        true
    }

    /// Request a capture frame rate; raises the change flag only if it differs
    pub fn set_fps(&self, fps: u32) -> bool {
        let mut group = lock(&self.camera);
        if group.settings.fps == fps {
            return false;
        }
        group.settings.fps = fps;
        group.changed = true;
        true
    }

    /// Consume the camera-settings dirty flag
    pub fn take_camera_settings_change(&self) -> bool {
        std::mem::take(&mut lock(&self.camera).changed)
    }

    // ===== Device selection =====

    pub fn input_device(&self) -> Option<String> {
        lock(&self.device).path.clone()
    }

    /// Select an input device (`None` = auto-detect); raises the flag only on change
    pub fn set_input_device(&self, path: Option<String>) -> bool {
        let mut group = lock(&self.device);
        if group.path == path {
            return false;
        }
        group.path = path;
        group.changed = true;
        true
    }

    /// Consume the device dirty flag
    pub fn take_device_change(&self) -> bool {
        std::mem::take(&mut lock(&self.device).changed)
    }

    // ===== Background =====

    pub fn set_background(&self, path: PathBuf) {
        let mut group = lock(&self.background);
        group.path = Some(path);
        group.changed = true;
    }

    /// Consume the background dirty flag, returning the path to load
    pub fn take_background_change(&self) -> Option<PathBuf> {
        let mut group = lock(&self.background);
        if !std::mem::take(&mut group.changed) {
            return None;
        }
        group.path.clone()
    }
}
