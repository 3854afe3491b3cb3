// SPDX-License-Identifier: GPL-3.0-only

//! Server process lifecycle
//!
//! Startup order: effect engine (fatal on failure), signal handler, control
//! channel thread, PID file, then the relay loop on the calling thread. On the way
//! out the control thread is joined and every file the server created is removed.

use crate::capture::{CaptureSource, V4l2Backend};
use crate::config::Config;
use crate::control::ControlChannel;
use crate::effects::{EffectEngine, SoftwareEngine};
use crate::errors::AppResult;
use crate::preview::{JpegPreviewWriter, PreviewSink};
use crate::relay::RelayLoop;
use crate::sink::{LoopbackOutput, VirtualSink};
use crate::state::SharedState;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// PID file removed again when dropped
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, format!("{}\n", std::process::id()))?;
        debug!(path = %path.display(), "PID file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        remove_if_present(&self.path);
    }
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Cannot remove file"),
    }
}

/// Run the server with the real devices until `QUIT` or a signal
pub fn run(config: &Config) -> AppResult<()> {
    info!(version = env!("GIT_VERSION"), "Starting vfx-relay");

    let engine = match SoftwareEngine::init(config.model_dir.as_deref(), config.perf_mode) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "Effect engine initialization failed");
            return Err(e.into());
        }
    };

    let state = Arc::new(SharedState::new(config.initial_state()));

    let signal_state = Arc::clone(&state);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Termination signal received");
        signal_state.request_shutdown();
    }) {
        warn!(error = %e, "Cannot install signal handler");
    }

    let capture = CaptureSource::new(
        Box::new(V4l2Backend),
        config.probe_candidates(),
        config.sink_device.clone(),
    );
    let sink = VirtualSink::new(Box::new(LoopbackOutput::new(config.sink_device.clone())));
    let preview: Box<dyn PreviewSink> = Box::new(JpegPreviewWriter::new(config.preview_file.clone()));

    let relay = RelayLoop::new(
        Arc::clone(&state),
        capture,
        sink,
        engine,
        preview,
        config.relay_timing(),
    );
    serve(config, state, relay)
}

/// Run an assembled relay with the control channel and PID file around it
///
/// Returns once shutdown has been requested and everything is released.
pub fn serve<E: EffectEngine>(
    config: &Config,
    state: Arc<SharedState>,
    mut relay: RelayLoop<E>,
) -> AppResult<()> {
    // A preview left behind by a crashed run would look live
    remove_if_present(&config.preview_file);

    let channel = ControlChannel::open(&config.control_pipe, Arc::clone(&state))?;
    let mut control = channel.spawn()?;

    let pid_file = match PidFile::create(&config.pid_file) {
        Ok(pid) => Some(pid),
        Err(e) => {
            warn!(path = %config.pid_file.display(), error = %e, "Cannot write PID file");
            None
        }
    };

    info!(
        pipe = %config.control_pipe.display(),
        sink = %config.sink_device.display(),
        "Server ready"
    );
    relay.run();

    state.request_shutdown();
    control.join();
    drop(pid_file);
    remove_if_present(&config.preview_file);

    info!("Server stopped");
    Ok(())
}
