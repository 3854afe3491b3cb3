// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end run of the server with device doubles and a real control pipe

mod common;

use common::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vfx_relay::capture::CaptureSource;
use vfx_relay::config::{Config, TimingConfig};
use vfx_relay::control::send_commands;
use vfx_relay::frame::rgb_to_i420;
use vfx_relay::preview::NullPreview;
use vfx_relay::relay::RelayLoop;
use vfx_relay::server;
use vfx_relay::sink::VirtualSink;
use vfx_relay::state::SharedState;

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_full_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        control_pipe: dir.path().join("cmd.pipe"),
        pid_file: dir.path().join("server.pid"),
        preview_file: dir.path().join("preview.jpg"),
        width: TEST_WIDTH,
        height: TEST_HEIGHT,
        timing: TimingConfig {
            idle_tick_ms: 20,
            placeholder_interval_ms: 100,
            open_retry_ms: 20,
            read_retry_ms: 5,
        },
        ..Config::default()
    };

    let state = Arc::new(SharedState::new(config.initial_state()));
    let (backend, camera) = MockCaptureBackend::new();
    *camera.frame_delay.lock().unwrap() = Some(Duration::from_millis(5));
    let (output, sink) = MockSinkOutput::new();
    let engine = CountingEngine::default();

    let relay = RelayLoop::new(
        Arc::clone(&state),
        CaptureSource::new(Box::new(backend), config.probe_candidates(), &config.sink_device),
        VirtualSink::new(Box::new(output)),
        engine,
        Box::new(NullPreview),
        config.relay_timing(),
    );

    let server_config = config.clone();
    let server_state = Arc::clone(&state);
    let server = std::thread::spawn(move || server::serve(&server_config, server_state, relay));

    let placeholder = placeholder_i420(TEST_WIDTH, TEST_HEIGHT);
    let raw = rgb_to_i420(&test_pattern(TEST_WIDTH, TEST_HEIGHT));

    // Sink shows the placeholder before anyone asks for the camera
    assert!(wait_for(Duration::from_secs(1), || {
        sink.last_write().as_ref() == Some(&placeholder)
    }));
    assert!(wait_for(Duration::from_secs(1), || config.control_pipe.exists()
        && config.pid_file.exists()));
    assert_eq!(camera.opens(), 0);

    send_commands(&config.control_pipe, &["VCAM:on", "VCAM_CONSUMERS:1"]).unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        camera.is_open() && sink.last_write().is_some_and(|w| w != placeholder)
    }));

    send_commands(&config.control_pipe, &["MODE:4"]).unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        sink.last_write().as_ref() == Some(&raw)
    }));

    send_commands(&config.control_pipe, &["VCAM_CONSUMERS:0"]).unwrap();
    assert!(wait_for(Duration::from_secs(1), || {
        !camera.is_open() && sink.last_write().as_ref() == Some(&placeholder)
    }));

    send_commands(&config.control_pipe, &["QUIT"]).unwrap();
    server.join().unwrap().unwrap();

    assert!(!config.control_pipe.exists());
    assert!(!config.pid_file.exists());
    assert!(!sink.log.lock().unwrap().open);
}
