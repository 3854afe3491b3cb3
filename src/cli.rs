// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands besides running the server
//!
//! - Sending control commands to a running server
//! - Listing capture devices the relay would consider

use std::path::Path;
use vfx_relay::capture::{V4l2Backend, probe_devices};
use vfx_relay::config::Config;
use vfx_relay::control::{Command, send_commands};

/// Validate `commands` locally, then write them to the control pipe
pub fn send(pipe: &Path, commands: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if commands.is_empty() {
        return Err("no commands given".into());
    }
    for line in commands {
        Command::parse(line)?;
    }

    send_commands(pipe, commands)
        .map_err(|e| format!("Cannot write to {}: {} (is the server running?)", pipe.display(), e))?;

    println!("Sent {} command(s) to {}", commands.len(), pipe.display());
    Ok(())
}

/// Print the auto-detect candidates and which of them are capture devices
pub fn list_devices(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let usable = probe_devices(
        &mut V4l2Backend,
        &config.probe_candidates(),
        &config.sink_device,
    );

    println!("Virtual camera: {}", config.sink_device.display());
    if let Some(device) = &config.input_device {
        println!("Configured input: {}", device);
    }
    println!();

    if usable.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    println!("Capture devices (probe order):");
    for (index, path) in usable.iter().enumerate() {
        let marker = if index == 0 { " (auto-detect)" } else { "" };
        println!("  [{}] {}{}", index, path, marker);
    }
    Ok(())
}
