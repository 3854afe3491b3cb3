// SPDX-License-Identifier: GPL-3.0-only

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use vfx_relay::config::Config;
use vfx_relay::effects::PerfMode;

mod cli;

#[derive(Parser)]
#[command(name = "vfx-relay")]
#[command(about = "Webcam effects relay feeding a v4l2loopback virtual camera")]
#[command(version = env!("GIT_VERSION"))]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server (default)
    Run(RunArgs),

    /// Send control commands to a running server
    Send {
        /// Commands, one per argument (e.g. "MODE:2" "VCAM:on")
        #[arg(required = true)]
        commands: Vec<String>,

        /// Control pipe (default: from config)
        #[arg(long)]
        pipe: Option<PathBuf>,

        /// Config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List capture devices the relay would auto-detect
    Probe {
        /// Config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Config file (default: ~/.config/vfx-relay/config.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Effect engine model directory
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Favour frame rate over matte quality
    #[arg(short, long)]
    performance: bool,

    /// Engine mode: 0 = quality, 1 = performance
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    mode: Option<u8>,

    /// Capture device (default: auto-detect)
    #[arg(short, long)]
    device: Option<String>,

    /// v4l2loopback device to write to
    #[arg(long)]
    sink: Option<PathBuf>,

    /// Control pipe path
    #[arg(long)]
    pipe: Option<PathBuf>,

    /// Requested capture width
    #[arg(long)]
    width: Option<u32>,

    /// Requested capture height
    #[arg(long)]
    height: Option<u32>,

    /// Requested capture frame rate
    #[arg(long)]
    fps: Option<u32>,
}

impl RunArgs {
    /// Command-line flags win over the config file
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.model_dir {
            config.model_dir = Some(dir.clone());
        }
        if let Some(mode) = self.mode.and_then(PerfMode::from_index) {
            config.perf_mode = mode;
        }
        if self.performance {
            config.perf_mode = PerfMode::Performance;
        }
        if let Some(device) = &self.device {
            config.input_device = Some(device.clone());
        }
        if let Some(sink) = &self.sink {
            config.sink_device = sink.clone();
        }
        if let Some(pipe) = &self.pipe {
            config.control_pipe = pipe.clone();
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
    }

    fn load_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=vfx_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vfx_relay=info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Run(args)) => run_server(&args),
        Some(Commands::Send {
            commands,
            pipe,
            config,
        }) => Config::load(config.as_deref())
            .map_err(Into::into)
            .and_then(|c| cli::send(pipe.as_deref().unwrap_or(c.control_pipe.as_path()), &commands)),
        Some(Commands::Probe { config }) => Config::load(config.as_deref())
            .map_err(Into::into)
            .and_then(|c| cli::list_devices(&c)),
        None => run_server(&cli.run),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_server(args: &RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.load_config()?;
    vfx_relay::server::run(&config)?;
    Ok(())
}
