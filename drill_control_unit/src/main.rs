//! Drill-station control binary.
//!
//! Loads the station configuration, resolves the GPIO backend, and runs
//! the control task until shutdown.
//!
//! # Usage
//!
//! ```bash
//! # Run against the in-process simulator
//! drill_control_unit --config config/station.toml
//!
//! # Force a backend, verbose logging
//! drill_control_unit --backend http -v
//! ```

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use drill_common::config::load_config;
use drill_control_unit::{AlwaysPermitted, ControlTask, LogDisplay};

#[derive(Debug, Parser)]
#[command(name = "drill_control_unit")]
#[command(version)]
#[command(about = "Drill-station control core")]
struct Args {
    /// Path to the station configuration.
    #[arg(long, default_value = "config/station.toml")]
    config: PathBuf,

    /// Override the configured GPIO backend (sim, http).
    #[arg(long)]
    backend: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    let mut config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), "config: {e}");
            process::exit(1);
        }
    };
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    info!(
        backend = %config.backend,
        modes = config.modes.len(),
        "station configured"
    );

    let (coordinator, handle) =
        match ControlTask::spawn(config, Box::new(AlwaysPermitted), Box::new(LogDisplay)) {
            Ok(started) => started,
            Err(e) => {
                error!("startup refused: {e}");
                process::exit(1);
            }
        };
    info!(snapshot = ?coordinator.snapshot(), "control task running");

    // The control task runs until a Shutdown command or a fatal fault.
    if handle.join().is_err() {
        error!("control task panicked");
        process::exit(1);
    }
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
