//! Engine process entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ostinato_core::EngineConfig;
use ostinato_engine::engine::{Engine, EngineOptions};

#[derive(Parser, Debug)]
#[command(name = "ostinato-engine", about = "Ostinato engine scheduler")]
struct Cli {
    /// Control socket path for the primary track's host.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Plugin path handed to the host with `--plugin`.
    #[arg(long)]
    plugin: Option<PathBuf>,

    /// Connect to an externally started host instead of spawning one.
    #[arg(long)]
    no_spawn: bool,

    /// Exit after this many seconds instead of running until killed.
    #[arg(long)]
    run_seconds: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("OSTINATO_LOG")
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut options = EngineOptions::from_env();
    options.socket_override = cli.socket;
    options.plugin_path = cli.plugin;
    options.no_spawn = cli.no_spawn;
    options.run_seconds = cli.run_seconds;

    let run_seconds = options.run_seconds;
    let engine = match Engine::start(EngineConfig::default(), options) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "engine setup failed");
            return ExitCode::from(1);
        }
    };

    match run_seconds {
        Some(seconds) => {
            info!(seconds, "running for a fixed duration");
            std::thread::sleep(std::time::Duration::from_secs(seconds));
        }
        None => {
            // Run until killed; threads exit when `running` clears.
            loop {
                std::thread::sleep(std::time::Duration::from_secs(1));
                if !engine.shared.running.get() {
                    break;
                }
            }
        }
    }

    engine.stop();
    ExitCode::SUCCESS
}
