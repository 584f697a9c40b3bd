//! `weft` - validate configuration and run a fabric.
//!
//! Exit codes: 0 clean, 64 configuration error, 70 internal invariant
//! violation, 77 permission denied at startup, 130 interrupted.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use weft_config::load_config;
use weft_identity::MasterKey;
use weft_runtime::{Fabric, install_control_agent};
use weft_telemetry::{LogConfig, setup_logging};

const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 64;
const EXIT_INVARIANT: u8 = 70;
const EXIT_PERMISSION: u8 = 77;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "weft", about = "Low-latency authenticated agent fabric", version)]
struct Cli {
    /// Log filter, e.g. "info" or "weft_fabric=trace,info".
    #[arg(long, default_value = "info", env = "WEFT_LOG")]
    log: String,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate a config file, then exit.
    CheckConfig {
        /// Path to the TOML config.
        path: PathBuf,
    },
    /// Run a fabric until interrupted or shut down via the control agent.
    Run {
        /// Path to the TOML config.
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log = LogConfig {
        filter: cli.log.clone(),
        json: cli.log_json,
    };
    if let Err(err) = setup_logging(&log) {
        eprintln!("weft: logging setup failed: {err}");
        return ExitCode::from(EXIT_CONFIG);
    }

    match cli.command {
        Command::CheckConfig { path } => match load_config(&path) {
            Ok(_) => {
                info!(path = %path.display(), "configuration is valid");
                ExitCode::from(EXIT_OK)
            }
            Err(err) => {
                error!(%err, "configuration rejected");
                ExitCode::from(EXIT_CONFIG)
            }
        },
        Command::Run { path } => run(&path),
    }
}

fn run(path: &std::path::Path) -> ExitCode {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration rejected");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // A missing master key is a fatal invariant: the fabric cannot
    // authenticate anything without it.
    let master = match MasterKey::from_env() {
        Ok(master) => master,
        Err(err) => {
            error!(%err, "master key unavailable");
            return ExitCode::from(EXIT_INVARIANT);
        }
    };

    let workers = config.workers();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "tokio runtime construction failed");
            return ExitCode::from(EXIT_INVARIANT);
        }
    };

    runtime.block_on(async move {
        let fabric = match Fabric::start(config, master) {
            Ok(fabric) => fabric,
            Err(err) => {
                error!(%err, "fabric start failed");
                return ExitCode::from(EXIT_CONFIG);
            }
        };
        if let Err(err) = install_control_agent(&fabric) {
            error!(%err, "control agent install failed");
            fabric.shutdown().await;
            return ExitCode::from(EXIT_PERMISSION);
        }
        info!("fabric running; ctrl-c or control Shutdown to stop");

        let interrupted = tokio::select! {
            _ = tokio::signal::ctrl_c() => true,
            () = fabric.shutdown_requested() => false,
        };
        fabric.shutdown().await;

        if fabric.is_fatal() {
            ExitCode::from(EXIT_INVARIANT)
        } else if interrupted {
            ExitCode::from(EXIT_INTERRUPTED)
        } else {
            ExitCode::from(EXIT_OK)
        }
    })
}
