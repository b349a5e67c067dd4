//! # beacon-daemon
//!
//! Scans for BLE beacons, debounces presence of paired devices and emits
//! automation triggers.
//!
//! ## Running
//!
//! ```bash
//! # Replay a capture (no Bluetooth hardware needed)
//! cargo run --package beacon-daemon -- --replay capture.jsonl discover
//!
//! # Live scanning on Linux
//! cargo run --package beacon-daemon --features bluetooth -- run
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use beacon_core::config::default_config_path;
use beacon_core::{BeaconError, IdentityKey, ProfileStore, ScanService};
use beacon_daemon::logging::{self, LogOptions};
use beacon_daemon::{load_config, open_source, Daemon, DaemonState, LogSink};
use clap::{Parser, Subcommand};
use tracing::{error, info};

/// BLE beacon presence daemon
#[derive(Parser)]
#[command(name = "beacon-daemon", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Replay scan cycles from a JSON-lines capture instead of scanning
    #[arg(long, env = "BEACON_REPLAY")]
    replay: Option<PathBuf>,

    /// Append fired triggers to this JSON-lines file
    #[arg(long, env = "BEACON_TRIGGERS_FILE")]
    triggers_file: Option<PathBuf>,

    /// Production logging (JSON files plus compact stdout)
    #[arg(long, env = "BEACON_PRODUCTION")]
    production: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan continuously and track paired devices (default)
    Run,
    /// List nearby devices that can be paired
    Discover,
    /// Pair a discovered device
    Pair {
        /// Identity as printed by `discover`
        identity: IdentityKey,
    },
    /// Remove a paired device
    Unpair {
        /// Identity of the paired device
        identity: IdentityKey,
    },
    /// Re-read a paired device's metadata and update its stored profile
    Refresh {
        /// Identity of the paired device
        identity: IdentityKey,
    },
    /// List paired devices
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&LogOptions::from_config(&config.logging, cli.production)) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let state = match DaemonState::open(&config_path, config) {
        Ok(state) => state,
        Err(e) => {
            error!("fatal: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli, state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, mut state: DaemonState) -> anyhow::Result<()> {
    let replay = cli.replay.as_deref();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let sink = match &cli.triggers_file {
                Some(path) => LogSink::with_file(path)
                    .with_context(|| format!("opening {}", path.display()))?,
                None => LogSink::new(),
            };
            let source = open_source(replay).await?;
            let mut daemon = Daemon::new(state, source, Box::new(sink));
            daemon.run(shutdown_signal()).await;
            Ok(())
        }
        Command::Discover => {
            let mut service = ScanService::new(&state.config().scan);
            let source = open_source(replay).await?;
            let candidates = service
                .discover(source.as_ref(), &state.registry().paired_identities())
                .await?;
            for candidate in candidates {
                println!("{}\t{}", candidate.identity, candidate.name);
            }
            Ok(())
        }
        Command::Pair { identity } => {
            let mut service = ScanService::new(&state.config().scan);
            let source = open_source(replay).await?;
            let candidates = service
                .discover(source.as_ref(), &state.registry().paired_identities())
                .await?;
            let metadata = candidates
                .into_iter()
                .find(|candidate| candidate.identity == identity)
                .ok_or_else(|| BeaconError::DeviceNotFound(identity.to_string()))?;
            let device = state.registry_mut().pair(&metadata)?;
            println!("{}", serde_json::to_string_pretty(device)?);
            Ok(())
        }
        Command::Unpair { identity } => {
            let device = state.registry_mut().unpair(&identity)?;
            info!(device = %device.name, "Removed");
            Ok(())
        }
        Command::Refresh { identity } => refresh(&mut state, replay, &identity).await,
        Command::List => {
            for device in state.registry().devices() {
                let detected = device
                    .detected
                    .map_or("unknown", |detected| if detected { "present" } else { "absent" });
                println!("{}\t{}\t{detected}", device.identity, device.name);
            }
            Ok(())
        }
    }
}

async fn refresh(
    state: &mut DaemonState,
    replay: Option<&Path>,
    identity: &IdentityKey,
) -> anyhow::Result<()> {
    let stored = state
        .registry()
        .stored_profile(identity)
        .ok_or_else(|| BeaconError::DeviceNotPaired(identity.to_string()))?;

    let mut service = ScanService::new(&state.config().scan);
    let source = open_source(replay).await?;
    let delta = service
        .discover_and_refresh(source.as_ref(), identity, &stored)
        .await?;

    if delta.changed {
        state.registry_mut().apply_profile_delta(identity, &delta)?;
    }
    println!("{}", serde_json::to_string_pretty(&delta)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
