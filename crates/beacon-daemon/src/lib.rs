//! # beacon-daemon
//!
//! Reference collaborator for the beacon presence core.
//!
//! This library provides the scan loop, daemon state, trigger output and logging
//! setup used by the `beacon-daemon` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod daemon;
pub mod logging;
pub mod sink;
pub mod state;

pub use daemon::Daemon;
pub use sink::LogSink;
pub use state::{load_config, open_source, DaemonState};
