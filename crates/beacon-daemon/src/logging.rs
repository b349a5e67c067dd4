//! Logging initialization and configuration.
//!
//! - **Production**: JSON logs to daily rolling files in the configured log
//!   directory, plus compact logs to stdout for the journal
//! - **Development**: pretty logs to stdout with span events
//!
//! The filter comes from `RUST_LOG`, then `BEACON_LOG_LEVEL`, then `logging.level`
//! in the config file, then `info`. A bare level applies to the beacon crates;
//! everything else (BlueZ bindings, D-Bus) stays at `warn`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use beacon_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the fallback log level.
pub const LOG_LEVEL_ENV: &str = "BEACON_LOG_LEVEL";

const DEFAULT_LEVEL: &str = "info";
const DEPENDENCY_LEVEL: &str = "warn";
const CRATE_TARGETS: [&str; 2] = ["beacon_core", "beacon_daemon"];
const LOG_FILE_PREFIX: &str = "beacon-daemon";

/// Keep the non-blocking writers alive for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Resolved logging options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// JSON files plus compact stdout instead of pretty stdout.
    pub production: bool,

    /// Level or directive from the config file.
    pub level: Option<String>,

    /// Directory for rolling log files.
    pub directory: PathBuf,
}

impl LogOptions {
    /// Options from the `[logging]` config section.
    #[must_use]
    pub fn from_config(config: &LoggingConfig, production: bool) -> Self {
        Self {
            production,
            level: config.level.clone(),
            directory: config
                .directory
                .clone()
                .unwrap_or_else(default_log_directory),
        }
    }
}

/// Initialize the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid or the log directory cannot be
/// created.
pub fn init(options: &LogOptions) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directives = fallback_directives(options.level.as_deref());
            EnvFilter::try_new(&directives)
                .with_context(|| format!("invalid log filter '{directives}'"))?
        }
    };

    if options.production {
        init_production(filter, &options.directory)
    } else {
        init_development(filter);
        Ok(())
    }
}

/// Filter used when `RUST_LOG` is unset: `BEACON_LOG_LEVEL`, then `configured`.
#[must_use]
pub fn fallback_directives(configured: Option<&str>) -> String {
    let from_env = std::env::var(LOG_LEVEL_ENV).ok();
    filter_directives(from_env.as_deref(), configured)
}

/// Build a filter from a level, or pass a full directive string through.
#[must_use]
pub fn filter_directives(level_env: Option<&str>, configured: Option<&str>) -> String {
    let level = [level_env, configured]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|level| !level.is_empty())
        .unwrap_or(DEFAULT_LEVEL);

    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }

    std::iter::once(DEPENDENCY_LEVEL.to_string())
        .chain(CRATE_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn init_production(filter: EnvFilter, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // journald adds its own timestamps
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_writer(stdout_writer)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
    Ok(())
}

fn init_development(filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .init();
}

/// Platform log directory: `/var/log/beacon` on Linux.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/beacon")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
