//! Trigger output.
//!
//! The daemon has no automation host to hand triggers to, so [`LogSink`] records
//! them: one structured log line each, and optionally one JSON line each in a file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use beacon_core::{BeaconError, EventSink, Trigger};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

#[derive(Serialize)]
struct TriggerRecord<'a> {
    at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    trigger: &'a Trigger,
}

/// Sink that logs every trigger and optionally appends it to a JSON-lines file.
#[derive(Debug, Default)]
pub struct LogSink {
    file: Option<(PathBuf, Mutex<File>)>,
}

impl LogSink {
    /// Log triggers only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log triggers and append them to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for appending.
    pub fn with_file(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some((path.to_path_buf(), Mutex::new(file))),
        })
    }
}

impl EventSink for LogSink {
    fn emit(&self, trigger: &Trigger) -> beacon_core::Result<()> {
        info!(trigger = trigger.name, scope = ?trigger.scope, tokens = %trigger.tokens, "Trigger fired");

        let Some((path, file)) = &self.file else {
            return Ok(());
        };

        let failed = |message: String| BeaconError::TriggerFailed {
            name: trigger.name.to_string(),
            message,
        };

        let record = TriggerRecord {
            at: Utc::now(),
            trigger,
        };
        let line = serde_json::to_string(&record).map_err(|e| failed(e.to_string()))?;

        let mut file = file
            .lock()
            .map_err(|_| failed(format!("{} writer poisoned", path.display())))?;
        writeln!(file, "{line}").map_err(|e| failed(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}
