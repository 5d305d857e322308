//! Per-session log file.
//!
//! Each update or rollback writes `<tool>/logs/<epoch-ms>.log` with lines of
//! the form `[<RFC3339>] [<LEVEL>] <message>`. Each write returns the
//! formatted line so the session record can keep it.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Severity of a run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunLevel {
    Info,
    Warn,
    Error,
}

impl RunLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunLevel::Info => "INFO",
            RunLevel::Warn => "WARN",
            RunLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for RunLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only session log.
#[derive(Debug)]
pub struct RunLog {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl RunLog {
    /// Open a new log file in `dir`, named after the current epoch milliseconds.
    ///
    /// If the file cannot be created the log degrades to memory only.
    pub fn open(dir: &Path) -> Self {
        let name = format!("{}.log", Utc::now().timestamp_millis());
        let path = dir.join(name);
        let file = fs::create_dir_all(dir).and_then(|_| {
            OpenOptions::new().create(true).append(true).open(&path)
        });
        match file {
            Ok(file) => Self {
                path: Some(path),
                file: Some(file),
            },
            Err(e) => {
                warn!(
                    target: "update.log_unavailable",
                    path = %path.display(),
                    error = %e,
                    "Session log file unavailable, continuing without one"
                );
                Self::in_memory()
            }
        }
    }

    /// A log that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a line and return its formatted text.
    pub fn write(&mut self, level: RunLevel, message: &str) -> String {
        let line = format!(
            "[{}] [{}] {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message
        );
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!(target: "update.log_write_failed", error = %e, "Session log write failed");
                self.file = None;
            }
        }
        line
    }

    pub fn info(&mut self, message: &str) -> String {
        self.write(RunLevel::Info, message)
    }
}
