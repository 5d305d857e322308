//! Persisted layout of an install root.
//!
//! ```text
//! <root>/
//!   <tool_dir>/
//!     packages/    intake for release archives
//!     backups/     one directory per backup
//!     logs/        one file per session
//!     workspace/   scratch space for extraction and held user data
//! ```

use crate::config::UpdaterConfig;
use std::io;
use std::path::{Path, PathBuf};

pub const PACKAGES_DIR: &str = "packages";
pub const BACKUPS_DIR: &str = "backups";
pub const LOGS_DIR: &str = "logs";
pub const WORKSPACE_DIR: &str = "workspace";

/// Resolved paths for one install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
    tool_dir_name: String,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>, config: &UpdaterConfig) -> Self {
        Self {
            root: root.into(),
            tool_dir_name: config.tool_dir.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the tool directory as a top-level entry of the root.
    pub fn tool_dir_name(&self) -> &str {
        &self.tool_dir_name
    }

    pub fn tool_dir(&self) -> PathBuf {
        self.root.join(&self.tool_dir_name)
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.tool_dir().join(PACKAGES_DIR)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.tool_dir().join(BACKUPS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.tool_dir().join(LOGS_DIR)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.tool_dir().join(WORKSPACE_DIR)
    }

    /// Final path component of the root.
    ///
    /// A top-level entry with this name would be a nested copy of the
    /// install itself (`root/root`).
    pub fn self_alias(&self) -> Option<String> {
        let canonical = self.root.canonicalize().ok();
        canonical
            .as_deref()
            .unwrap_or(&self.root)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Create the tool directories if missing.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.packages_dir(),
            self.backups_dir(),
            self.logs_dir(),
            self.workspace_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
