//! Error types for the in-place updater.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Version Downgrade Rejected
//!   Reason: candidate version 1.0.0 is older than installed version 2.0.0
//!   Fix: Upload a release newer than the installed version.
//! ```
//!
//! # Rollback Outcomes
//!
//! Failures after a backup exists are wrapped so callers can tell the two
//! post-backup outcomes apart: [`Error::RolledBack`] (the live tree was
//! restored) and [`Error::RollbackFailed`] (manual intervention required).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for updater operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Release archive, structure and metadata errors.
    Package,
    /// Backup store and tree replacement errors.
    Filesystem,
    /// Dependency installation and post-update verification.
    Install,
    /// Rollback outcomes.
    Rollback,
    /// Session mutual exclusion and cancellation.
    Session,
    /// Configuration, I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Package => write!(f, "package"),
            ErrorCategory::Filesystem => write!(f, "filesystem"),
            ErrorCategory::Install => write!(f, "install"),
            ErrorCategory::Rollback => write!(f, "rollback"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Suggested actions for callers to take in response to errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation.
    Retry,
    /// Supply a different release archive.
    ReplacePackage,
    /// Run validation/check command.
    RunCheck,
    /// Wait for the running session to finish.
    Wait,
    /// Restart the service to pick up the new version.
    Restart,
    /// Abort the operation.
    Abort,
    /// Manual intervention required.
    ManualIntervention,
    /// No action needed (informational).
    None,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::ReplacePackage => write!(f, "replace_package"),
            SuggestedAction::RunCheck => write!(f, "run_check"),
            SuggestedAction::Wait => write!(f, "wait"),
            SuggestedAction::Restart => write!(f, "restart"),
            SuggestedAction::Abort => write!(f, "abort"),
            SuggestedAction::ManualIntervention => write!(f, "manual_intervention"),
            SuggestedAction::None => write!(f, "none"),
        }
    }
}

/// Unified error type for the updater.
#[derive(Error, Debug)]
pub enum Error {
    // Package errors (10-19)
    #[error("no release archive found in {dir}")]
    PackageNotFound { dir: String },

    #[error("release archive is corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("package structure invalid: {0}")]
    StructureInvalid(String),

    #[error("cannot read manifest {path}: {reason}")]
    MetadataUnreadable { path: String, reason: String },

    #[error("candidate version {candidate} is older than installed version {current}")]
    VersionDowngradeRejected { current: String, candidate: String },

    // Filesystem errors (20-29)
    #[error("backup failed: {0}")]
    BackupFailed(String),

    #[error("refusing to copy {src} into itself ({dest})")]
    RecursiveCopyRejected { src: String, dest: String },

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    // Install errors (30-39)
    #[error("dependency install failed (exit code {code:?}): {reason}")]
    DependencyInstallFailed { code: Option<i32>, reason: String },

    #[error("post-update verification failed: {0}")]
    PostUpdateVerificationFailed(String),

    // Rollback outcomes (40-49)
    #[error("update failed during {step}, previous version restored: {cause}")]
    RolledBack { step: String, cause: Box<Error> },

    #[error("update failed during {step} ({cause}) and rollback also failed: {rollback_error}")]
    RollbackFailed {
        step: String,
        cause: Box<Error>,
        rollback_error: String,
    },

    // Session errors (50-59)
    #[error("another update session is already running")]
    SessionBusy,

    #[error("update cancelled during {step}")]
    Cancelled { step: String },

    #[error("cannot cancel once {status} has begun")]
    CancelRejected { status: String },

    // Configuration and I/O errors (60-69)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Package errors
    /// - 20-29: Filesystem errors
    /// - 30-39: Install errors
    /// - 40-49: Rollback outcomes
    /// - 50-59: Session errors
    /// - 60-69: Configuration and I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::PackageNotFound { .. } => 10,
            Error::ArchiveCorrupt(_) => 11,
            Error::StructureInvalid(_) => 12,
            Error::MetadataUnreadable { .. } => 13,
            Error::VersionDowngradeRejected { .. } => 14,
            Error::BackupFailed(_) => 20,
            Error::RecursiveCopyRejected { .. } => 21,
            Error::BackupNotFound(_) => 22,
            Error::DependencyInstallFailed { .. } => 30,
            Error::PostUpdateVerificationFailed(_) => 31,
            Error::RolledBack { .. } => 40,
            Error::RollbackFailed { .. } => 41,
            Error::SessionBusy => 50,
            Error::Cancelled { .. } => 51,
            Error::CancelRejected { .. } => 52,
            Error::Config(_) => 60,
            Error::Io(_) => 61,
            Error::Json(_) => 62,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::PackageNotFound { .. }
            | Error::ArchiveCorrupt(_)
            | Error::StructureInvalid(_)
            | Error::MetadataUnreadable { .. }
            | Error::VersionDowngradeRejected { .. } => ErrorCategory::Package,

            Error::BackupFailed(_)
            | Error::RecursiveCopyRejected { .. }
            | Error::BackupNotFound(_) => ErrorCategory::Filesystem,

            Error::DependencyInstallFailed { .. } | Error::PostUpdateVerificationFailed(_) => {
                ErrorCategory::Install
            }

            Error::RolledBack { .. } | Error::RollbackFailed { .. } => ErrorCategory::Rollback,

            Error::SessionBusy | Error::Cancelled { .. } | Error::CancelRejected { .. } => {
                ErrorCategory::Session
            }

            Error::Config(_) | Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether the install is still in a working state after this error.
    ///
    /// Only a failed rollback leaves the live tree in an unknown state.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::RollbackFailed { .. })
    }

    /// Returns the suggested action for callers.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::PackageNotFound { .. } => SuggestedAction::ReplacePackage,
            Error::ArchiveCorrupt(_) => SuggestedAction::ReplacePackage,
            Error::StructureInvalid(_) => SuggestedAction::ReplacePackage,
            Error::MetadataUnreadable { .. } => SuggestedAction::ReplacePackage,
            Error::VersionDowngradeRejected { .. } => SuggestedAction::ReplacePackage,

            Error::BackupFailed(_) => SuggestedAction::Retry,
            Error::RecursiveCopyRejected { .. } => SuggestedAction::RunCheck,
            Error::BackupNotFound(_) => SuggestedAction::Abort,

            Error::DependencyInstallFailed { .. } => SuggestedAction::Retry,
            Error::PostUpdateVerificationFailed(_) => SuggestedAction::ReplacePackage,

            Error::RolledBack { .. } => SuggestedAction::Retry,
            Error::RollbackFailed { .. } => SuggestedAction::ManualIntervention,

            Error::SessionBusy => SuggestedAction::Wait,
            Error::Cancelled { .. } => SuggestedAction::None,
            Error::CancelRejected { .. } => SuggestedAction::Wait,

            Error::Config(_) => SuggestedAction::RunCheck,
            Error::Io(_) => SuggestedAction::Retry,
            Error::Json(_) => SuggestedAction::ManualIntervention,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::PackageNotFound { .. } => {
                "Place a release archive in the packages directory or pass its path explicitly."
            }
            Error::ArchiveCorrupt(_) => {
                "Re-download or re-upload the release archive; the current file cannot be unpacked."
            }
            Error::StructureInvalid(_) => {
                "The archive does not contain a complete release. Rebuild it with 'update-tool pack'."
            }
            Error::MetadataUnreadable { .. } => {
                "The release manifest is missing or malformed. Check it with 'update-tool check <archive>'."
            }
            Error::VersionDowngradeRejected { .. } => {
                "Upload a release newer than the installed version."
            }

            Error::BackupFailed(_) => {
                "Check free disk space and permissions on the backups directory, then retry. The live install was not modified."
            }
            Error::RecursiveCopyRejected { .. } => {
                "The destination lies inside the source tree. Check the configured tool directory."
            }
            Error::BackupNotFound(_) => "List available backups with 'update-tool backups'.",

            Error::DependencyInstallFailed { .. } => {
                "Check network access and the installer output in the session log, then retry."
            }
            Error::PostUpdateVerificationFailed(_) => {
                "The installed tree did not match the release. Inspect the session log and the archive."
            }

            Error::RolledBack { .. } => {
                "The previous version was restored. Fix the cause shown above and retry the update."
            }
            Error::RollbackFailed { .. } => {
                "The install may be inconsistent. Restore manually with 'update-tool rollback' or copy a backup directory back by hand."
            }

            Error::SessionBusy => "Wait for the running update to finish before starting another.",
            Error::Cancelled { .. } => "The update was cancelled before any change to the install.",
            Error::CancelRejected { .. } => {
                "Updates cannot be cancelled once the backup has started. Wait for completion."
            }

            Error::Config(_) => "Fix the updater configuration file or remove it to use defaults.",
            Error::Io(_) => "Check disk space and permissions, then retry the operation.",
            Error::Json(_) => "Invalid JSON in file. Check its syntax or restore it from a backup.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::PackageNotFound { .. } => "Package Not Found",
            Error::ArchiveCorrupt(_) => "Archive Corrupt",
            Error::StructureInvalid(_) => "Invalid Package Structure",
            Error::MetadataUnreadable { .. } => "Manifest Unreadable",
            Error::VersionDowngradeRejected { .. } => "Version Downgrade Rejected",
            Error::BackupFailed(_) => "Backup Failed",
            Error::RecursiveCopyRejected { .. } => "Recursive Copy Rejected",
            Error::BackupNotFound(_) => "Backup Not Found",
            Error::DependencyInstallFailed { .. } => "Dependency Install Failed",
            Error::PostUpdateVerificationFailed(_) => "Post-Update Verification Failed",
            Error::RolledBack { .. } => "Update Failed (Rolled Back)",
            Error::RollbackFailed { .. } => "Update and Rollback Failed",
            Error::SessionBusy => "Update Already Running",
            Error::Cancelled { .. } => "Update Cancelled",
            Error::CancelRejected { .. } => "Cancellation Rejected",
            Error::Config(_) => "Configuration Error",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }

    /// The underlying failure, looking through rollback wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::RolledBack { cause, .. } | Error::RollbackFailed { cause, .. } => {
                cause.root_cause()
            }
            other => other,
        }
    }

    /// Whether a rollback was attempted and restored the previous tree.
    pub fn was_rolled_back(&self) -> bool {
        matches!(self, Error::RolledBack { .. })
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the install is still in a known-good state.
    pub recoverable: bool,

    /// Suggested action for callers.
    pub suggested_action: SuggestedAction,

    /// Additional structured context (e.g., versions, step name).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::PackageNotFound { dir } => {
                context.insert("dir".to_string(), serde_json::json!(dir));
            }
            Error::VersionDowngradeRejected { current, candidate } => {
                context.insert("current_version".to_string(), serde_json::json!(current));
                context.insert("candidate_version".to_string(), serde_json::json!(candidate));
            }
            Error::DependencyInstallFailed { code, .. } => {
                context.insert("exit_code".to_string(), serde_json::json!(code));
            }
            Error::RolledBack { step, cause } => {
                context.insert("step".to_string(), serde_json::json!(step));
                context.insert("cause_code".to_string(), serde_json::json!(cause.code()));
            }
            Error::RollbackFailed {
                step,
                cause,
                rollback_error,
            } => {
                context.insert("step".to_string(), serde_json::json!(step));
                context.insert("cause_code".to_string(), serde_json::json!(cause.code()));
                context.insert(
                    "rollback_error".to_string(),
                    serde_json::json!(rollback_error),
                );
            }
            Error::Cancelled { step } => {
                context.insert("step".to_string(), serde_json::json!(step));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
///
/// Output format:
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}
