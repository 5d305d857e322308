//! Update session state and mutual exclusion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use upd_common::{Error, Result, SessionId, StructuredError};

/// Step of the update state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    Idle,
    LocatingPackage,
    Extracting,
    ReadingVersion,
    ValidatingPackage,
    BackingUp,
    ProtectingUserData,
    ReplacingFiles,
    RestoringUserData,
    InstallingDependencies,
    Verifying,
    Completed,
    RollingBack,
    Failed,
}

/// Percent band of the installing step; installer hints move inside it.
pub const INSTALL_BAND: (u8, u8) = (70, 90);

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Idle => "idle",
            UpdateStatus::LocatingPackage => "locating-package",
            UpdateStatus::Extracting => "extracting",
            UpdateStatus::ReadingVersion => "reading-version",
            UpdateStatus::ValidatingPackage => "validating-package",
            UpdateStatus::BackingUp => "backing-up",
            UpdateStatus::ProtectingUserData => "protecting-user-data",
            UpdateStatus::ReplacingFiles => "replacing-files",
            UpdateStatus::RestoringUserData => "restoring-user-data",
            UpdateStatus::InstallingDependencies => "installing-dependencies",
            UpdateStatus::Verifying => "verifying",
            UpdateStatus::Completed => "completed",
            UpdateStatus::RollingBack => "rolling-back",
            UpdateStatus::Failed => "failed",
        }
    }

    /// Percent reported on entering this status. `None` means one point past
    /// the current value.
    pub fn base_percent(&self) -> Option<u8> {
        match self {
            UpdateStatus::Idle => Some(0),
            UpdateStatus::LocatingPackage => Some(2),
            UpdateStatus::Extracting => Some(5),
            UpdateStatus::ReadingVersion => Some(10),
            UpdateStatus::ValidatingPackage => Some(15),
            UpdateStatus::BackingUp => Some(20),
            UpdateStatus::ProtectingUserData => Some(35),
            UpdateStatus::ReplacingFiles => Some(45),
            UpdateStatus::RestoringUserData => Some(60),
            UpdateStatus::InstallingDependencies => Some(INSTALL_BAND.0),
            UpdateStatus::Verifying => Some(92),
            UpdateStatus::Completed => Some(100),
            UpdateStatus::RollingBack | UpdateStatus::Failed => None,
        }
    }

    /// Whether the live tree has not been touched yet, so aborting is safe.
    pub fn allows_cancel(&self) -> bool {
        matches!(
            self,
            UpdateStatus::Idle
                | UpdateStatus::LocatingPackage
                | UpdateStatus::Extracting
                | UpdateStatus::ReadingVersion
                | UpdateStatus::ValidatingPackage
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateStatus::Completed | UpdateStatus::Failed)
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a session does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Update,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub status: UpdateStatus,
    pub ts: DateTime<Utc>,
}

/// Record of one update or rollback run.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateSession {
    pub id: SessionId,
    pub kind: SessionKind,
    pub status: UpdateStatus,
    pub percent: u8,
    pub current_version: Option<String>,
    pub new_version: Option<String>,
    pub logs: Vec<String>,
    pub history: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub archive: Option<PathBuf>,
    pub backup: Option<String>,
    pub log_file: Option<PathBuf>,
    pub error: Option<StructuredError>,
}

impl UpdateSession {
    pub fn new(kind: SessionKind) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            kind,
            status: UpdateStatus::Idle,
            percent: 0,
            current_version: None,
            new_version: None,
            logs: Vec::new(),
            history: vec![StateTransition {
                status: UpdateStatus::Idle,
                ts: now,
            }],
            started_at: now,
            finished_at: None,
            archive: None,
            backup: None,
            log_file: None,
            error: None,
        }
    }

    /// Move to `status`, raising percent to its base value. Statuses without
    /// one advance by a single point.
    pub fn record_status(&mut self, status: UpdateStatus) {
        let now = Utc::now();
        self.status = status;
        match status.base_percent() {
            Some(base) => {
                self.raise_percent(base);
            }
            None => self.bump_percent(),
        }
        self.history.push(StateTransition { status, ts: now });
        if status.is_terminal() {
            self.finished_at = Some(now);
        }
    }

    /// Percent never decreases within a session. Returns whether it moved.
    pub fn raise_percent(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent > self.percent {
            self.percent = percent;
            true
        } else {
            false
        }
    }

    /// Advance by one point, staying below 100 until completion.
    pub fn bump_percent(&mut self) {
        let next = self.percent.saturating_add(1).min(99);
        self.raise_percent(next);
    }

    pub fn succeeded(&self) -> bool {
        self.status == UpdateStatus::Completed
    }

    pub fn fail(&mut self, err: &Error) {
        let step = self.last_active_step();
        self.error = Some(StructuredError::from(err).with_context("failed_step", step.as_str()));
        self.record_status(UpdateStatus::Failed);
    }

    /// Last non-terminal, non-rollback status reached.
    pub fn last_active_step(&self) -> UpdateStatus {
        self.history
            .iter()
            .rev()
            .map(|t| t.status)
            .find(|s| !s.is_terminal() && *s != UpdateStatus::RollingBack)
            .unwrap_or(UpdateStatus::Idle)
    }
}

/// Process-wide try-lock: at most one session runs at a time.
#[derive(Debug, Default)]
pub struct SessionLock {
    active: AtomicBool,
}

impl SessionLock {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    /// Acquire or fail immediately with `SessionBusy`.
    pub fn try_acquire(&self) -> Result<SessionGuard<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| SessionGuard { lock: self })
            .map_err(|_| Error::SessionBusy)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    lock: &'a SessionLock,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.lock.active.store(false, Ordering::Release);
    }
}
