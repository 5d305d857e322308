//! The update state machine.
//!
//! ```text
//! idle → locating-package → extracting → reading-version → validating-package
//!      → backing-up → protecting-user-data → replacing-files
//!      → restoring-user-data → installing-dependencies → verifying → completed
//! ```
//!
//! Errors before a backup exists end the session in `failed` directly.
//! Errors after it trigger one restore attempt (`rolling-back → failed`);
//! the returned error says whether that restore worked.

use super::backup::{Backup, BackupManager};
use super::installer::{CommandInstaller, DependencyInstaller, StepHint};
use super::layout::InstallLayout;
use super::package::{locate_package, UpdatePackage, Workspace};
use super::protection::{ProtectedPath, ProtectionResolver};
use super::session::{SessionGuard, SessionKind, SessionLock, UpdateSession, UpdateStatus, INSTALL_BAND};
use super::tree::{self, ExclusionSet};
use super::validator::{PackageValidator, ValidationResult};
use super::version;
use crate::config::UpdaterConfig;
use crate::events::{event_names, NullEmitter, ProgressEmitter, ProgressEvent};
use crate::logging::{truncate_for_log, RunLevel, RunLog};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use upd_common::{Error, Result, SessionId};

/// How deep below the extraction directory the manifest is searched for.
pub const MAX_MANIFEST_DEPTH: usize = 6;

const MAX_TRACE_LINE: usize = 400;

/// Successful update outcome.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub session: UpdateSession,
    pub package: UpdatePackage,
    pub backup: Backup,
    pub validation: ValidationResult,
}

#[derive(Debug, Default)]
struct Shared {
    lock: SessionLock,
    cancel: AtomicBool,
    session: Mutex<Option<UpdateSession>>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Option<UpdateSession>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the session lock and install a fresh session under the same
    /// critical section, so a cancel request never sees the lock held by a
    /// run whose session is not there yet.
    fn start(&self, kind: SessionKind) -> Result<(SessionGuard<'_>, SessionId)> {
        let mut slot = self.session();
        let guard = self.lock.try_acquire()?;
        self.cancel.store(false, Ordering::Release);
        let session = UpdateSession::new(kind);
        let id = session.id.clone();
        *slot = Some(session);
        Ok((guard, id))
    }

    fn request_cancel(&self) -> Result<bool> {
        let guard = self.session();
        if !self.lock.is_active() {
            return Ok(false);
        }
        match guard.as_ref() {
            Some(session) if session.status.allows_cancel() => {
                self.cancel.store(true, Ordering::Release);
                info!(target: "update.cancel_requested", status = %session.status, "Cancellation requested");
                Ok(true)
            }
            Some(session) => Err(Error::CancelRejected {
                status: session.status.to_string(),
            }),
            // lock held through `try_acquire` alone: no session to stop
            None => Ok(false),
        }
    }
}

/// Cloneable handle for cancelling from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// See [`UpdateOrchestrator::request_cancel`].
    pub fn request(&self) -> Result<bool> {
        self.shared.request_cancel()
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultPoint {
    /// Fail before holding the protected path with this index.
    ProtectAfter(usize),
    /// Fail before putting back the held path with this index.
    ReinstateAfter(usize),
    /// Fail right after the live tree was cleared.
    ReplaceAfterDelete,
    /// Make the rollback restore fail as well.
    RestoreFails,
}

/// Drives update and rollback sessions for one install root.
pub struct UpdateOrchestrator {
    layout: InstallLayout,
    config: UpdaterConfig,
    validator: PackageValidator,
    protection: ProtectionResolver,
    backups: BackupManager,
    installer: Box<dyn DependencyInstaller>,
    emitter: Arc<dyn ProgressEmitter>,
    shared: Arc<Shared>,
    #[cfg(test)]
    faults: Mutex<Vec<FaultPoint>>,
}

impl UpdateOrchestrator {
    pub fn new(root: impl Into<PathBuf>, config: UpdaterConfig) -> Result<Self> {
        config.validate()?;
        let layout = InstallLayout::new(root, &config);

        let mut never_protect = vec![config.tool_dir.clone(), config.dependency_dir.clone()];
        if let Some(alias) = layout.self_alias() {
            never_protect.push(alias);
        }
        let protection = ProtectionResolver::new(&config.protected_patterns, never_protect)?;
        let backups = BackupManager::new(layout.backups_dir(), &config.backup_prefix, config.max_backups);

        Ok(Self {
            validator: PackageValidator::from_config(&config),
            installer: Box::new(CommandInstaller::from_config(&config.installer)),
            emitter: Arc::new(NullEmitter),
            shared: Arc::new(Shared::default()),
            layout,
            config,
            protection,
            backups,
            #[cfg(test)]
            faults: Mutex::new(Vec::new()),
        })
    }

    pub fn with_installer(mut self, installer: Box<dyn DependencyInstaller>) -> Self {
        self.installer = installer;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn ProgressEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Whether a session is running right now.
    pub fn is_busy(&self) -> bool {
        self.shared.lock.is_active()
    }

    /// Snapshot of the running or most recent session.
    pub fn last_session(&self) -> Option<UpdateSession> {
        self.shared.session().clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Ask the running session to stop at its next step boundary.
    ///
    /// Only possible before `backing-up` begins; afterwards the request is
    /// refused with `CancelRejected`. `Ok(false)` means nothing is running.
    pub fn request_cancel(&self) -> Result<bool> {
        self.shared.request_cancel()
    }

    /// Acquire the session lock or fail with `SessionBusy`.
    pub fn try_acquire(&self) -> Result<SessionGuard<'_>> {
        self.shared.lock.try_acquire()
    }

    // -- session bookkeeping -------------------------------------------------

    fn begin(&self, kind: SessionKind) -> Result<(SessionGuard<'_>, RunLog, SessionId)> {
        let (guard, id) = self.shared.start(kind)?;
        let log = RunLog::open(&self.layout.logs_dir());
        let event = self.with_session(|s| {
            s.log_file = log.path().map(Path::to_path_buf);
            snapshot_event(s, event_names::SESSION_STARTED, "Session started")
        });
        info!(target: "update.session_start", session = %id, kind = ?kind, "Session started");
        if let Some(event) = event {
            self.emitter.emit(event);
        }
        Ok((guard, log, id))
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut UpdateSession) -> R) -> Option<R> {
        self.shared.session().as_mut().map(f)
    }

    /// Transition to `status`; honours a pending cancellation first.
    fn enter(&self, log: &mut RunLog, status: UpdateStatus, message: &str) -> Result<()> {
        let event = {
            let mut guard = self.shared.session();
            let Some(session) = guard.as_mut() else {
                return Ok(());
            };
            if self.shared.cancel.load(Ordering::Acquire) && session.status.allows_cancel() {
                return Err(Error::Cancelled {
                    step: session.status.to_string(),
                });
            }
            session.record_status(status);
            session.logs.push(log.info(&format!("[{}] {}", status, message)));
            let name = if status == UpdateStatus::Completed {
                event_names::SESSION_COMPLETED
            } else {
                event_names::STATUS_CHANGED
            };
            snapshot_event(session, name, message)
        };
        info!(target: "update.step", status = %status, percent = event.percent, "{}", message);
        self.emitter.emit(event);
        Ok(())
    }

    fn note(&self, log: &mut RunLog, level: RunLevel, message: &str) {
        let line = log.write(level, message);
        self.with_session(|s| s.logs.push(line));
        match level {
            RunLevel::Info => info!(target: "update.log", "{}", message),
            RunLevel::Warn => warn!(target: "update.log", "{}", message),
            RunLevel::Error => error!(target: "update.log", "{}", message),
        }
    }

    /// Record one installer line. Each line moves percent at least one point
    /// inside the install band; once the band is used up lines only go to
    /// the session log.
    fn installer_line(&self, log: &mut RunLog, line: &str, hint: Option<StepHint>) {
        let level = match hint {
            Some(StepHint::Failed) => RunLevel::Error,
            Some(StepHint::Warning) => RunLevel::Warn,
            _ => RunLevel::Info,
        };
        let logged = log.write(level, &format!("installer: {}", line));
        let event = self
            .with_session(|session| {
                session.logs.push(logged);
                let (low, high) = INSTALL_BAND;
                let target = hint
                    .and_then(StepHint::progress_fraction)
                    .map(|fraction| (low as f32 + fraction * (high - low) as f32).round() as u8)
                    .unwrap_or(low);
                let next = target.max(session.percent.saturating_add(1)).min(high);
                session.raise_percent(next).then(|| {
                    snapshot_event(session, event_names::LOG, line).with_detail("hint", hint)
                })
            })
            .flatten();
        debug!(
            target: "update.install_line",
            hint = ?hint,
            "{}",
            truncate_for_log(line, MAX_TRACE_LINE)
        );
        if let Some(event) = event {
            self.emitter.emit(event);
        }
    }

    fn finish(&self, log: &mut RunLog, failure: Option<&Error>) -> Option<UpdateSession> {
        match failure {
            None => info!(target: "update.session_complete", "Session completed"),
            Some(err) => {
                let step = self
                    .with_session(|s| s.last_active_step())
                    .unwrap_or(UpdateStatus::Idle);
                self.note(log, RunLevel::Error, &format!("{} failed: {}", step, err));
                if let Some(path) = log.path().map(Path::to_path_buf) {
                    self.note(log, RunLevel::Error, &format!("log file: {}", path.display()));
                }
                let event = self.with_session(|s| {
                    s.fail(err);
                    snapshot_event(s, event_names::SESSION_FAILED, &err.to_string())
                        .with_detail("code", err.code())
                });
                error!(
                    target: "update.session_failed",
                    step = %step,
                    code = err.code(),
                    error = %err,
                    "Session failed"
                );
                if let Some(event) = event {
                    self.emitter.emit(event);
                }
            }
        }
        self.last_session()
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&self, point: FaultPoint) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).push(point);
    }

    #[cfg(test)]
    fn fault(&self, point: FaultPoint) -> Result<()> {
        let faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        if faults.contains(&point) {
            return Err(Error::Io(std::io::Error::other(format!("injected fault {:?}", point))));
        }
        Ok(())
    }

    // -- update --------------------------------------------------------------

    /// Run a full update from `archive`, or from the newest archive in the
    /// intake directory when `None`.
    pub fn run(&self, archive: Option<&Path>) -> Result<UpdateReport> {
        let (_guard, mut log, session_id) = self.begin(SessionKind::Update)?;

        let result = self
            .execute(&mut log, &session_id, archive)
            .and_then(|done| {
                self.enter(&mut log, UpdateStatus::Completed, "Update completed")?;
                Ok(done)
            });

        let session = self.finish(&mut log, result.as_ref().err());
        let (package, backup, validation) = result?;
        Ok(UpdateReport {
            session: session.unwrap_or_else(|| UpdateSession::new(SessionKind::Update)),
            package,
            backup,
            validation,
        })
    }

    fn execute(
        &self,
        log: &mut RunLog,
        session_id: &SessionId,
        archive: Option<&Path>,
    ) -> Result<(UpdatePackage, Backup, ValidationResult)> {
        let root = self.layout.root().to_path_buf();

        self.enter(log, UpdateStatus::LocatingPackage, "Locating release archive")?;
        self.layout.ensure()?;
        let archive_path = locate_package(
            archive,
            &self.layout.packages_dir(),
            &self.config.archive_extensions,
        )?;
        self.with_session(|s| s.archive = Some(archive_path.clone()));
        self.note(log, RunLevel::Info, &format!("archive: {}", archive_path.display()));

        self.enter(log, UpdateStatus::Extracting, "Extracting release archive")?;
        let workspace = Workspace::create(&self.layout.workspace_dir(), session_id.as_str())?;
        let summary = upd_archive::extract(&archive_path, &workspace.extract_dir())
            .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;
        self.note(
            log,
            RunLevel::Info,
            &format!("extracted {} files ({} bytes)", summary.files, summary.bytes),
        );
        let release_root = upd_archive::find_manifest_root(
            &workspace.extract_dir(),
            self.validator.manifest_file(),
            MAX_MANIFEST_DEPTH,
        )
        .ok_or_else(|| {
            Error::StructureInvalid(format!(
                "no {} found in archive",
                self.validator.manifest_file()
            ))
        })?;

        self.enter(log, UpdateStatus::ReadingVersion, "Reading installed version")?;
        let current_version = match self.validator.read_metadata(&root) {
            Ok(meta) => Some(meta.version),
            Err(e) => {
                self.note(log, RunLevel::Warn, &format!("installed version unknown: {}", e));
                None
            }
        };
        self.with_session(|s| s.current_version = current_version.clone());

        self.enter(log, UpdateStatus::ValidatingPackage, "Validating release")?;
        let validation =
            self.validator
                .validate_full(&archive_path, &release_root, current_version.as_deref());
        for warning in &validation.warnings {
            self.note(log, RunLevel::Warn, warning);
        }
        if let Some(err) = validation.to_error() {
            for issue in &validation.errors {
                self.note(log, RunLevel::Error, &issue.message);
            }
            return Err(err);
        }
        let candidate = validation
            .candidate_version()
            .map(str::to_string)
            .ok_or_else(|| Error::StructureInvalid("release manifest has no version".to_string()))?;
        self.with_session(|s| s.new_version = Some(candidate.clone()));

        let name_check = validation.metadata.name_check.clone();
        let package = UpdatePackage {
            path: archive_path.clone(),
            declared_version: name_check.as_ref().and_then(|n| n.version.clone()),
            product_name: name_check.and_then(|n| n.product_name),
            checksum: validation.metadata.checksum.clone().unwrap_or_default(),
        };

        self.enter(log, UpdateStatus::BackingUp, "Backing up current install")?;
        let backup = self.create_backup(log, &root, current_version.as_deref())?;

        if let Err(cause) = self.replace(log, &workspace, &release_root, &candidate) {
            let step = self
                .with_session(|s| s.status)
                .unwrap_or(UpdateStatus::Idle);
            return Err(self.roll_back(log, &backup, step, cause));
        }

        drop(workspace);
        Ok((package, backup, validation))
    }

    fn create_backup(&self, log: &mut RunLog, root: &Path, current: Option<&str>) -> Result<Backup> {
        let mut exclude = vec![self.config.tool_dir.clone()];
        if let Some(alias) = self.layout.self_alias() {
            exclude.push(alias);
        }

        let backup = self
            .backups
            .create(root, current.unwrap_or("unknown"), &exclude)
            .map_err(|e| Error::BackupFailed(e.to_string()))?;
        match self.backups.verify(&backup) {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::BackupFailed(format!(
                    "backup {} does not match the live tree",
                    backup.name()
                )))
            }
            Err(e) => return Err(Error::BackupFailed(e.to_string())),
        }
        self.with_session(|s| s.backup = Some(backup.name().to_string()));
        self.note(
            log,
            RunLevel::Info,
            &format!(
                "backup {} ({} files, {} bytes)",
                backup.name(),
                backup.metadata.file_count,
                backup.metadata.size_on_disk
            ),
        );

        match self.backups.prune_to_retention() {
            Ok(removed) if !removed.is_empty() => self.note(
                log,
                RunLevel::Info,
                &format!("pruned {} old backup(s)", removed.len()),
            ),
            Ok(_) => {}
            Err(e) => self.note(log, RunLevel::Warn, &format!("backup pruning failed: {}", e)),
        }
        Ok(backup)
    }

    /// Every destructive step. Any error here is answered with a rollback.
    fn replace(
        &self,
        log: &mut RunLog,
        workspace: &Workspace,
        release_root: &Path,
        candidate: &str,
    ) -> Result<()> {
        let root = self.layout.root();

        self.enter(log, UpdateStatus::ProtectingUserData, "Holding user data aside")?;
        let protected = self.protection.resolve(root)?;
        let hold = workspace.hold_dir();
        for (_index, path) in protected.iter().enumerate() {
            #[cfg(test)]
            self.fault(FaultPoint::ProtectAfter(_index))?;
            tree::copy_entry(&path.under(root), &path.under(&hold), &ExclusionSet::new())?;
        }
        self.note(
            log,
            RunLevel::Info,
            &format!("held {} protected path(s)", protected.len()),
        );

        self.enter(log, UpdateStatus::ReplacingFiles, "Replacing application files")?;
        let keep = ExclusionSet::new().top_level([
            self.config.tool_dir.clone(),
            self.config.dependency_dir.clone(),
        ]);
        let removed = tree::delete_tree(root, &keep)?;
        #[cfg(test)]
        self.fault(FaultPoint::ReplaceAfterDelete)?;
        let incoming = ExclusionSet::new()
            .top_level([
                self.config.tool_dir.clone(),
                self.config.dependency_dir.clone(),
            ])
            .paths(self.config.user_data_markers.iter().map(PathBuf::from));
        let stats = tree::copy_tree(release_root, root, &incoming)?;
        self.note(
            log,
            RunLevel::Info,
            &format!(
                "removed {} entries, copied {} files ({} bytes)",
                removed, stats.files, stats.bytes
            ),
        );

        self.enter(log, UpdateStatus::RestoringUserData, "Restoring user data")?;
        self.reinstate(&protected, &hold, root)?;

        self.enter(
            log,
            UpdateStatus::InstallingDependencies,
            &format!("Running {}", self.installer.describe()),
        )?;
        let described = self.installer.describe();
        let outcome = {
            let mut on_line = |line: &str, hint: Option<StepHint>| self.installer_line(log, line, hint);
            self.installer.install(root, &mut on_line)
        }
        .map_err(|e| Error::DependencyInstallFailed {
            code: None,
            reason: format!("cannot run {}: {}", described, e),
        })?;
        if !outcome.success() {
            return Err(Error::DependencyInstallFailed {
                code: outcome.exit_code,
                reason: outcome.failure_reason(),
            });
        }

        self.enter(log, UpdateStatus::Verifying, "Verifying installed release")?;
        self.verify_live(candidate)
    }

    fn reinstate(&self, protected: &[ProtectedPath], hold: &Path, root: &Path) -> Result<()> {
        for (_index, path) in protected.iter().enumerate() {
            let held = path.under(hold);
            let live = path.under(root);
            if std::fs::symlink_metadata(&live).is_ok() {
                tree::remove_entry(&live)?;
            }
            #[cfg(test)]
            self.fault(FaultPoint::ReinstateAfter(_index))?;
            tree::copy_entry(&held, &live, &ExclusionSet::new())?;
        }
        Ok(())
    }

    fn verify_live(&self, candidate: &str) -> Result<()> {
        let root = self.layout.root();
        let alias = self.layout.self_alias();
        let report = self.validator.validate_structure(root, alias.as_deref());
        if !report.valid {
            return Err(Error::PostUpdateVerificationFailed(report.errors.join("; ")));
        }
        let installed = self
            .validator
            .read_metadata(root)
            .map_err(|e| Error::PostUpdateVerificationFailed(e.to_string()))?;
        if version::compare(&installed.version, candidate) != std::cmp::Ordering::Equal {
            return Err(Error::PostUpdateVerificationFailed(format!(
                "installed version is {} but {} was expected",
                installed.version, candidate
            )));
        }
        Ok(())
    }

    fn restore_keep(&self) -> Vec<String> {
        vec![self.config.tool_dir.clone(), self.config.dependency_dir.clone()]
    }

    /// Restore the session backup after a failure at `step`. Never retried.
    fn roll_back(&self, log: &mut RunLog, backup: &Backup, step: UpdateStatus, cause: Error) -> Error {
        self.note(log, RunLevel::Error, &format!("{} failed: {}", step, cause));
        let event = self.with_session(|s| {
            s.record_status(UpdateStatus::RollingBack);
            snapshot_event(s, event_names::ROLLBACK_STARTED, "Rolling back")
                .with_detail("backup", backup.name())
        });
        if let Some(event) = event {
            self.emitter.emit(event);
        }
        warn!(
            target: "update.rollback_start",
            step = %step,
            backup = %backup.name(),
            error = %cause,
            "Rolling back to backup"
        );

        #[cfg(test)]
        let injected = self.fault(FaultPoint::RestoreFails);
        #[cfg(not(test))]
        let injected: Result<()> = Ok(());

        let restored = injected.and_then(|_| {
            self.backups
                .restore(backup, self.layout.root(), &self.restore_keep())
        });

        match restored {
            Ok(()) => {
                self.note(log, RunLevel::Warn, &format!("restored backup {}", backup.name()));
                info!(target: "update.rollback_complete", backup = %backup.name(), "Rollback complete");
                let event = self.with_session(|s| {
                    s.bump_percent();
                    snapshot_event(s, event_names::ROLLBACK_COMPLETE, "Previous version restored")
                });
                if let Some(event) = event {
                    self.emitter.emit(event);
                }
                Error::RolledBack {
                    step: step.to_string(),
                    cause: Box::new(cause),
                }
            }
            Err(rollback_error) => {
                self.note(
                    log,
                    RunLevel::Error,
                    &format!("rollback from {} failed: {}", backup.name(), rollback_error),
                );
                error!(
                    target: "update.rollback_failed",
                    backup = %backup.name(),
                    error = %rollback_error,
                    "Rollback failed; manual intervention required"
                );
                Error::RollbackFailed {
                    step: step.to_string(),
                    cause: Box::new(cause),
                    rollback_error: rollback_error.to_string(),
                }
            }
        }
    }

    // -- other operations ----------------------------------------------------

    /// Validate an archive against the live install without changing it.
    pub fn check(&self, archive: &Path) -> Result<ValidationResult> {
        self.layout.ensure()?;
        let archive_path = locate_package(
            Some(archive),
            &self.layout.packages_dir(),
            &self.config.archive_extensions,
        )?;
        let workspace = Workspace::create(
            &self.layout.workspace_dir(),
            &format!("check-{}", SessionId::new()),
        )?;
        upd_archive::extract(&archive_path, &workspace.extract_dir())
            .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;
        let release_root = upd_archive::find_manifest_root(
            &workspace.extract_dir(),
            self.validator.manifest_file(),
            MAX_MANIFEST_DEPTH,
        )
        .unwrap_or_else(|| workspace.extract_dir());
        let current = self
            .validator
            .read_metadata(self.layout.root())
            .ok()
            .map(|m| m.version);
        Ok(self
            .validator
            .validate_full(&archive_path, &release_root, current.as_deref()))
    }

    /// Backups, newest first.
    pub fn list_backups(&self) -> Result<Vec<Backup>> {
        self.backups.list()
    }

    /// Restore the newest backup, or the newest backup of `version`.
    pub fn rollback(&self, version: Option<&str>) -> Result<Backup> {
        let (_guard, mut log, _) = self.begin(SessionKind::Rollback)?;

        let result = self.manual_rollback(&mut log, version);
        self.finish(&mut log, result.as_ref().err());
        result
    }

    fn manual_rollback(&self, log: &mut RunLog, version: Option<&str>) -> Result<Backup> {
        let backup = match version {
            Some(v) => self
                .backups
                .by_version(v)?
                .ok_or_else(|| Error::BackupNotFound(format!("no backup of version {}", v)))?,
            None => self
                .backups
                .latest()?
                .ok_or_else(|| Error::BackupNotFound("no backups available".to_string()))?,
        };
        let current = self
            .validator
            .read_metadata(self.layout.root())
            .ok()
            .map(|m| m.version);
        self.with_session(|s| {
            s.current_version = current;
            s.new_version = Some(backup.version().to_string());
            s.backup = Some(backup.name().to_string());
        });

        self.enter(log, UpdateStatus::RollingBack, &format!("Restoring {}", backup.name()))?;
        self.backups
            .restore(&backup, self.layout.root(), &self.restore_keep())?;
        self.enter(log, UpdateStatus::Completed, "Rollback completed")?;
        Ok(backup)
    }
}

fn snapshot_event(session: &UpdateSession, name: &str, message: &str) -> ProgressEvent {
    ProgressEvent::new(name, session.status, session.percent, message)
        .with_session_id(session.id.as_str())
        .with_versions(session.current_version.as_deref(), session.new_version.as_deref())
}
