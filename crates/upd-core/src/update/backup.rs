//! Backup creation, listing, retention and restore.
//!
//! A backup is a full copy of the install root in its own directory under
//! the backup store, named `<prefix>-<version>-<UTC timestamp>`. The copy
//! is written into a reserved-prefix staging directory first and renamed
//! into place once complete, so a listed backup is never half-written.

use super::tree::{self, ExclusionSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use upd_common::{Error, Result};

/// Sidecar file written into every backup directory.
pub const BACKUP_METADATA_FILE: &str = ".update-backup.json";

/// Metadata stored alongside each backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Directory name of the backup.
    pub name: String,
    /// Version of the install that was backed up.
    pub version: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Total bytes of regular files copied.
    pub size_on_disk: u64,
    /// Number of files copied.
    pub file_count: u64,
}

impl BackupMetadata {
    /// Load metadata from a JSON file
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Save metadata to a JSON file
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)
    }
}

/// A backup entry with its metadata and location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backup {
    pub metadata: BackupMetadata,
    pub path: PathBuf,
}

impl Backup {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    fn modified(&self) -> SystemTime {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

/// Manager for creating and managing backups.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
    prefix: String,
    retention_count: usize,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>, prefix: &str, retention_count: usize) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            prefix: prefix.to_string(),
            retention_count: retention_count.max(1),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn retention_count(&self) -> usize {
        self.retention_count
    }

    fn backup_name(&self, version: &str) -> String {
        let version: String = version
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_') { c } else { '_' })
            .collect();
        let version = if version.is_empty() { "unknown".to_string() } else { version };
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let base = format!("{}-{}-{}", self.prefix, version, timestamp);

        let mut name = base.clone();
        let mut n = 1;
        while self.backup_dir.join(&name).exists() {
            name = format!("{}-{}", base, n);
            n += 1;
        }
        name
    }

    /// Snapshot `root` into a new backup.
    ///
    /// `exclude_top_level` names root entries left out of the copy. The
    /// top-level entry holding the backup store is always excluded when the
    /// store lives inside `root`.
    pub fn create(&self, root: &Path, version: &str, exclude_top_level: &[String]) -> Result<Backup> {
        fs::create_dir_all(&self.backup_dir)?;

        let mut exclude = ExclusionSet::new().top_level(exclude_top_level.iter().cloned());
        if let Ok(rel) = self.backup_dir.strip_prefix(root) {
            if let Some(first) = rel.components().next() {
                exclude = exclude.top_level([first.as_os_str().to_string_lossy().into_owned()]);
            }
        }

        let name = self.backup_name(version);
        let staging = self.backup_dir.join(format!(".tmp-{}", name));
        let final_path = self.backup_dir.join(&name);

        info!(
            target: "update.backup_start",
            root = %root.display(),
            backup = %name,
            "Creating backup"
        );

        let result = (|| -> Result<Backup> {
            let stats = tree::copy_tree(root, &staging, &exclude)?;
            let metadata = BackupMetadata {
                name: name.clone(),
                version: version.to_string(),
                timestamp: Utc::now(),
                size_on_disk: stats.bytes,
                file_count: stats.files,
            };
            metadata.save(&staging.join(BACKUP_METADATA_FILE))?;
            fs::rename(&staging, &final_path)?;
            Ok(Backup {
                metadata,
                path: final_path.clone(),
            })
        })();

        match result {
            Ok(backup) => {
                info!(
                    target: "update.backup_complete",
                    backup = %backup.name(),
                    files = backup.metadata.file_count,
                    size_bytes = backup.metadata.size_on_disk,
                    "Backup created"
                );
                Ok(backup)
            }
            Err(e) => {
                if staging.exists() {
                    let _ = fs::remove_dir_all(&staging);
                }
                Err(e)
            }
        }
    }

    /// All backups, newest first by modification time.
    pub fn list(&self) -> Result<Vec<Backup>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}-", self.prefix);
        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let metadata = match BackupMetadata::load(&path.join(BACKUP_METADATA_FILE)) {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!(
                        target: "update.backup_sidecar_missing",
                        backup = %name,
                        error = %e,
                        "Backup has no readable metadata, deriving from name"
                    );
                    self.metadata_from_name(&name, &path)
                }
            };
            backups.push(Backup { metadata, path });
        }

        backups.sort_by(|a, b| {
            b.modified()
                .cmp(&a.modified())
                .then_with(|| b.metadata.name.cmp(&a.metadata.name))
        });
        Ok(backups)
    }

    fn metadata_from_name(&self, name: &str, path: &Path) -> BackupMetadata {
        let rest = name.strip_prefix(&format!("{}-", self.prefix)).unwrap_or(name);
        let version = rest.split('-').next().unwrap_or_default().to_string();
        let timestamp = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        BackupMetadata {
            name: name.to_string(),
            version,
            timestamp,
            size_on_disk: 0,
            file_count: 0,
        }
    }

    /// Most recent backup.
    pub fn latest(&self) -> Result<Option<Backup>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Most recent backup of `version`.
    pub fn by_version(&self, version: &str) -> Result<Option<Backup>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|b| b.metadata.version == version))
    }

    /// Delete backups beyond the newest `max_kept`; returns what was removed.
    pub fn prune(&self, max_kept: usize) -> Result<Vec<Backup>> {
        let stale: Vec<Backup> = self.list()?.into_iter().skip(max_kept.max(1)).collect();
        for backup in &stale {
            fs::remove_dir_all(&backup.path)?;
            debug!(target: "update.backup_pruned", backup = %backup.name(), "Pruned old backup");
        }
        Ok(stale)
    }

    /// Prune to the configured retention count.
    pub fn prune_to_retention(&self) -> Result<Vec<Backup>> {
        self.prune(self.retention_count)
    }

    /// Check that the backup still holds what was copied.
    ///
    /// Backups without a sidecar only need to exist.
    pub fn verify(&self, backup: &Backup) -> Result<bool> {
        if !backup.path.is_dir() {
            return Ok(false);
        }
        if backup.metadata.file_count == 0 && backup.metadata.size_on_disk == 0 {
            return Ok(true);
        }
        let stats = tree::tree_stats(&backup.path, &ExclusionSet::new())?;
        Ok(stats.files == backup.metadata.file_count && stats.bytes == backup.metadata.size_on_disk)
    }

    /// Replace the contents of `root` with the backup.
    ///
    /// Top-level entries named in `keep` are neither deleted nor descended
    /// into before the copy; the backup is then copied over everything.
    pub fn restore(&self, backup: &Backup, root: &Path, keep: &[String]) -> Result<()> {
        if !backup.path.is_dir() {
            return Err(Error::BackupNotFound(backup.path.display().to_string()));
        }
        if !self.verify(backup)? {
            return Err(Error::BackupFailed(format!(
                "backup {} failed verification",
                backup.name()
            )));
        }

        info!(
            target: "update.restore_start",
            backup = %backup.name(),
            root = %root.display(),
            "Restoring backup"
        );
        let keep_set = ExclusionSet::new().top_level(keep.iter().cloned());
        let removed = tree::delete_tree(root, &keep_set)?;
        let stats = tree::copy_tree(&backup.path, root, &ExclusionSet::new())?;
        info!(
            target: "update.restore_complete",
            backup = %backup.name(),
            removed,
            files = stats.files,
            "Backup restored"
        );
        Ok(())
    }

    /// Remove a specific backup.
    pub fn remove(&self, backup: &Backup) -> Result<()> {
        if backup.path.exists() {
            fs::remove_dir_all(&backup.path)?;
        } else {
            warn!(target: "update.backup_missing", backup = %backup.name(), "Backup already gone");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn install(root: &Path) {
        write(&root.join("package.json"), r#"{"version":"1.0.0"}"#);
        write(&root.join("src/index.js"), "v1");
        write(&root.join("data/db.json"), "{}");
        write(&root.join("node_modules/dep/index.js"), "dep v1");
    }

    fn manager(root: &Path, keep: usize) -> BackupManager {
        BackupManager::new(root.join("updater/backups"), "backup", keep)
    }

    #[test]
    fn test_create_excludes_store_and_named_entries() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Bot");
        install(&root);
        write(&root.join("updater/packages/Bot-v2.0.0.zip"), "zip");
        write(&root.join("Bot/stray.txt"), "nested");

        let mgr = manager(&root, 5);
        let backup = mgr.create(&root, "1.0.0", &["Bot".to_string()]).unwrap();

        assert!(backup.name().starts_with("backup-1.0.0-"));
        assert!(backup.path.join("src/index.js").exists());
        assert!(backup.path.join("node_modules/dep/index.js").exists());
        assert!(!backup.path.join("updater").exists());
        assert!(!backup.path.join("Bot").exists());
        assert_eq!(backup.metadata.file_count, 4);
        assert!(backup.path.join(BACKUP_METADATA_FILE).exists());
        assert!(mgr.verify(&backup).unwrap());

        let listed = mgr.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata, backup.metadata);
    }

    #[test]
    fn test_no_staging_left_behind() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Bot");
        install(&root);
        let mgr = manager(&root, 5);
        mgr.create(&root, "1.0.0", &[]).unwrap();
        let leftovers: Vec<_> = fs::read_dir(mgr.backup_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_retention_keeps_newest_by_mtime() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Bot");
        install(&root);
        let mgr = manager(&root, 2);

        let mut created = Vec::new();
        for (i, version) in ["1.0.1", "1.0.2", "1.0.3", "1.0.4"].iter().enumerate() {
            let backup = mgr.create(&root, version, &[]).unwrap();
            set_file_mtime(&backup.path, FileTime::from_unix_time(1_700_000_000 + i as i64 * 60, 0))
                .unwrap();
            created.push(backup);
        }

        let removed = mgr.prune_to_retention().unwrap();
        assert_eq!(removed.len(), 2);
        let remaining: Vec<String> = mgr.list().unwrap().iter().map(|b| b.version().to_string()).collect();
        assert_eq!(remaining, vec!["1.0.4", "1.0.3"]);
        assert!(!created[0].path.exists());
    }

    #[test]
    fn test_by_version_and_latest() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Bot");
        install(&root);
        let mgr = manager(&root, 5);
        let old = mgr.create(&root, "1.0.0", &[]).unwrap();
        let new = mgr.create(&root, "1.1.0", &[]).unwrap();
        set_file_mtime(&old.path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        set_file_mtime(&new.path, FileTime::from_unix_time(1_700_000_600, 0)).unwrap();

        assert_eq!(mgr.latest().unwrap().unwrap().version(), "1.1.0");
        assert_eq!(mgr.by_version("1.0.0").unwrap().unwrap().name(), old.name());
        assert!(mgr.by_version("9.9.9").unwrap().is_none());
    }

    #[test]
    fn test_restore_replaces_tree_and_keeps_named() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Bot");
        install(&root);
        let mgr = manager(&root, 5);
        let backup = mgr.create(&root, "1.0.0", &[]).unwrap();

        fs::remove_dir_all(root.join("src")).unwrap();
        write(&root.join("src/new.js"), "v2");
        write(&root.join("package.json"), r#"{"version":"2.0.0"}"#);
        write(&root.join("node_modules/added/index.js"), "added by v2");

        mgr.restore(&backup, &root, &["updater".to_string(), "node_modules".to_string()])
            .unwrap();

        assert_eq!(fs::read_to_string(root.join("src/index.js")).unwrap(), "v1");
        assert!(!root.join("src/new.js").exists());
        assert!(fs::read_to_string(root.join("package.json")).unwrap().contains("1.0.0"));
        assert!(root.join("node_modules/added/index.js").exists());
        assert!(!root.join(BACKUP_METADATA_FILE).exists());
        assert!(backup.path.exists());
    }

    #[test]
    fn test_restore_refuses_tampered_backup() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Bot");
        install(&root);
        let mgr = manager(&root, 5);
        let backup = mgr.create(&root, "1.0.0", &[]).unwrap();
        fs::remove_file(backup.path.join("src/index.js")).unwrap();

        let err = mgr.restore(&backup, &root, &["updater".to_string()]).unwrap_err();
        assert!(matches!(err, Error::BackupFailed(_)));
        assert!(root.join("src/index.js").exists());
    }

    #[test]
    fn test_list_without_sidecar() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("backups");
        fs::create_dir_all(store.join("backup-0.9.0-20250101T000000000Z")).unwrap();
        fs::create_dir_all(store.join("unrelated")).unwrap();
        let mgr = BackupManager::new(&store, "backup", 5);
        let listed = mgr.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version(), "0.9.0");
    }
}
