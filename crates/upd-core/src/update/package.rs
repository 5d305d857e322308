//! Release package discovery and the per-session scratch workspace.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use upd_common::{Error, Result};

/// A located release archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatePackage {
    pub path: PathBuf,
    /// Version taken from the filename, if it follows the convention.
    pub declared_version: Option<String>,
    /// Product taken from the filename, if it follows the convention.
    pub product_name: Option<String>,
    /// SHA-256 of the archive bytes.
    pub checksum: String,
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            extensions
                .iter()
                .any(|x| x.trim_start_matches('.').eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Resolve the archive to install.
///
/// An explicit path must exist. Otherwise the most recently modified file
/// with an accepted extension in `intake_dir` is chosen.
pub fn locate_package(
    explicit: Option<&Path>,
    intake_dir: &Path,
    extensions: &[String],
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::PackageNotFound {
            dir: path.display().to_string(),
        });
    }

    let not_found = || Error::PackageNotFound {
        dir: intake_dir.display().to_string(),
    };
    let entries = match fs::read_dir(intake_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;
        if !meta.is_file() || !has_extension(&path, extensions) {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let newer = match &best {
            Some((time, current)) => modified > *time || (modified == *time && path > *current),
            None => true,
        };
        if newer {
            best = Some((modified, path));
        }
    }

    match best {
        Some((_, path)) => {
            debug!(target: "update.package_selected", path = %path.display(), "Selected newest archive");
            Ok(path)
        }
        None => Err(not_found()),
    }
}

/// Scratch directory for one session.
///
/// Holds the extracted release and the user data held aside during
/// replacement. Removed on drop, on success and failure alike.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub const EXTRACT_DIR: &'static str = "extract";
    pub const HOLD_DIR: &'static str = "hold";

    /// Create `<base>/<session_id>`, replacing any leftover of the same name.
    pub fn create(base: &Path, session_id: &str) -> io::Result<Self> {
        let path = base.join(session_id);
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(path.join(Self::EXTRACT_DIR))?;
        fs::create_dir_all(path.join(Self::HOLD_DIR))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.path.join(Self::EXTRACT_DIR)
    }

    pub fn hold_dir(&self) -> PathBuf {
        self.path.join(Self::HOLD_DIR)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(
                    target: "update.workspace_cleanup_failed",
                    path = %self.path.display(),
                    error = %e,
                    "Could not remove session workspace"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn zip_ext() -> Vec<String> {
        vec!["zip".to_string()]
    }

    #[test]
    fn test_explicit_path() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("Bot-v1.0.0.zip");
        fs::write(&archive, "zip").unwrap();
        assert_eq!(locate_package(Some(&archive), temp.path(), &zip_ext()).unwrap(), archive);

        let missing = temp.path().join("nope.zip");
        let err = locate_package(Some(&missing), temp.path(), &zip_ext()).unwrap_err();
        assert!(matches!(err, Error::PackageNotFound { .. }));
    }

    #[test]
    fn test_newest_archive_selected() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("Bot-v1.0.0.zip");
        let new = temp.path().join("Bot-v1.1.0.zip");
        let other = temp.path().join("notes.txt");
        for p in [&old, &new, &other] {
            fs::write(p, "x").unwrap();
        }
        set_file_mtime(&old, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        set_file_mtime(&new, FileTime::from_unix_time(1_700_000_100, 0)).unwrap();
        set_file_mtime(&other, FileTime::from_unix_time(1_700_000_900, 0)).unwrap();

        assert_eq!(locate_package(None, temp.path(), &zip_ext()).unwrap(), new);
    }

    #[test]
    fn test_empty_or_missing_intake() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            locate_package(None, temp.path(), &zip_ext()),
            Err(Error::PackageNotFound { .. })
        ));
        assert!(matches!(
            locate_package(None, &temp.path().join("absent"), &zip_ext()),
            Err(Error::PackageNotFound { .. })
        ));
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = {
            let ws = Workspace::create(temp.path(), "upd-20260101-000000-abcd").unwrap();
            assert!(ws.extract_dir().is_dir());
            assert!(ws.hold_dir().is_dir());
            fs::write(ws.extract_dir().join("f"), "x").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
