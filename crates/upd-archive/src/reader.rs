//! Release archive extraction and manifest discovery.
//!
//! Extraction refuses entries whose names would resolve outside the
//! destination directory. Release archives are often produced by hand, so
//! the release root may sit at any depth; [`find_manifest_root`] locates it
//! by depth-first search.

use crate::{ArchiveError, Result};
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

/// File extensions accepted as release archives.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["zip"];

/// Directory names produced by archivers that never hold release content.
const ARCHIVER_NOISE: &[&str] = &["__MACOSX"];

/// Counters describing a finished extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Regular files written.
    pub files: usize,
    /// Directories created.
    pub dirs: usize,
    /// Uncompressed bytes written.
    pub bytes: u64,
}

/// Whether the path carries a supported archive extension.
pub fn is_supported_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Reader for release archives.
pub struct ArchiveReader<R: Read + Seek> {
    archive: ZipArchive<R>,
}

impl ArchiveReader<File> {
    /// Open an archive from a file path.
    pub fn open(path: &Path) -> Result<Self> {
        if !is_supported_archive(path) {
            return Err(ArchiveError::UnsupportedFormat(path.to_path_buf()));
        }
        let file = File::open(path)?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Create a reader from any Read + Seek source.
    pub fn from_reader(reader: R) -> Result<Self> {
        let archive = ZipArchive::new(reader)?;
        Ok(Self { archive })
    }

    /// Number of entries in the archive.
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    /// Whether the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Extract every entry below `dest`, creating it if needed.
    pub fn extract_to(&mut self, dest: &Path) -> Result<ExtractSummary> {
        fs::create_dir_all(dest)?;
        let mut summary = ExtractSummary::default();

        for index in 0..self.archive.len() {
            let mut entry = self.archive.by_index(index)?;
            let relative = entry
                .enclosed_name()
                .ok_or_else(|| ArchiveError::UnsafePath(entry.name().to_string()))?;
            let out_path = dest.join(&relative);

            if entry.is_dir() {
                fs::create_dir_all(&out_path)?;
                summary.dirs += 1;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            let written = io::copy(&mut entry, &mut out)?;
            summary.files += 1;
            summary.bytes += written;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o777))?;
            }

            debug!(path = %relative.display(), bytes = written, "Extracted entry");
        }

        info!(
            dest = %dest.display(),
            files = summary.files,
            dirs = summary.dirs,
            bytes = summary.bytes,
            "Archive extracted"
        );

        Ok(summary)
    }
}

/// Extract the archive at `archive_path` into `dest`.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<ExtractSummary> {
    ArchiveReader::open(archive_path)?.extract_to(dest)
}

/// Find the shallowest-first, depth-first directory under `root` that holds
/// `manifest_name`, searching at most `max_depth` levels below `root`.
///
/// Subdirectories are visited in name order so the result is stable across
/// filesystems.
pub fn find_manifest_root(root: &Path, manifest_name: &str, max_depth: usize) -> Option<PathBuf> {
    if root.join(manifest_name).is_file() {
        return Some(root.to_path_buf());
    }
    if max_depth == 0 {
        return None;
    }

    let mut children: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| {
            let name = e.file_name();
            !ARCHIVER_NOISE.iter().any(|n| name == *n)
        })
        .map(|e| e.path())
        .collect();
    children.sort();

    children
        .iter()
        .find_map(|child| find_manifest_root(child, manifest_name, max_depth - 1))
}
