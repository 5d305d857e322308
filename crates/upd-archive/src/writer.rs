//! Release archive packing.
//!
//! Produces deterministic ZIP archives from a release directory: entries
//! are written in sorted path order with forward-slash names.

use crate::{ArchiveError, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

/// Counters describing a finished pack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackSummary {
    /// Archive written.
    pub path: PathBuf,
    /// Regular files added.
    pub files: usize,
    /// Uncompressed bytes added.
    pub bytes: u64,
}

/// Builder for release archives.
#[derive(Debug, Clone, Default)]
pub struct ArchiveWriter {
    skip_prefixes: Vec<String>,
    root_dir: Option<String>,
}

impl ArchiveWriter {
    /// Create a writer that packs everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip entries (at any depth) whose name starts with one of `prefixes`.
    pub fn skip_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_prefixes
            .extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// Nest every entry under a single top-level directory in the archive.
    pub fn with_root_dir(mut self, name: impl Into<String>) -> Self {
        self.root_dir = Some(name.into());
        self
    }

    fn skipped(&self, name: &str) -> bool {
        self.skip_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Pack the contents of `src` into a ZIP file at `dest`.
    pub fn pack_dir(&self, src: &Path, dest: &Path) -> Result<PackSummary> {
        let mut entries = Vec::new();
        self.collect(src, Path::new(""), &mut entries)?;
        if !entries.iter().any(|(_, is_dir)| !is_dir) {
            return Err(ArchiveError::EmptySource(src.to_path_buf()));
        }

        let file = File::create(dest)?;
        let mut zip = ZipWriter::new(file);
        let file_options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);
        let dir_options: FileOptions<'_, ()> = FileOptions::default().unix_permissions(0o755);

        let mut summary = PackSummary {
            path: dest.to_path_buf(),
            ..PackSummary::default()
        };

        if let Some(root) = &self.root_dir {
            zip.add_directory(root.as_str(), dir_options)?;
        }

        for (relative, is_dir) in &entries {
            let name = self.entry_name(relative);
            if *is_dir {
                zip.add_directory(name.as_str(), dir_options)?;
                continue;
            }

            let source = src.join(relative);
            let mut options = file_options;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = fs::metadata(&source)?.permissions().mode();
                options = options.unix_permissions(mode & 0o777);
            }

            zip.start_file(name.as_str(), options)?;
            let mut input = File::open(&source)?;
            let written = io::copy(&mut input, &mut zip)?;
            summary.files += 1;
            summary.bytes += written;
            debug!(entry = %name, bytes = written, "Packed entry");
        }

        let mut inner = zip.finish()?;
        inner.flush()?;

        info!(
            path = %dest.display(),
            files = summary.files,
            bytes = summary.bytes,
            "Release archive written"
        );

        Ok(summary)
    }

    fn entry_name(&self, relative: &Path) -> String {
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        match &self.root_dir {
            Some(root) => format!("{}/{}", root, joined),
            None => joined,
        }
    }

    fn collect(&self, base: &Path, relative: &Path, out: &mut Vec<(PathBuf, bool)>) -> Result<()> {
        let mut children: Vec<_> = fs::read_dir(base.join(relative))?
            .collect::<io::Result<Vec<_>>>()?;
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let name = entry.file_name();
            if self.skipped(&name.to_string_lossy()) {
                continue;
            }
            let child = relative.join(&name);
            if entry.file_type()?.is_dir() {
                out.push((child.clone(), true));
                self.collect(base, &child, out)?;
            } else {
                out.push((child, false));
            }
        }
        Ok(())
    }
}
