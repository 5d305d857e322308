//! Loop-guarded tree primitives shared by backup, replace and restore.
//!
//! All three call sites describe what to leave alone with one
//! [`ExclusionSet`], so "what backup skips" and "what replace skips" cannot
//! drift apart. Entries whose name starts with a reserved prefix are always
//! skipped: staging directories and backup sidecars never travel.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Name prefixes reserved for updater artifacts.
pub const RESERVED_PREFIXES: &[&str] = &[".update-", ".tmp-"];

/// Errors from tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("refusing to copy {} into itself ({})", src.display(), dest.display())]
    RecursiveCopy { src: PathBuf, dest: PathBuf },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<TreeError> for upd_common::Error {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::RecursiveCopy { src, dest } => upd_common::Error::RecursiveCopyRejected {
                src: src.display().to_string(),
                dest: dest.display().to_string(),
            },
            TreeError::Io { path, source } => upd_common::Error::Io(io::Error::new(
                source.kind(),
                format!("{}: {}", path.display(), source),
            )),
        }
    }
}

pub type TreeResult<T> = std::result::Result<T, TreeError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> TreeError + '_ {
    move |source| TreeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Declarative set of entries a walk leaves alone.
///
/// Paths are matched relative to the walk root.
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    top_level: BTreeSet<String>,
    paths: BTreeSet<PathBuf>,
    prefixes: Vec<String>,
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ExclusionSet {
    /// Exclusion set holding only the reserved prefixes.
    pub fn new() -> Self {
        Self {
            top_level: BTreeSet::new(),
            paths: BTreeSet::new(),
            prefixes: RESERVED_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Exclude top-level entries by name.
    pub fn top_level<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.top_level.extend(names.into_iter().map(Into::into));
        self
    }

    /// Exclude relative paths at any depth.
    pub fn paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Exclude entries whose name starts with `prefix`, at any depth.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Whether the entry at `rel` (relative to the walk root) is skipped.
    pub fn excludes(&self, rel: &Path) -> bool {
        let Some(name) = rel.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        if self.prefixes.iter().any(|p| name.starts_with(p.as_str())) {
            return true;
        }
        if rel.components().count() == 1 && self.top_level.contains(name.as_ref()) {
            return true;
        }
        self.paths.contains(rel)
    }

    /// Whether `rel` or any of its ancestors is skipped.
    pub fn covers(&self, rel: &Path) -> bool {
        let mut prefix = PathBuf::new();
        for component in rel.components() {
            prefix.push(component);
            if self.excludes(&prefix) {
                return true;
            }
        }
        false
    }
}

/// Counters from a copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub skipped: u64,
}

/// Lexically normalize an absolute path, resolving symlinks on the part
/// that exists.
fn resolve(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return Ok(normalize(&out));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(normalize(&absolute)),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Reject copies whose destination is the source or lies inside it.
///
/// A destination inside the source is allowed only when the walk will skip
/// it, i.e. one of its ancestors (relative to `src`) is excluded.
pub fn check_not_recursive(src: &Path, dest: &Path, exclude: &ExclusionSet) -> TreeResult<()> {
    let src_abs = resolve(src).map_err(io_err(src))?;
    let dest_abs = resolve(dest).map_err(io_err(dest))?;

    let rejected = || TreeError::RecursiveCopy {
        src: src.to_path_buf(),
        dest: dest.to_path_buf(),
    };

    if dest_abs == src_abs {
        return Err(rejected());
    }
    if let Ok(rel) = dest_abs.strip_prefix(&src_abs) {
        if !exclude.covers(rel) {
            return Err(rejected());
        }
    }
    Ok(())
}

/// Recursively copy `src` into `dest`, overwriting existing files.
///
/// The recursion guard runs before anything is created.
pub fn copy_tree(src: &Path, dest: &Path, exclude: &ExclusionSet) -> TreeResult<CopyStats> {
    check_not_recursive(src, dest, exclude)?;
    let mut stats = CopyStats::default();
    copy_dir_inner(src, dest, Path::new(""), exclude, &mut stats)?;
    Ok(stats)
}

fn copy_dir_inner(
    src: &Path,
    dest: &Path,
    rel: &Path,
    exclude: &ExclusionSet,
    stats: &mut CopyStats,
) -> TreeResult<()> {
    ensure_dir(dest)?;
    stats.dirs += 1;

    for (name, child_src) in sorted_entries(src)? {
        let child_rel = rel.join(&name);
        if exclude.excludes(&child_rel) {
            stats.skipped += 1;
            continue;
        }
        let child_dest = dest.join(&name);
        copy_any(&child_src, &child_dest, &child_rel, exclude, stats)?;
    }
    Ok(())
}

fn copy_any(
    src: &Path,
    dest: &Path,
    rel: &Path,
    exclude: &ExclusionSet,
    stats: &mut CopyStats,
) -> TreeResult<()> {
    let meta = fs::symlink_metadata(src).map_err(io_err(src))?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        copy_symlink(src, dest)?;
        stats.files += 1;
    } else if file_type.is_dir() {
        copy_dir_inner(src, dest, rel, exclude, stats)?;
    } else {
        if let Ok(existing) = fs::symlink_metadata(dest) {
            if existing.is_dir() {
                fs::remove_dir_all(dest).map_err(io_err(dest))?;
            } else if existing.file_type().is_symlink() {
                fs::remove_file(dest).map_err(io_err(dest))?;
            }
        }
        let bytes = fs::copy(src, dest).map_err(io_err(dest))?;
        stats.files += 1;
        stats.bytes += bytes;
    }
    Ok(())
}

fn ensure_dir(dest: &Path) -> TreeResult<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => {
            fs::remove_file(dest).map_err(io_err(dest))?;
            fs::create_dir_all(dest).map_err(io_err(dest))
        }
        Err(_) => fs::create_dir_all(dest).map_err(io_err(dest)),
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> TreeResult<()> {
    let target = fs::read_link(src).map_err(io_err(src))?;
    if fs::symlink_metadata(dest).is_ok() {
        remove_entry(dest)?;
    }
    std::os::unix::fs::symlink(target, dest).map_err(io_err(dest))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> TreeResult<()> {
    fs::copy(src, dest).map(|_| ()).map_err(io_err(dest))
}

fn sorted_entries(dir: &Path) -> TreeResult<Vec<(std::ffi::OsString, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        entries.push((entry.file_name(), entry.path()));
    }
    entries.sort();
    Ok(entries)
}

/// Copy a single file or directory to `dest`, replacing whatever is there.
pub fn copy_entry(src: &Path, dest: &Path, exclude: &ExclusionSet) -> TreeResult<CopyStats> {
    let meta = fs::symlink_metadata(src).map_err(io_err(src))?;
    if meta.is_dir() {
        return copy_tree(src, dest, exclude);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let mut stats = CopyStats::default();
    copy_any(src, dest, Path::new(""), exclude, &mut stats)?;
    Ok(stats)
}

/// Remove a file, symlink or directory.
pub fn remove_entry(path: &Path) -> TreeResult<()> {
    let meta = fs::symlink_metadata(path).map_err(io_err(path))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(io_err(path))
    } else {
        fs::remove_file(path).map_err(io_err(path))
    }
}

/// Delete every top-level entry of `root` the keep set does not cover.
///
/// Kept entries are not descended into. Returns the number of removed
/// top-level entries.
pub fn delete_tree(root: &Path, keep: &ExclusionSet) -> TreeResult<usize> {
    let mut removed = 0;
    for (name, path) in sorted_entries(root)? {
        if keep.excludes(Path::new(&name)) {
            continue;
        }
        remove_entry(&path)?;
        removed += 1;
    }
    Ok(removed)
}

/// Count files and bytes under `root`, honoring the exclusion set.
pub fn tree_stats(root: &Path, exclude: &ExclusionSet) -> TreeResult<CopyStats> {
    let mut stats = CopyStats::default();
    stats_inner(root, Path::new(""), exclude, &mut stats)?;
    Ok(stats)
}

fn stats_inner(
    dir: &Path,
    rel: &Path,
    exclude: &ExclusionSet,
    stats: &mut CopyStats,
) -> TreeResult<()> {
    stats.dirs += 1;
    for (name, path) in sorted_entries(dir)? {
        let child_rel = rel.join(&name);
        if exclude.excludes(&child_rel) {
            stats.skipped += 1;
            continue;
        }
        let meta = fs::symlink_metadata(&path).map_err(io_err(&path))?;
        if meta.is_dir() {
            stats_inner(&path, &child_rel, exclude, stats)?;
        } else {
            stats.files += 1;
            if !meta.file_type().is_symlink() {
                stats.bytes += meta.len();
            }
        }
    }
    Ok(())
}
