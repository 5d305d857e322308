//! Protected path resolution.
//!
//! Turns the configured protection patterns into the concrete set of paths
//! that exist in the live tree right now. Patterns are either exact relative
//! paths (`data`, `.env`) or globs (`config/*.json`, `plugins/*`,
//! `logs/**`). Matching is case-sensitive and anchored on the full relative
//! path with `/` separators.
//!
//! A directory match is preserved as one unit: the walk does not descend
//! into it, so a restore never mixes old and new files inside it.
//!
//! Some entries can never be protected, whatever the configuration says:
//! the tool directory (backups and workspace live there), a nested copy of
//! the root under its own name, reserved-prefix artifacts, and the
//! dependency cache (it is never deleted, so holding it is pointless).

use super::tree::{ExclusionSet, TreeError, TreeResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors during rule compilation.
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("invalid protection pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl From<ProtectionError> for upd_common::Error {
    fn from(err: ProtectionError) -> Self {
        upd_common::Error::Config(err.to_string())
    }
}

/// Rule kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Exact,
    Glob,
}

/// A compiled protection pattern.
#[derive(Debug, Clone)]
pub struct ProtectionRule {
    pub original: String,
    pub kind: RuleKind,
    exact: String,
    regex: Option<Regex>,
}

impl ProtectionRule {
    pub fn compile(pattern: &str) -> Result<Self, ProtectionError> {
        let normalized = pattern
            .trim()
            .trim_start_matches("./")
            .trim_end_matches('/')
            .replace('\\', "/");
        if normalized.is_empty() {
            return Err(ProtectionError::InvalidPattern {
                pattern: pattern.to_string(),
                message: "empty pattern".to_string(),
            });
        }

        let is_glob = normalized.contains(['*', '?', '[']);
        let regex = if is_glob {
            Some(
                Regex::new(&glob_to_regex(&normalized)).map_err(|e| {
                    ProtectionError::InvalidPattern {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    }
                })?,
            )
        } else {
            None
        };

        Ok(Self {
            original: pattern.to_string(),
            kind: if is_glob { RuleKind::Glob } else { RuleKind::Exact },
            exact: normalized,
            regex,
        })
    }

    /// Check a `/`-separated relative path against this rule.
    pub fn matches(&self, rel: &str) -> bool {
        match self.kind {
            RuleKind::Exact => rel == self.exact,
            RuleKind::Glob => self
                .regex
                .as_ref()
                .map(|r| r.is_match(rel))
                .unwrap_or(false),
        }
    }
}

/// Convert a glob pattern to an anchored regex.
///
/// `*` stays within one component, `**` crosses components, `**/` matches
/// zero or more leading directories.
fn glob_to_regex(glob: &str) -> String {
    let mut regex_str = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                if i + 1 < chars.len() && chars[i + 1] == '*' {
                    if i + 2 < chars.len() && chars[i + 2] == '/' {
                        regex_str.push_str("(.*/)?");
                        i += 3;
                        continue;
                    }
                    regex_str.push_str(".*");
                    i += 2;
                    continue;
                }
                regex_str.push_str("[^/]*");
            }
            '?' => regex_str.push_str("[^/]"),
            '[' => {
                let start = i;
                i += 1;
                if i < chars.len() && (chars[i] == '!' || chars[i] == '^') {
                    i += 1;
                }
                if i < chars.len() && chars[i] == ']' {
                    i += 1;
                }
                while i < chars.len() && chars[i] != ']' {
                    i += 1;
                }
                if i < chars.len() {
                    let class_content: String = chars[start..=i].iter().collect();
                    regex_str.push_str(&class_content.replace("[!", "[^"));
                } else {
                    regex_str.push_str("\\[");
                    i = start;
                }
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(c);
            }
            _ => regex_str.push(c),
        }
        i += 1;
    }
    regex_str.push('$');
    regex_str
}

/// A concrete path to preserve across replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedPath {
    pub relative_path: PathBuf,
    pub is_directory: bool,
}

impl ProtectedPath {
    /// Absolute location of this path under `base`.
    pub fn under(&self, base: &Path) -> PathBuf {
        base.join(&self.relative_path)
    }
}

/// Resolves protection rules against a live tree.
#[derive(Debug, Clone)]
pub struct ProtectionResolver {
    rules: Vec<ProtectionRule>,
    never: ExclusionSet,
}

impl ProtectionResolver {
    /// Compile `patterns`. `never_protect` names top-level entries that are
    /// excluded from resolution on top of the reserved prefixes.
    pub fn new<I, S>(patterns: &[String], never_protect: I) -> Result<Self, ProtectionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rules = patterns
            .iter()
            .map(|p| ProtectionRule::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            never: ExclusionSet::new().top_level(never_protect),
        })
    }

    pub fn rules(&self) -> &[ProtectionRule] {
        &self.rules
    }

    /// Whether `rel` is matched by any rule.
    pub fn is_protected(&self, rel: &Path) -> bool {
        if self.never.covers(rel) {
            return false;
        }
        let rel = to_slash(rel);
        self.rules.iter().any(|r| r.matches(&rel))
    }

    /// Walk `root` and return every existing protected path, sorted.
    pub fn resolve(&self, root: &Path) -> TreeResult<Vec<ProtectedPath>> {
        let mut out = Vec::new();
        if self.rules.is_empty() {
            return Ok(out);
        }
        self.walk(root, Path::new(""), &mut out)?;
        debug!(
            target: "update.protect_resolved",
            count = out.len(),
            root = %root.display(),
            "Resolved protected paths"
        );
        Ok(out)
    }

    fn walk(&self, dir: &Path, rel: &Path, out: &mut Vec<ProtectedPath>) -> TreeResult<()> {
        let read = fs::read_dir(dir).map_err(|source| TreeError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.map_err(|source| TreeError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            entries.push((entry.file_name(), entry.path()));
        }
        entries.sort();

        for (name, path) in entries {
            let child_rel = rel.join(&name);
            if self.never.excludes(&child_rel) {
                continue;
            }
            let meta = fs::symlink_metadata(&path).map_err(|source| TreeError::Io {
                path: path.clone(),
                source,
            })?;
            let is_dir = meta.is_dir();
            let slash = to_slash(&child_rel);

            if self.rules.iter().any(|r| r.matches(&slash)) {
                trace!(target: "update.protect_match", path = %slash, dir = is_dir, "Protected");
                out.push(ProtectedPath {
                    relative_path: child_rel,
                    is_directory: is_dir,
                });
            } else if is_dir {
                self.walk(&path, &child_rel, out)?;
            }
        }
        Ok(())
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
