//! Release validation.
//!
//! Structural checks, manifest reading, filename convention and the
//! downgrade check, composed by [`PackageValidator::validate_full`] into one
//! immutable [`ValidationResult`]. Every call produces a fresh result.

use super::version;
use crate::config::UpdaterConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use upd_common::{Error, Result};

/// Fields read from the release manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// Outcome of a structural check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructureReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Outcome of the filename convention check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCheck {
    pub valid: bool,
    pub product_name: Option<String>,
    pub version: Option<String>,
}

/// Class of a blocking validation problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ArchiveUnreadable,
    StructureInvalid,
    MetadataUnreadable,
    VersionDowngradeRejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub message: String,
}

/// Extra facts gathered during validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationMetadata {
    pub checksum: Option<String>,
    pub package: Option<PackageMetadata>,
    pub name_check: Option<NameCheck>,
    pub current_version: Option<String>,
}

/// Result of [`PackageValidator::validate_full`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub metadata: ValidationMetadata,
}

impl ValidationResult {
    /// Errors of the given kind.
    pub fn errors_of(&self, kind: IssueKind) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }

    pub fn candidate_version(&self) -> Option<&str> {
        self.metadata.package.as_ref().map(|p| p.version.as_str())
    }

    /// The first blocking problem as a taxonomy error.
    pub fn to_error(&self) -> Option<Error> {
        let issue = self.errors.first()?;
        Some(match issue.kind {
            IssueKind::ArchiveUnreadable => Error::ArchiveCorrupt(issue.message.clone()),
            IssueKind::StructureInvalid => Error::StructureInvalid(
                self.errors_of(IssueKind::StructureInvalid)
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            IssueKind::MetadataUnreadable => Error::MetadataUnreadable {
                path: String::new(),
                reason: issue.message.clone(),
            },
            IssueKind::VersionDowngradeRejected => Error::VersionDowngradeRejected {
                current: self.metadata.current_version.clone().unwrap_or_default(),
                candidate: self.candidate_version().unwrap_or_default().to_string(),
            },
        })
    }
}

/// Validates candidate releases and the live tree after replacement.
#[derive(Debug, Clone)]
pub struct PackageValidator {
    manifest_file: String,
    required_entries: Vec<String>,
    user_data_markers: Vec<String>,
    name_pattern: Option<Regex>,
}

impl PackageValidator {
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self {
            manifest_file: config.manifest_file.clone(),
            required_entries: config.required_entries.clone(),
            user_data_markers: config.user_data_markers.clone(),
            name_pattern: build_name_pattern(&config.product_names, &config.archive_extensions),
        }
    }

    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    /// Check required entries, self-nesting and bundled user data.
    ///
    /// `self_name` is an extra top-level name that would mean the tree
    /// contains a copy of itself (the install root's name when checking a
    /// live tree); the tree's own directory name is always checked.
    pub fn validate_structure(&self, root: &Path, self_name: Option<&str>) -> StructureReport {
        let mut report = StructureReport::default();

        if !root.is_dir() {
            report
                .errors
                .push(format!("{} is not a directory", root.display()));
            return report;
        }

        for entry in &self.required_entries {
            let wants_dir = entry.ends_with('/');
            let name = entry.trim_end_matches('/');
            let path = root.join(name);
            if wants_dir {
                if !path.is_dir() {
                    report.errors.push(format!("missing required directory '{}'", name));
                }
            } else if !path.exists() {
                report.errors.push(format!("missing required entry '{}'", name));
            }
        }

        let mut nest_names: Vec<String> = Vec::new();
        if let Some(own) = root.file_name().map(|n| n.to_string_lossy().into_owned()) {
            nest_names.push(own);
        }
        if let Some(extra) = self_name {
            if !nest_names.iter().any(|n| n == extra) {
                nest_names.push(extra.to_string());
            }
        }
        for name in &nest_names {
            let nested = root.join(name);
            if nested.is_dir() && nested.join(&self.manifest_file).exists() {
                report.errors.push(format!(
                    "tree contains a nested copy of itself at '{}'",
                    name
                ));
            }
        }

        for marker in &self.user_data_markers {
            if root.join(marker).exists() {
                report.warnings.push(format!(
                    "release bundles user data '{}'; it will be ignored",
                    marker
                ));
            }
        }

        report.valid = report.errors.is_empty();
        report
    }

    /// Read the manifest at `<root>/<manifest_file>`.
    pub fn read_metadata(&self, root: &Path) -> Result<PackageMetadata> {
        let path = root.join(&self.manifest_file);
        let unreadable = |reason: String| Error::MetadataUnreadable {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(&path).map_err(|e| unreadable(e.to_string()))?;
        let metadata: PackageMetadata =
            serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;
        if metadata.version.trim().is_empty() {
            return Err(unreadable("version is empty".to_string()));
        }
        Ok(metadata)
    }

    /// Check `Product-vX.Y.Z.ext`. Advisory only.
    pub fn validate_name(&self, filename: &str) -> NameCheck {
        let captures = self
            .name_pattern
            .as_ref()
            .and_then(|re| re.captures(filename));
        match captures {
            Some(caps) => NameCheck {
                valid: true,
                product_name: caps.get(1).map(|m| m.as_str().to_string()),
                version: caps.get(2).map(|m| m.as_str().to_string()),
            },
            None => NameCheck {
                valid: false,
                product_name: None,
                version: None,
            },
        }
    }

    /// Full candidate validation.
    ///
    /// A downgrade against a known `current_version` is an error; with no
    /// known current version the check is skipped. Equal versions warn.
    pub fn validate_full(
        &self,
        archive: &Path,
        extracted_root: &Path,
        current_version: Option<&str>,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut metadata = ValidationMetadata {
            current_version: current_version
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            ..ValidationMetadata::default()
        };

        match upd_archive::sha256_file(archive) {
            Ok(sum) => metadata.checksum = Some(sum),
            Err(e) => errors.push(ValidationIssue {
                kind: IssueKind::ArchiveUnreadable,
                message: format!("cannot checksum {}: {}", archive.display(), e),
            }),
        }

        let filename = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name_check = self.validate_name(&filename);
        if !name_check.valid {
            warnings.push(format!(
                "archive name '{}' does not follow Product-vX.Y.Z convention",
                filename
            ));
        }

        let structure = self.validate_structure(extracted_root, None);
        errors.extend(structure.errors.into_iter().map(|message| ValidationIssue {
            kind: IssueKind::StructureInvalid,
            message,
        }));
        warnings.extend(structure.warnings);

        match self.read_metadata(extracted_root) {
            Ok(package) => {
                if let Some(named) = name_check.version.as_deref() {
                    if version::compare(named, &package.version) != std::cmp::Ordering::Equal {
                        warnings.push(format!(
                            "archive name says {} but manifest says {}; using manifest",
                            named, package.version
                        ));
                    }
                }
                match metadata.current_version.as_deref() {
                    Some(current) if version::is_downgrade(current, &package.version) => {
                        errors.push(ValidationIssue {
                            kind: IssueKind::VersionDowngradeRejected,
                            message: format!(
                                "candidate {} is older than installed {}",
                                package.version, current
                            ),
                        });
                    }
                    Some(current)
                        if version::compare(current, &package.version)
                            == std::cmp::Ordering::Equal =>
                    {
                        warnings.push(format!("reinstalling current version {}", current));
                    }
                    Some(_) => {}
                    None => warnings.push(
                        "installed version unknown; downgrade check skipped".to_string(),
                    ),
                }
                metadata.package = Some(package);
            }
            Err(e) => errors.push(ValidationIssue {
                kind: IssueKind::MetadataUnreadable,
                message: e.to_string(),
            }),
        }

        metadata.name_check = Some(name_check);
        let valid = errors.is_empty();
        debug!(
            target: "update.validate_done",
            valid,
            errors = errors.len(),
            warnings = warnings.len(),
            "Validated candidate"
        );
        ValidationResult {
            valid,
            errors,
            warnings,
            metadata,
        }
    }
}

fn build_name_pattern(products: &[String], extensions: &[String]) -> Option<Regex> {
    if products.is_empty() || extensions.is_empty() {
        return None;
    }
    let alt = |items: &[String]| {
        items
            .iter()
            .map(|s| regex::escape(s.trim_start_matches('.')))
            .collect::<Vec<_>>()
            .join("|")
    };
    Regex::new(&format!(
        r"^({})-v(\d+\.\d+\.\d+)\.({})$",
        alt(products),
        alt(extensions)
    ))
    .ok()
}
