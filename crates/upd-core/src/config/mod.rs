//! Configuration loading and validation for the updater.
//!
//! This module handles:
//! - Loading `updater.json` from the tool directory or an explicit path
//! - Config resolution order (CLI > env > tool directory > defaults)
//! - Semantic validation (retention, relative patterns, single-component dirs)
//! - Provenance (path and SHA-256 of the file actually loaded)

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Default config file name inside the tool directory.
pub const CONFIG_FILE_NAME: &str = "updater.json";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "UPD_CONFIG";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl From<ConfigError> for upd_common::Error {
    fn from(err: ConfigError) -> Self {
        upd_common::Error::Config(err.to_string())
    }
}

/// External dependency installer invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Program to run inside the install root.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Kill the installer after this many seconds (0 disables the limit).
    pub timeout_secs: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
            args: vec!["install".to_string(), "--omit=dev".to_string()],
            timeout_secs: 900,
        }
    }
}

/// Updater configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Tool-owned directory under the install root (packages, backups, logs).
    pub tool_dir: String,
    /// Name prefix for backup directories.
    pub backup_prefix: String,
    /// Number of backups kept after pruning.
    pub max_backups: usize,
    /// Release manifest file name.
    pub manifest_file: String,
    /// Entries every release must contain; a trailing `/` requires a directory.
    pub required_entries: Vec<String>,
    /// Dependency cache left in place across replacement.
    pub dependency_dir: String,
    /// Paths preserved across replacement (exact paths or `*`/`**` globs).
    pub protected_patterns: Vec<String>,
    /// Paths that indicate live user data when found inside a release.
    pub user_data_markers: Vec<String>,
    /// Product names accepted by the archive filename convention.
    pub product_names: Vec<String>,
    /// Archive extensions accepted by the filename convention.
    pub archive_extensions: Vec<String>,
    /// Dependency installer invocation.
    pub installer: InstallerConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            tool_dir: "updater".to_string(),
            backup_prefix: "backup".to_string(),
            max_backups: 5,
            manifest_file: "package.json".to_string(),
            required_entries: vec!["package.json".to_string(), "src/".to_string()],
            dependency_dir: "node_modules".to_string(),
            protected_patterns: vec![
                "config/*.json".to_string(),
                "data".to_string(),
                "plugins/*".to_string(),
                "logs".to_string(),
                ".env".to_string(),
            ],
            user_data_markers: vec![
                "data".to_string(),
                "config/config.json".to_string(),
                ".env".to_string(),
            ],
            product_names: vec!["Bot".to_string()],
            archive_extensions: vec!["zip".to_string()],
            installer: InstallerConfig::default(),
        }
    }
}

impl UpdaterConfig {
    /// Check semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_backups == 0 {
            return Err(invalid("max_backups", "must keep at least one backup"));
        }
        if self.manifest_file.trim().is_empty() {
            return Err(invalid("manifest_file", "must not be empty"));
        }
        if self.backup_prefix.trim().is_empty() || self.backup_prefix.contains(['/', '\\']) {
            return Err(invalid("backup_prefix", "must be a plain name"));
        }
        if !is_single_component(&self.tool_dir) {
            return Err(invalid(
                "tool_dir",
                "must be a single relative directory name",
            ));
        }
        if !is_single_component(&self.dependency_dir) {
            return Err(invalid(
                "dependency_dir",
                "must be a single relative directory name",
            ));
        }
        if self.tool_dir == self.dependency_dir {
            return Err(invalid(
                "dependency_dir",
                "must differ from tool_dir",
            ));
        }
        for pattern in &self.protected_patterns {
            if !is_contained_relative(pattern) {
                return Err(invalid(
                    "protected_patterns",
                    &format!("'{}' must be relative and stay inside the install root", pattern),
                ));
            }
        }
        for marker in &self.user_data_markers {
            if !is_contained_relative(marker) {
                return Err(invalid(
                    "user_data_markers",
                    &format!("'{}' must be relative and stay inside the install root", marker),
                ));
            }
        }
        for ext in &self.archive_extensions {
            let supported = upd_archive::SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext.trim_start_matches('.')));
            if !supported {
                return Err(invalid(
                    "archive_extensions",
                    &format!(
                        "'{}' cannot be extracted (supported: {})",
                        ext,
                        upd_archive::SUPPORTED_EXTENSIONS.join(", ")
                    ),
                ));
            }
        }
        if self.installer.program.trim().is_empty() {
            return Err(invalid("installer.program", "must not be empty"));
        }
        Ok(())
    }

    /// Installer timeout, `None` when disabled.
    pub fn installer_timeout(&self) -> Option<std::time::Duration> {
        match self.installer.timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn is_single_component(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_contained_relative(value: &str) -> bool {
    !value.trim().is_empty()
        && Path::new(value)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The loaded configuration.
    pub config: UpdaterConfig,
    /// Path to the config file (None if using defaults).
    pub path: Option<PathBuf>,
    /// SHA-256 hash of the config file content (None if using defaults).
    pub hash: Option<String>,
}

/// Configuration resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Install root; the default file is looked up in its tool directory.
    pub root: PathBuf,
    /// Explicit config file path (highest priority).
    pub config_path: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit CLI flag (via ConfigOptions)
/// 2. Environment variable (UPD_CONFIG)
/// 3. `<root>/<default tool dir>/updater.json`
/// 4. Built-in defaults
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let explicit = options
        .config_path
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        return load_from_file(&path);
    }

    let default_path = options
        .root
        .join(UpdaterConfig::default().tool_dir)
        .join(CONFIG_FILE_NAME);
    if default_path.exists() {
        return load_from_file(&default_path);
    }

    debug!(target: "config.default_used", "No updater config file, using defaults");
    Ok(ResolvedConfig {
        config: UpdaterConfig::default(),
        path: None,
        hash: None,
    })
}

/// Load and validate configuration from a specific file.
pub fn load_from_file(path: &Path) -> Result<ResolvedConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let hash = compute_hash(&content);

    let config: UpdaterConfig =
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
    config.validate()?;

    info!(
        target: "config.loaded",
        path = %path.display(),
        hash = %hash,
        "Loaded updater config"
    );

    Ok(ResolvedConfig {
        config,
        path: Some(path.to_path_buf()),
        hash: Some(hash),
    })
}

fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = UpdaterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tool_dir, "updater");
        assert_eq!(config.max_backups, 5);
        assert_eq!(
            config.installer_timeout(),
            Some(std::time::Duration::from_secs(900))
        );
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let resolved = load_config(&ConfigOptions {
            root: temp.path().to_path_buf(),
            config_path: None,
        })
        .unwrap();
        assert!(resolved.path.is_none());
        assert_eq!(resolved.config, UpdaterConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let tool = temp.path().join("updater");
        fs::create_dir_all(&tool).unwrap();
        fs::write(
            tool.join(CONFIG_FILE_NAME),
            r#"{"max_backups": 2, "installer": {"program": "pnpm"}}"#,
        )
        .unwrap();

        let resolved = load_config(&ConfigOptions {
            root: temp.path().to_path_buf(),
            config_path: None,
        })
        .unwrap();
        assert_eq!(resolved.config.max_backups, 2);
        assert_eq!(resolved.config.installer.program, "pnpm");
        assert_eq!(resolved.config.installer.timeout_secs, 900);
        assert_eq!(resolved.config.manifest_file, "package.json");
        assert_eq!(resolved.hash.as_ref().map(|h| h.len()), Some(64));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let temp = TempDir::new().unwrap();
        let err = load_config(&ConfigOptions {
            root: temp.path().to_path_buf(),
            config_path: Some(temp.path().join("missing.json")),
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cfg.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_from_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_escaping_patterns() {
        let mut config = UpdaterConfig::default();
        config.protected_patterns.push("../outside".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "protected_patterns"
        ));

        let mut config = UpdaterConfig::default();
        config.protected_patterns.push("/etc/passwd".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_nested_tool_dir() {
        let config = UpdaterConfig {
            tool_dir: "a/b".to_string(),
            ..UpdaterConfig::default()
        };
        assert!(config.validate().is_err());

        let config = UpdaterConfig {
            max_backups: 0,
            ..UpdaterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unextractable_extensions() {
        let config = UpdaterConfig {
            archive_extensions: vec!["zip".to_string(), "tar.gz".to_string()],
            ..UpdaterConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "archive_extensions"
        ));

        let config = UpdaterConfig {
            archive_extensions: vec!["ZIP".to_string()],
            ..UpdaterConfig::default()
        };
        config.validate().unwrap();
    }
}
