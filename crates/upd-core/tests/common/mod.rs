//! Shared fixtures for updater integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use upd_archive::ArchiveWriter;
use upd_core::update::installer::classify;
use upd_core::update::{DependencyInstaller, InstallOutcome, StepHint};

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

/// A live install at version `version` with user data and a dependency cache.
pub fn install_tree(root: &Path, version: &str) {
    write(
        root,
        "package.json",
        &format!(r#"{{"name":"bot","version":"{}"}}"#, version),
    );
    write(root, "src/index.js", "console.log('old')");
    write(root, "src/lib/util.js", "module.exports = 1");
    write(root, "README.md", "old readme");
    write(root, "config/config.json", r#"{"token":"secret"}"#);
    write(root, "config/notes.txt", "not protected");
    write(root, "data/state/db.json", "rows");
    write(root, "plugins/custom/index.js", "plugin");
    write(root, ".env", "TOKEN=abc");
    write(root, "node_modules/dep/index.js", "dep");
}

/// Lay out a release tree at `dir` for `version`.
pub fn release_tree(dir: &Path, version: &str) {
    write(
        dir,
        "package.json",
        &format!(r#"{{"name":"bot","version":"{}"}}"#, version),
    );
    write(dir, "src/index.js", "console.log('new')");
    write(dir, "src/feature.js", "feature");
    write(dir, "README.md", "new readme");
    write(dir, "config/defaults.json", "{}");
}

/// Pack a release for `version` as `<dir>/Bot-v<version>.zip`.
pub fn build_release(dir: &Path, version: &str) -> PathBuf {
    let staging = dir.join(format!("staging-{}", version));
    release_tree(&staging, version);
    let archive = dir.join(format!("Bot-v{}.zip", version));
    ArchiveWriter::new()
        .with_root_dir("Bot")
        .pack_dir(&staging, &archive)
        .unwrap();
    archive
}

/// Every regular file under `root` with its content, skipping the named
/// top-level entries.
pub fn snapshot(root: &Path, skip_top: &[&str]) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    walk(root, root, skip_top, &mut files);
    files
}

fn walk(root: &Path, dir: &Path, skip_top: &[&str], out: &mut BTreeMap<String, Vec<u8>>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let rel = path
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if skip_top.iter().any(|s| rel == *s) {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, skip_top, out);
        } else {
            out.insert(rel, fs::read(&path).unwrap());
        }
    }
}

/// Installer double that replays canned output.
pub struct FakeInstaller {
    pub exit_code: i32,
    pub lines: Vec<String>,
    /// Version written into the live manifest during the install.
    pub manifest_version: Option<String>,
}

impl FakeInstaller {
    pub fn ok() -> Self {
        Self {
            exit_code: 0,
            lines: vec![
                "npm http fetch GET 200 https://registry.npmjs.org/left-pad".to_string(),
                "added 1 package, and audited 2 packages in 1s".to_string(),
            ],
            manifest_version: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            exit_code: 1,
            lines: vec!["npm ERR! code ERESOLVE".to_string()],
            manifest_version: None,
        }
    }

    /// Succeeds but leaves the manifest at `version`.
    pub fn rewriting_manifest(version: &str) -> Self {
        Self {
            manifest_version: Some(version.to_string()),
            ..Self::ok()
        }
    }
}

impl DependencyInstaller for FakeInstaller {
    fn install(
        &self,
        root: &Path,
        on_line: &mut dyn FnMut(&str, Option<StepHint>),
    ) -> io::Result<InstallOutcome> {
        for line in &self.lines {
            on_line(line, classify(line));
        }
        if let Some(version) = &self.manifest_version {
            fs::write(
                root.join("package.json"),
                format!(r#"{{"name":"bot","version":"{}"}}"#, version),
            )?;
        }
        Ok(InstallOutcome {
            exit_code: Some(self.exit_code),
            lines: self.lines.clone(),
            duration: Duration::from_millis(1),
            timed_out: false,
        })
    }

    fn describe(&self) -> String {
        "fake installer".to_string()
    }
}
