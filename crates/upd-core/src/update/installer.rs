//! Dependency installer invocation and output classification.
//!
//! The installer is an opaque external process. Its output is read line by
//! line as it arrives; [`classify`] turns a line into an optional
//! [`StepHint`] used only to advance progress. Control flow depends solely
//! on the exit status and the timeout.

use crate::config::InstallerConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lines kept in an [`InstallOutcome`]; older lines are dropped.
const MAX_KEPT_LINES: usize = 500;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Phase suggested by one installer output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepHint {
    Resolving,
    Fetching,
    Building,
    Auditing,
    Finished,
    Warning,
    Failed,
}

impl StepHint {
    /// Position inside the install phase, for hints that carry one.
    pub fn progress_fraction(self) -> Option<f32> {
        match self {
            StepHint::Resolving => Some(0.1),
            StepHint::Fetching => Some(0.4),
            StepHint::Building => Some(0.7),
            StepHint::Auditing => Some(0.85),
            StepHint::Finished => Some(1.0),
            StepHint::Warning | StepHint::Failed => None,
        }
    }
}

/// Classify one line of installer output.
pub fn classify(line: &str) -> Option<StepHint> {
    let lower = line.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return None;
    }

    if lower.starts_with("npm err") || lower.starts_with("error") || lower.contains(" err!") {
        return Some(StepHint::Failed);
    }
    if lower.starts_with("npm warn") || lower.starts_with("warn") {
        return Some(StepHint::Warning);
    }
    let mentions_packages = lower.contains(" package");
    if lower.contains("up to date")
        || (mentions_packages
            && (lower.starts_with("added ")
                || lower.starts_with("removed ")
                || lower.starts_with("changed ")))
    {
        return Some(StepHint::Finished);
    }
    if lower.contains("audited") || lower.contains("vulnerabilit") || lower.contains("funding") {
        return Some(StepHint::Auditing);
    }
    if lower.contains("idealtree") || lower.contains("resolv") {
        return Some(StepHint::Resolving);
    }
    if lower.contains("fetch") || lower.contains("download") || lower.contains("reify") {
        return Some(StepHint::Fetching);
    }
    if lower.contains("postinstall")
        || lower.contains("node-gyp")
        || lower.contains("build")
        || lower.contains("linking")
    {
        return Some(StepHint::Building);
    }
    None
}

/// Result of one installer run.
#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub exit_code: Option<i32>,
    pub lines: Vec<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub timed_out: bool,
}

impl InstallOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Last line classified as a failure, else the last line.
    pub fn failure_reason(&self) -> String {
        if self.timed_out {
            return format!("installer timed out after {}s", self.duration.as_secs());
        }
        self.lines
            .iter()
            .rev()
            .find(|l| classify(l) == Some(StepHint::Failed))
            .or_else(|| self.lines.last())
            .cloned()
            .unwrap_or_else(|| "installer exited without output".to_string())
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

/// Something that installs dependencies inside an install root.
pub trait DependencyInstaller: Send + Sync {
    /// Run to completion, reporting each output line as it arrives.
    ///
    /// `Err` means the installer could not be run at all.
    fn install(
        &self,
        root: &Path,
        on_line: &mut dyn FnMut(&str, Option<StepHint>),
    ) -> io::Result<InstallOutcome>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Runs a configured external command.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandInstaller {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    pub fn from_config(config: &InstallerConfig) -> Self {
        let installer = Self::new(config.program.clone(), config.args.clone());
        match config.timeout_secs {
            0 => installer,
            secs => installer.with_timeout(Duration::from_secs(secs)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn pump<R: Read + Send + 'static>(stream: R, tx: mpsc::Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

impl DependencyInstaller for CommandInstaller {
    fn install(
        &self,
        root: &Path,
        on_line: &mut dyn FnMut(&str, Option<StepHint>),
    ) -> io::Result<InstallOutcome> {
        let start = Instant::now();
        let deadline = self.timeout.map(|t| start + t);

        debug!(
            target: "update.install_spawn",
            program = %self.program,
            args = ?self.args,
            cwd = %root.display(),
            "Spawning dependency installer"
        );
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            pump(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump(stderr, tx.clone());
        }
        drop(tx);

        let mut lines: VecDeque<String> = VecDeque::with_capacity(MAX_KEPT_LINES);
        let mut timed_out = false;

        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        timed_out = true;
                        warn!(target: "update.install_timeout", "Installer timed out, killing");
                        let _ = child.kill();
                        break;
                    }
                    (deadline - now).min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };

            match rx.recv_timeout(wait) {
                Ok(line) => {
                    on_line(&line, classify(&line));
                    if lines.len() == MAX_KEPT_LINES {
                        lines.pop_front();
                    }
                    lines.push_back(line);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = child.wait()?;
        Ok(InstallOutcome {
            exit_code: if timed_out { None } else { status.code() },
            lines: lines.into(),
            duration: start.elapsed(),
            timed_out,
        })
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_table() {
        let cases: &[(&str, Option<StepHint>)] = &[
            ("", None),
            ("   ", None),
            ("hello world", None),
            ("npm ERR! code E404", Some(StepHint::Failed)),
            ("npm error code ERESOLVE", Some(StepHint::Failed)),
            ("Error: Cannot find module 'x'", Some(StepHint::Failed)),
            ("gyp ERR! build error", Some(StepHint::Failed)),
            ("npm WARN deprecated request@2.88.2", Some(StepHint::Warning)),
            ("warning: peer dependency missing", Some(StepHint::Warning)),
            ("idealTree:bot: sill idealTree buildDeps", Some(StepHint::Resolving)),
            ("resolving dependencies", Some(StepHint::Resolving)),
            ("http fetch GET 200 https://registry.npmjs.org/lodash", Some(StepHint::Fetching)),
            ("Downloading lodash-4.17.21.tgz", Some(StepHint::Fetching)),
            ("reify:lodash: timing reifyNode", Some(StepHint::Fetching)),
            ("> bot@1.0.0 postinstall", Some(StepHint::Building)),
            ("node-gyp rebuild", Some(StepHint::Building)),
            ("linking binaries", Some(StepHint::Building)),
            ("found 0 vulnerabilities", Some(StepHint::Auditing)),
            ("12 packages are looking for funding", Some(StepHint::Auditing)),
            ("audited 120 packages in 2s", Some(StepHint::Auditing)),
            ("added 12 packages, and audited 13 packages in 2s", Some(StepHint::Finished)),
            ("removed 3 packages in 1s", Some(StepHint::Finished)),
            ("changed 1 package in 900ms", Some(StepHint::Finished)),
            ("up to date, audited 50 packages in 1s", Some(StepHint::Finished)),
        ];
        for (line, expected) in cases {
            assert_eq!(classify(line), *expected, "line: {:?}", line);
        }
    }

    #[test]
    fn test_progress_fraction_is_ordered() {
        let ordered = [
            StepHint::Resolving,
            StepHint::Fetching,
            StepHint::Building,
            StepHint::Auditing,
            StepHint::Finished,
        ];
        let fractions: Vec<f32> = ordered.iter().filter_map(|h| h.progress_fraction()).collect();
        assert_eq!(fractions.len(), ordered.len());
        assert!(fractions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(StepHint::Warning.progress_fraction(), None);
    }

    #[test]
    fn test_failure_reason() {
        let outcome = InstallOutcome {
            exit_code: Some(1),
            lines: vec![
                "npm ERR! code E404".to_string(),
                "npm ERR! 404 Not Found".to_string(),
                "see log".to_string(),
            ],
            duration: Duration::from_millis(5),
            timed_out: false,
        };
        assert!(!outcome.success());
        assert_eq!(outcome.failure_reason(), "npm ERR! 404 Not Found");
    }

    #[test]
    fn test_describe() {
        let installer = CommandInstaller::from_config(&InstallerConfig::default());
        assert_eq!(installer.describe(), "npm install --omit=dev");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let installer = CommandInstaller::new("definitely-not-a-real-installer-binary", vec![]);
        assert!(installer.install(temp.path(), &mut |_, _| {}).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_streams_lines_and_exit_code() {
        let temp = tempfile::TempDir::new().unwrap();
        let installer = CommandInstaller::new(
            "sh",
            vec![
                "-c".to_string(),
                "echo 'added 2 packages in 1s'; echo 'npm ERR! boom' >&2; exit 3".to_string(),
            ],
        );
        let mut seen = Vec::new();
        let outcome = installer
            .install(temp.path(), &mut |line, hint| seen.push((line.to_string(), hint)))
            .unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.success());
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&("added 2 packages in 1s".to_string(), Some(StepHint::Finished))));
        assert!(seen.contains(&("npm ERR! boom".to_string(), Some(StepHint::Failed))));
    }

    #[cfg(unix)]
    #[test]
    fn test_keeps_only_the_newest_lines() {
        let temp = tempfile::TempDir::new().unwrap();
        let installer = CommandInstaller::new(
            "sh",
            vec![
                "-c".to_string(),
                "i=0; while [ $i -lt 600 ]; do echo line$i; i=$((i+1)); done".to_string(),
            ],
        );
        let mut streamed = 0;
        let outcome = installer
            .install(temp.path(), &mut |_, _| streamed += 1)
            .unwrap();
        assert!(outcome.success());
        assert_eq!(streamed, 600);
        assert_eq!(outcome.lines.len(), MAX_KEPT_LINES);
        assert_eq!(outcome.lines.first().map(String::as_str), Some("line100"));
        assert_eq!(outcome.lines.last().map(String::as_str), Some("line599"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_installer() {
        let temp = tempfile::TempDir::new().unwrap();
        let installer = CommandInstaller::new("sleep", vec!["5".to_string()])
            .with_timeout(Duration::from_millis(200));
        let outcome = installer.install(temp.path(), &mut |_, _| {}).unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success());
        assert!(outcome.duration < Duration::from_secs(5));
        assert!(outcome.failure_reason().contains("timed out"));
    }
}
