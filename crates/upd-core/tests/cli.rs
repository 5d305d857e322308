//! CLI tests for update-tool.
//!
//! These tests drive the binary against temporary install roots and check
//! exit codes and output.

mod common;

use assert_cmd::Command;
use common::*;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the update-tool binary.
fn update_tool() -> Command {
    let mut cmd = Command::cargo_bin("update-tool").expect("update-tool binary should exist");
    cmd.env_remove("UPD_ROOT")
        .env_remove("UPD_CONFIG")
        .env_remove("UPD_LOG")
        .env_remove("RUST_LOG");
    cmd
}

// ============================================================================
// Argument handling
// ============================================================================

mod arguments {
    use super::*;

    #[test]
    fn help_lists_subcommands() {
        update_tool()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("rollback"))
            .stdout(predicate::str::contains("check"));
    }

    #[test]
    fn unknown_flag_fails() {
        update_tool()
            .arg("--nonexistent-flag")
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }
}

// ============================================================================
// Update command
// ============================================================================

mod update {
    use super::*;

    #[test]
    fn missing_package_exits_one() {
        let root = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");

        update_tool()
            .arg("--root")
            .arg(root.path())
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Package Not Found"))
            .stderr(predicate::str::contains("Log:"));

        assert!(read(root.path(), "package.json").contains("1.0.0"));
    }

    #[test]
    fn missing_package_json_output() {
        let root = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");

        let output = update_tool()
            .arg("--root")
            .arg(root.path())
            .args(["--format", "json"])
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1));

        let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(doc["ok"], false);
        assert_eq!(doc["error"]["code"], 10);
        assert_eq!(doc["session"]["status"], "failed");
    }

    #[test]
    fn downgrade_exits_one() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "2.0.0");
        let archive = build_release(downloads.path(), "1.0.0");

        update_tool()
            .arg("--root")
            .arg(root.path())
            .arg(&archive)
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Version Downgrade Rejected"));
    }

    #[cfg(unix)]
    #[test]
    fn update_succeeds_with_configured_installer() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");
        let archive = build_release(downloads.path(), "2.0.0");
        let config = downloads.path().join("updater.json");
        write(
            downloads.path(),
            "updater.json",
            r#"{"installer": {"program": "sh", "args": ["-c", "echo added 1 package in 1s"]}}"#,
        );

        update_tool()
            .arg("--root")
            .arg(root.path())
            .arg("--config")
            .arg(&config)
            .arg(&archive)
            .assert()
            .success()
            .stdout(predicate::str::contains("replacing-files"))
            .stdout(predicate::str::contains("Updated 1.0.0 -> 2.0.0"));

        assert!(read(root.path(), "package.json").contains("2.0.0"));
        assert_eq!(read(root.path(), ".env"), "TOKEN=abc");

        update_tool()
            .arg("--root")
            .arg(root.path())
            .arg("backups")
            .assert()
            .success()
            .stdout(predicate::str::contains("1.0.0"));

        update_tool()
            .arg("--root")
            .arg(root.path())
            .arg("--config")
            .arg(&config)
            .arg("rollback")
            .assert()
            .success()
            .stdout(predicate::str::contains("Restored"));

        assert!(read(root.path(), "package.json").contains("1.0.0"));
    }

    #[cfg(unix)]
    #[test]
    fn jsonl_streams_progress_events() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");
        let archive = build_release(downloads.path(), "2.0.0");
        write(
            downloads.path(),
            "updater.json",
            r#"{"installer": {"program": "true", "args": []}}"#,
        );

        let output = update_tool()
            .arg("--root")
            .arg(root.path())
            .arg("--config")
            .arg(downloads.path().join("updater.json"))
            .args(["--format", "jsonl"])
            .arg(&archive)
            .output()
            .unwrap();
        assert!(output.status.success());

        let events: Vec<serde_json::Value> = String::from_utf8(output.stdout)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.first().unwrap()["event"], "session_started");
        assert_eq!(events.last().unwrap()["event"], "session_completed");
        let percents: Vec<u64> = events.iter().map(|e| e["percent"].as_u64().unwrap()).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]), "{:?}", percents);
        assert_eq!(events.last().unwrap()["status"], "completed");
        assert_eq!(percents.last(), Some(&100));
    }
}

// ============================================================================
// Other commands
// ============================================================================

mod commands {
    use super::*;

    #[test]
    fn pack_then_check() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        install_tree(root.path(), "1.5.0");
        release_tree(&work.path().join("release"), "2.0.0");
        let archive = work.path().join("Bot-v2.0.0.zip");

        update_tool()
            .arg("pack")
            .arg(work.path().join("release"))
            .arg(&archive)
            .args(["--root-dir", "Bot"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Packed"));

        update_tool()
            .arg("--root")
            .arg(root.path())
            .arg("check")
            .arg(&archive)
            .assert()
            .success()
            .stdout(predicate::str::contains("valid"))
            .stdout(predicate::str::contains("2.0.0"));

        // check never touches the live tree
        assert!(read(root.path(), "package.json").contains("1.5.0"));
    }

    #[test]
    fn pack_skips_reserved_entries() {
        let work = TempDir::new().unwrap();
        let source = work.path().join("release");
        release_tree(&source, "2.0.0");
        write(&source, ".update-staging/leftover.js", "x");
        write(&source, ".tmp-42", "x");
        let archive = work.path().join("Bot-v2.0.0.zip");

        update_tool()
            .arg("pack")
            .arg(&source)
            .arg(&archive)
            .assert()
            .success();

        let out = work.path().join("out");
        upd_archive::extract(&archive, &out).unwrap();
        assert!(out.join("package.json").is_file());
        assert!(!out.join(".update-staging").exists());
        assert!(!out.join(".tmp-42").exists());
    }

    #[test]
    fn check_rejects_downgrade() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "3.0.0");
        let archive = build_release(downloads.path(), "2.0.0");

        update_tool()
            .arg("--root")
            .arg(root.path())
            .arg("check")
            .arg(&archive)
            .assert()
            .code(1)
            .stdout(predicate::str::contains("invalid"));
    }

    #[test]
    fn backups_empty() {
        let root = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");

        update_tool()
            .arg("--root")
            .arg(root.path())
            .arg("backups")
            .assert()
            .success()
            .stdout(predicate::str::contains("No backups"));
    }

    #[test]
    fn rollback_without_backups_fails() {
        let root = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");

        update_tool()
            .arg("--root")
            .arg(root.path())
            .arg("rollback")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Backup Not Found"));
    }
}
