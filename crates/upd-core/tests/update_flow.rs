//! End-to-end update sessions against temporary install roots.

mod common;

use common::*;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use upd_common::Error;
use upd_core::config::UpdaterConfig;
use upd_core::events::{event_names, RecordingEmitter};
use upd_core::update::validator::IssueKind;
use upd_core::update::{
    copy_tree, ExclusionSet, PackageValidator, UpdateOrchestrator, UpdateStatus,
};

const TOOL_DIR: &str = "updater";

fn orchestrator(root: &TempDir, installer: FakeInstaller) -> (UpdateOrchestrator, Arc<RecordingEmitter>) {
    let events = Arc::new(RecordingEmitter::new());
    let orch = UpdateOrchestrator::new(root.path(), UpdaterConfig::default())
        .unwrap()
        .with_installer(Box::new(installer))
        .with_emitter(events.clone());
    (orch, events)
}

// ============================================================================
// Validation scenarios
// ============================================================================

mod validation {
    use super::*;

    #[test]
    fn newer_release_is_valid() {
        let dir = TempDir::new().unwrap();
        let archive = build_release(dir.path(), "2.0.0");
        let release = dir.path().join("staging-2.0.0");

        let validator = PackageValidator::from_config(&UpdaterConfig::default());
        let result = validator.validate_full(&archive, &release, Some("1.5.0"));

        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.errors_of(IssueKind::VersionDowngradeRejected).count(), 0);
        assert_eq!(result.candidate_version(), Some("2.0.0"));
        assert_eq!(result.metadata.checksum.as_ref().map(|c| c.len()), Some(64));
    }

    #[test]
    fn older_release_is_rejected_once() {
        let dir = TempDir::new().unwrap();
        let archive = build_release(dir.path(), "1.0.0");
        let release = dir.path().join("staging-1.0.0");

        let validator = PackageValidator::from_config(&UpdaterConfig::default());
        let result = validator.validate_full(&archive, &release, Some("2.0.0"));

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, IssueKind::VersionDowngradeRejected);
    }
}

// ============================================================================
// Full sessions
// ============================================================================

mod sessions {
    use super::*;

    #[test]
    fn update_replaces_everything_but_protected_paths() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.5.0");
        let archive = build_release(downloads.path(), "2.0.0");
        let before = snapshot(root.path(), &[TOOL_DIR]);

        let (orch, events) = orchestrator(&root, FakeInstaller::ok());
        let report = orch.run(Some(&archive)).unwrap();
        assert!(report.session.succeeded());

        let after = snapshot(root.path(), &[TOOL_DIR]);
        let release = snapshot(&downloads.path().join("staging-2.0.0"), &[]);
        let protected = [
            "config/config.json",
            "data/state/db.json",
            "plugins/custom/index.js",
            ".env",
        ];
        let cache = ["node_modules/dep/index.js"];

        // protected files and the dependency cache are byte-identical
        for rel in protected.iter().chain(cache.iter()) {
            assert_eq!(after.get(*rel), before.get(*rel), "{}", rel);
        }
        // everything else is exactly the release
        let rest: Vec<(&String, &Vec<u8>)> = after
            .iter()
            .filter(|(k, _)| !protected.contains(&k.as_str()) && !cache.contains(&k.as_str()))
            .collect();
        let expected: Vec<(&String, &Vec<u8>)> = release.iter().collect();
        assert_eq!(rest, expected);

        let percents: Vec<u8> = events.events().iter().map(|e| e.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]), "{:?}", percents);
        assert_eq!(percents.last(), Some(&100));
    }

    #[test]
    fn installer_failure_restores_previous_version() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.5.0");
        let archive = build_release(downloads.path(), "2.0.0");
        let before = snapshot(root.path(), &[TOOL_DIR]);

        let (orch, events) = orchestrator(&root, FakeInstaller::failing());
        let err = orch.run(Some(&archive)).unwrap_err();

        assert!(err.was_rolled_back());
        assert!(matches!(
            err.root_cause(),
            Error::DependencyInstallFailed { code: Some(1), .. }
        ));
        assert_eq!(snapshot(root.path(), &[TOOL_DIR]), before);
        assert!(read(root.path(), "package.json").contains("1.5.0"));

        let session = orch.last_session().unwrap();
        assert_eq!(session.status, UpdateStatus::Failed);
        assert!(events
            .events()
            .iter()
            .any(|e| e.event == event_names::ROLLBACK_COMPLETE));
    }

    #[test]
    fn wrong_installed_version_restores_previous_version() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.5.0");
        let archive = build_release(downloads.path(), "2.0.0");
        let before = snapshot(root.path(), &[TOOL_DIR]);

        let (orch, events) = orchestrator(&root, FakeInstaller::rewriting_manifest("3.0.0"));
        let err = orch.run(Some(&archive)).unwrap_err();

        assert!(matches!(err, Error::RolledBack { ref step, .. } if step == "verifying"));
        assert!(matches!(
            err.root_cause(),
            Error::PostUpdateVerificationFailed(_)
        ));
        assert_eq!(snapshot(root.path(), &[TOOL_DIR]), before);
        assert!(read(root.path(), "package.json").contains("1.5.0"));

        let statuses = events.statuses();
        assert!(statuses.contains(&UpdateStatus::Verifying));
        assert_eq!(statuses.last(), Some(&UpdateStatus::Failed));
        let percents: Vec<u8> = events.events().iter().map(|e| e.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]), "{:?}", percents);
    }

    #[cfg(unix)]
    #[test]
    fn real_installer_exit_code_triggers_rollback() {
        use upd_core::update::CommandInstaller;

        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.5.0");
        let archive = build_release(downloads.path(), "2.0.0");

        let installer = CommandInstaller::new(
            "sh",
            vec!["-c".to_string(), "echo 'npm ERR! code E404'; exit 1".to_string()],
        );
        let orch = UpdateOrchestrator::new(root.path(), UpdaterConfig::default())
            .unwrap()
            .with_installer(Box::new(installer));

        let err = orch.run(Some(&archive)).unwrap_err();
        match err {
            Error::RolledBack { step, cause } => {
                assert_eq!(step, "installing-dependencies");
                assert!(cause.to_string().contains("E404"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(read(root.path(), "package.json").contains("1.5.0"));
    }

    #[test]
    fn downgrade_touches_nothing() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "2.0.0");
        let archive = build_release(downloads.path(), "1.0.0");
        let before = snapshot(root.path(), &[TOOL_DIR]);

        let (orch, events) = orchestrator(&root, FakeInstaller::ok());
        let err = orch.run(Some(&archive)).unwrap_err();

        assert!(matches!(err, Error::VersionDowngradeRejected { .. }));
        assert!(!err.was_rolled_back());
        assert_eq!(snapshot(root.path(), &[TOOL_DIR]), before);
        assert!(orch.list_backups().unwrap().is_empty());
        assert!(!events.statuses().contains(&UpdateStatus::BackingUp));
    }

    #[test]
    fn same_version_reinstalls_with_warning() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "2.0.0");
        let archive = build_release(downloads.path(), "2.0.0");

        let (orch, _) = orchestrator(&root, FakeInstaller::ok());
        let report = orch.run(Some(&archive)).unwrap();

        assert!(report
            .validation
            .warnings
            .iter()
            .any(|w| w.contains("reinstalling")));
        assert_eq!(read(root.path(), "src/index.js"), "console.log('new')");
        assert_eq!(read(root.path(), "config/config.json"), r#"{"token":"secret"}"#);
    }

    #[test]
    fn unknown_installed_version_still_updates() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");
        std::fs::remove_file(root.path().join("package.json")).unwrap();
        let archive = build_release(downloads.path(), "2.0.0");

        let (orch, _) = orchestrator(&root, FakeInstaller::ok());
        let report = orch.run(Some(&archive)).unwrap();

        assert_eq!(report.session.current_version, None);
        assert_eq!(report.backup.version(), "unknown");
        assert!(read(root.path(), "package.json").contains("2.0.0"));
    }

    #[test]
    fn corrupt_archive_fails_before_backup() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");
        let archive = downloads.path().join("Bot-v2.0.0.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();

        let (orch, _) = orchestrator(&root, FakeInstaller::ok());
        let err = orch.run(Some(&archive)).unwrap_err();

        assert!(matches!(err, Error::ArchiveCorrupt(_)));
        assert_eq!(err.code(), 11);
        assert!(orch.list_backups().unwrap().is_empty());
    }

    #[test]
    fn retention_keeps_newest_backups() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");
        let config = UpdaterConfig {
            max_backups: 2,
            ..UpdaterConfig::default()
        };
        let orch = UpdateOrchestrator::new(root.path(), config)
            .unwrap()
            .with_installer(Box::new(FakeInstaller::ok()));

        for version in ["1.1.0", "1.2.0", "1.3.0"] {
            let archive = build_release(downloads.path(), version);
            orch.run(Some(&archive)).unwrap();
        }

        let backups = orch.list_backups().unwrap();
        assert_eq!(backups.len(), 2);
        let versions: Vec<&str> = backups.iter().map(|b| b.version()).collect();
        assert!(versions.contains(&"1.2.0"));
        assert!(!versions.contains(&"1.0.0"));
    }

    #[test]
    fn concurrent_start_is_busy() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");
        let archive = build_release(downloads.path(), "2.0.0");
        let (orch, _) = orchestrator(&root, FakeInstaller::ok());
        let orch = Arc::new(orch);

        let guard = orch.try_acquire().unwrap();
        let worker = {
            let orch = Arc::clone(&orch);
            let archive = archive.clone();
            thread::spawn(move || orch.run(Some(&archive)).map(|_| ()))
        };
        assert!(matches!(worker.join().unwrap(), Err(Error::SessionBusy)));
        drop(guard);

        assert!(orch.run(Some(&archive)).is_ok());
    }
}

// ============================================================================
// Tree primitives
// ============================================================================

mod tree {
    use super::*;

    #[test]
    fn copy_into_own_subdirectory_is_rejected() {
        let root = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");
        let before = snapshot(root.path(), &[]);

        let dest = root.path().join("nested");
        let err = copy_tree(root.path(), &dest, &ExclusionSet::new()).unwrap_err();
        let err: Error = err.into();

        assert!(matches!(err, Error::RecursiveCopyRejected { .. }));
        assert!(!dest.exists());
        assert_eq!(snapshot(root.path(), &[]), before);
    }

    #[test]
    fn copy_into_excluded_subdirectory_is_allowed() {
        let root = TempDir::new().unwrap();
        install_tree(root.path(), "1.0.0");

        let dest = root.path().join(TOOL_DIR).join("copy");
        let exclude = ExclusionSet::new().top_level([TOOL_DIR]);
        let stats = copy_tree(root.path(), &dest, &exclude).unwrap();

        assert!(stats.files > 0);
        assert_eq!(read(&dest, "src/index.js"), "console.log('old')");
        assert!(!dest.join(TOOL_DIR).exists());
    }
}
