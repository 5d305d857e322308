//! In-place update engine.
//!
//! Leaf components (version comparison, validation, protection, backups,
//! tree copy, dependency install) are usable on their own; the
//! [`UpdateOrchestrator`] ties them into one session with rollback.

pub mod backup;
pub mod installer;
pub mod layout;
pub mod orchestrator;
pub mod package;
pub mod protection;
pub mod session;
pub mod tree;
pub mod validator;
pub mod version;

pub use backup::{Backup, BackupManager, BackupMetadata};
pub use installer::{CommandInstaller, DependencyInstaller, InstallOutcome, StepHint};
pub use layout::InstallLayout;
pub use orchestrator::{CancelHandle, UpdateOrchestrator, UpdateReport};
pub use package::{locate_package, UpdatePackage, Workspace};
pub use protection::{ProtectedPath, ProtectionResolver};
pub use session::{SessionKind, SessionLock, UpdateSession, UpdateStatus};
pub use tree::{copy_tree, ExclusionSet};
pub use validator::{PackageMetadata, PackageValidator, ValidationResult};
