//! In-place updater core library
//!
//! This library provides the core functionality of `update-tool`:
//! - Configuration loading and validation
//! - Structured logging and per-session run logs
//! - Progress events for embedding hosts
//! - The update engine (validation, backups, replacement, rollback)
//! - Exit codes for CLI operations
//!
//! The binary entry point is in `main.rs`.

pub mod config;
pub mod events;
pub mod exit_codes;
pub mod logging;
pub mod update;

pub use update::{UpdateOrchestrator, UpdateReport, UpdateSession, UpdateStatus};
