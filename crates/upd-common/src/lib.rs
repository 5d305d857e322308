//! Shared types for the in-place updater.
//!
//! This crate provides foundational types shared across the updater crates:
//! - The error taxonomy with stable codes
//! - Session identifiers
//! - CLI output formats

pub mod error;
pub mod id;
pub mod output;

pub use error::{format_error_human, Error, ErrorCategory, Result, StructuredError, SuggestedAction};
pub use id::SessionId;
pub use output::OutputFormat;
