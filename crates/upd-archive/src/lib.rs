//! Release archive handling for the in-place updater.
//!
//! A release archive is a ZIP file containing, at some nesting depth, a
//! directory with the product manifest and the rest of the release tree.
//!
//! # Example
//!
//! ```no_run
//! use upd_archive::{extract, find_manifest_root, sha256_file, ArchiveWriter};
//! use std::path::Path;
//!
//! ArchiveWriter::new()
//!     .with_root_dir("Bot")
//!     .pack_dir(Path::new("build"), Path::new("Bot-v2.0.0.zip"))
//!     .unwrap();
//!
//! let checksum = sha256_file(Path::new("Bot-v2.0.0.zip")).unwrap();
//! extract(Path::new("Bot-v2.0.0.zip"), Path::new("scratch")).unwrap();
//! let release_root = find_manifest_root(Path::new("scratch"), "package.json", 4);
//! ```

pub mod checksum;
pub mod error;
pub mod reader;
pub mod writer;

pub use checksum::sha256_file;
pub use error::{ArchiveError, Result};
pub use reader::{
    extract, find_manifest_root, is_supported_archive, ArchiveReader, ExtractSummary,
    SUPPORTED_EXTENSIONS,
};
pub use writer::{ArchiveWriter, PackSummary};
