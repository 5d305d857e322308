//! update-tool - in-place updater with backup and rollback
//!
//! The main entry point, handling:
//! - Applying a release archive to the install root (default command)
//! - Dry validation of an archive (`check`)
//! - Packing a release directory (`pack`)
//! - Listing and restoring backups (`backups`, `rollback`)

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use upd_archive::ArchiveWriter;
use upd_common::{format_error_human, Error, OutputFormat, StructuredError};
use upd_core::config::{load_config, ConfigOptions};
use upd_core::events::{HumanProgressWriter, JsonlWriter, NullEmitter, ProgressEmitter};
use upd_core::exit_codes::ExitCode;
use upd_core::logging::config::LOG_LEVEL_ENV;
use upd_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use upd_core::update::tree::RESERVED_PREFIXES;
use upd_core::update::{UpdateOrchestrator, UpdateSession};

/// Apply a release archive in place, keeping user data and a backup
#[derive(Parser)]
#[command(name = "update-tool")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Release archive to install (default: newest archive in the intake directory)
    archive: Option<PathBuf>,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Install root to update
    #[arg(long, global = true, env = "UPD_ROOT", default_value = ".")]
    root: PathBuf,

    /// Explicit updater config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "human")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Diagnostic log format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an archive against the install root without changing it
    Check(CheckArgs),
    /// Pack a release directory into an archive
    Pack(PackArgs),
    /// List backups, newest first
    Backups,
    /// Restore a backup
    Rollback(RollbackArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Release archive to validate
    archive: PathBuf,
}

#[derive(Args, Debug)]
struct PackArgs {
    /// Release directory to pack
    source: PathBuf,

    /// Archive to write
    output: PathBuf,

    /// Top-level directory name inside the archive
    #[arg(long)]
    root_dir: Option<String>,
}

#[derive(Args, Debug)]
struct RollbackArgs {
    /// Restore the newest backup of this version instead of the newest backup
    #[arg(long)]
    version: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    // machine output on stdout keeps diagnostics structured too
    let log_format = cli.global.log_format.or(match cli.global.format {
        OutputFormat::Jsonl => Some(LogFormat::Jsonl),
        _ => None,
    });
    let cli_level = LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet);
    let mut log_config = LogConfig::from_env(cli_level, log_format);
    // progress already goes to stdout; keep stderr to problems unless asked
    if cli_level.is_none()
        && std::env::var_os(LOG_LEVEL_ENV).is_none()
        && std::env::var_os("RUST_LOG").is_none()
    {
        log_config = log_config.with_level(LogLevel::Warn);
    }
    init_logging(&log_config);

    let exit_code = match cli.command {
        None => run_update(&cli.global, cli.archive.as_deref()),
        Some(Commands::Check(args)) => run_check(&cli.global, &args),
        Some(Commands::Pack(args)) => run_pack(&cli.global, &args),
        Some(Commands::Backups) => run_backups(&cli.global),
        Some(Commands::Rollback(args)) => run_rollback(&cli.global, &args),
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Helpers
// ============================================================================

fn use_color(global: &GlobalOpts) -> bool {
    !global.no_color && std::io::stderr().is_terminal()
}

fn progress_emitter(global: &GlobalOpts) -> Arc<dyn ProgressEmitter> {
    match global.format {
        OutputFormat::Jsonl => Arc::new(JsonlWriter::new(std::io::stdout())),
        OutputFormat::Human if !global.quiet => Arc::new(HumanProgressWriter::new(std::io::stdout())),
        _ => Arc::new(NullEmitter),
    }
}

fn build_orchestrator(global: &GlobalOpts) -> Result<UpdateOrchestrator, Error> {
    let resolved = load_config(&ConfigOptions {
        root: global.root.clone(),
        config_path: global.config.clone(),
    })?;
    Ok(UpdateOrchestrator::new(&global.root, resolved.config)?.with_emitter(progress_emitter(global)))
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("cannot serialize output: {}", e),
    }
}

/// Report a failure and return the failure exit code.
fn fail(global: &GlobalOpts, err: &Error, session: Option<&UpdateSession>) -> ExitCode {
    let log_file = session.and_then(|s| s.log_file.as_deref());
    match global.format {
        OutputFormat::Human => {
            eprintln!("{}", format_error_human(err, use_color(global)));
            if let Some(path) = log_file {
                eprintln!("  Log: {}", path.display());
            }
        }
        OutputFormat::Json => print_json(&json!({
            "ok": false,
            "exit_code": ExitCode::Failure.code_name(),
            "error": StructuredError::from(err),
            "session": session,
        })),
        OutputFormat::Jsonl => println!(
            "{}",
            json!({ "event": "error", "error": StructuredError::from(err) })
        ),
    }
    ExitCode::Failure
}

// ============================================================================
// Commands
// ============================================================================

fn run_update(global: &GlobalOpts, archive: Option<&Path>) -> ExitCode {
    let orchestrator = match build_orchestrator(global) {
        Ok(o) => o,
        Err(e) => return fail(global, &e, None),
    };

    match orchestrator.run(archive) {
        Ok(report) => {
            match global.format {
                OutputFormat::Human if !global.quiet => {
                    println!(
                        "Updated {} -> {} (backup {})",
                        report.session.current_version.as_deref().unwrap_or("unknown"),
                        report.session.new_version.as_deref().unwrap_or("unknown"),
                        report.backup.name()
                    );
                    for warning in &report.validation.warnings {
                        println!("  warning: {}", warning);
                    }
                }
                OutputFormat::Json => print_json(&json!({
                    "ok": true,
                    "exit_code": ExitCode::Success.code_name(),
                    "report": report,
                })),
                _ => {}
            }
            ExitCode::Success
        }
        Err(err) => fail(global, &err, orchestrator.last_session().as_ref()),
    }
}

fn run_check(global: &GlobalOpts, args: &CheckArgs) -> ExitCode {
    let orchestrator = match build_orchestrator(global) {
        Ok(o) => o,
        Err(e) => return fail(global, &e, None),
    };
    let result = match orchestrator.check(&args.archive) {
        Ok(r) => r,
        Err(e) => return fail(global, &e, None),
    };

    match global.format {
        OutputFormat::Human => {
            let status = if result.valid { "valid" } else { "invalid" };
            println!("{}: {}", args.archive.display(), status);
            if let Some(version) = result.candidate_version() {
                println!(
                    "  version: {} (installed: {})",
                    version,
                    result.metadata.current_version.as_deref().unwrap_or("unknown")
                );
            }
            if let Some(checksum) = &result.metadata.checksum {
                println!("  sha256:  {}", checksum);
            }
            for issue in &result.errors {
                println!("  error:   {}", issue.message);
            }
            for warning in &result.warnings {
                println!("  warning: {}", warning);
            }
        }
        _ => print_json(&json!({ "ok": result.valid, "validation": result })),
    }
    ExitCode::from(result.valid)
}

fn run_pack(global: &GlobalOpts, args: &PackArgs) -> ExitCode {
    let mut writer = ArchiveWriter::new().skip_prefixes(RESERVED_PREFIXES.iter().copied());
    if let Some(name) = &args.root_dir {
        writer = writer.with_root_dir(name.clone());
    }
    match writer.pack_dir(&args.source, &args.output) {
        Ok(summary) => {
            match global.format {
                OutputFormat::Human => println!(
                    "Packed {} files ({} bytes) into {}",
                    summary.files,
                    summary.bytes,
                    summary.path.display()
                ),
                _ => print_json(&json!({
                    "ok": true,
                    "path": summary.path,
                    "files": summary.files,
                    "bytes": summary.bytes,
                })),
            }
            ExitCode::Success
        }
        Err(e) => fail(global, &Error::ArchiveCorrupt(e.to_string()), None),
    }
}

fn run_backups(global: &GlobalOpts) -> ExitCode {
    let orchestrator = match build_orchestrator(global) {
        Ok(o) => o,
        Err(e) => return fail(global, &e, None),
    };
    let backups = match orchestrator.list_backups() {
        Ok(b) => b,
        Err(e) => return fail(global, &e, None),
    };

    match global.format {
        OutputFormat::Human => {
            if backups.is_empty() {
                println!("No backups in {}", orchestrator.backups().backup_dir().display());
            }
            for backup in &backups {
                println!(
                    "{:<48} {:<12} {}  {} files",
                    backup.name(),
                    backup.version(),
                    backup.metadata.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    backup.metadata.file_count
                );
            }
        }
        _ => print_json(&json!({ "ok": true, "backups": backups })),
    }
    ExitCode::Success
}

fn run_rollback(global: &GlobalOpts, args: &RollbackArgs) -> ExitCode {
    let orchestrator = match build_orchestrator(global) {
        Ok(o) => o,
        Err(e) => return fail(global, &e, None),
    };

    match orchestrator.rollback(args.version.as_deref()) {
        Ok(backup) => {
            match global.format {
                OutputFormat::Human if !global.quiet => {
                    println!("Restored {} (version {})", backup.name(), backup.version())
                }
                OutputFormat::Json => print_json(&json!({
                    "ok": true,
                    "backup": backup,
                    "session": orchestrator.last_session(),
                })),
                _ => {}
            }
            ExitCode::Success
        }
        Err(err) => fail(global, &err, orchestrator.last_session().as_ref()),
    }
}
