//! Exit codes for the update-tool CLI.
//!
//! The update outcome is binary for automation: 0 when the requested
//! operation finished, 1 for any failure (including a rolled-back update).
//! Argument errors are reported by clap with its own code (2).

/// Exit codes for update-tool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed.
    Success = 0,

    /// Operation failed; details on stderr and in the session log.
    Failure = 1,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    /// Code name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Success => "OK",
            ExitCode::Failure => "ERR_FAILED",
        }
    }
}

impl From<bool> for ExitCode {
    fn from(ok: bool) -> Self {
        if ok {
            ExitCode::Success
        } else {
            ExitCode::Failure
        }
    }
}
