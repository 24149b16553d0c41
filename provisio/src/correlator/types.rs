//! Command request/result types exchanged with the execution surface.

use chrono::{DateTime, Utc};
use provisio_shared::constants::chain as chain_const;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Process-unique, monotonically increasing command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(pub(crate) u64);

impl CorrelationToken {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}

/// A shell command handed to the execution surface.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub token: CorrelationToken,
    pub command: String,
    pub workdir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub issued_at: DateTime<Utc>,
}

/// What the execution surface reports back for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Set when the surface itself failed (spawn error, signal, lost session).
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
}

impl CommandResult {
    pub fn exited(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            error_code: None,
            error_message: None,
        }
    }

    pub fn surface_error(error_code: i32, message: impl Into<String>) -> Self {
        Self {
            exit_code: chain_const::UNKNOWN_EXIT_CODE,
            error_code: Some(error_code),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Exit code zero and no surface error.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && self.error_code.is_none()
    }
}

/// Value a pending continuation is resolved with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed(CommandResult),
    /// Synthesized when no result arrived within the timeout window.
    TimedOut,
    /// Synthesized when the token was evicted by `stop()`.
    Cancelled,
}
