//! Error taxonomy for provisioning.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across provisio crates.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors produced while provisioning.
///
/// The first block mirrors the failure modes an operator can act on.
/// The second block covers ambient failures (configuration, I/O, bookkeeping).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("download failed: {reason}")]
    DownloadFailed { reason: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("failed to start process: {0}")]
    ProcessStartFailed(String),

    #[error("tool install failed with exit code {exit_code}: {stderr_excerpt}")]
    ToolInstallFailed {
        exit_code: i32,
        stderr_excerpt: String,
    },

    #[error("target install failed with exit code {exit_code}: {stderr_excerpt}")]
    TargetInstallFailed {
        exit_code: i32,
        stderr_excerpt: String,
    },

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("cancelled")]
    Cancelled,

    /// Never surfaced to operators. Stale or duplicate deliveries are logged and dropped.
    #[error("unknown correlation token: {0}")]
    UnknownCorrelationToken(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Field-less classification of [`ProvisionError`], reported in session outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedArchitecture,
    DownloadFailed,
    ChecksumMismatch,
    ProcessStartFailed,
    ToolInstallFailed,
    TargetInstallFailed,
    VerificationFailed,
    TimedOut,
    Cancelled,
    UnknownCorrelationToken,
    Config,
    Storage,
    InvalidState,
    NotFound,
    Internal,
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedArchitecture(_) => ErrorKind::UnsupportedArchitecture,
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::ProcessStartFailed(_) => ErrorKind::ProcessStartFailed,
            Self::ToolInstallFailed { .. } => ErrorKind::ToolInstallFailed,
            Self::TargetInstallFailed { .. } => ErrorKind::TargetInstallFailed,
            Self::VerificationFailed(_) => ErrorKind::VerificationFailed,
            Self::TimedOut(_) => ErrorKind::TimedOut,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::UnknownCorrelationToken(_) => ErrorKind::UnknownCorrelationToken,
            Self::Config(_) => ErrorKind::Config,
            Self::Storage(_) => ErrorKind::Storage,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for [`ProvisionError::DownloadFailed`].
    pub fn download(reason: impl Into<String>) -> Self {
        Self::DownloadFailed {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ProvisionError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Truncate process output to at most `max_chars` characters.
///
/// Cuts on a char boundary so multi-byte output never panics.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
