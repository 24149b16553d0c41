//! Caller-facing progress and log callbacks.

use crate::ledger::Step;

/// Receives progress, log lines and step changes from the worker.
///
/// Called synchronously from the worker, so implementations must be cheap.
/// Marshalling onto another thread is the implementor's concern.
pub trait ProvisionSink: Send + Sync {
    /// `percent` is `None` while the total size is unknown.
    fn on_progress(&self, percent: Option<u8>, transferred: u64, total: Option<u64>);

    fn on_log(&self, line: &str);

    fn on_step_changed(&self, _step: &Step) {}
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProvisionSink for TracingSink {
    fn on_progress(&self, percent: Option<u8>, transferred: u64, total: Option<u64>) {
        tracing::debug!(
            percent = ?percent,
            transferred,
            total = ?total,
            "Download progress"
        );
    }

    fn on_log(&self, line: &str) {
        tracing::info!(target: "provisio::session", "{}", line);
    }

    fn on_step_changed(&self, step: &Step) {
        tracing::info!(
            step = %step.id,
            status = ?step.status,
            error = ?step.last_error,
            "Step changed"
        );
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProvisionSink for NullSink {
    fn on_progress(&self, _percent: Option<u8>, _transferred: u64, _total: Option<u64>) {}

    fn on_log(&self, _line: &str) {}
}
