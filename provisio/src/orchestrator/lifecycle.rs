//! Session lifecycle: the single-flight run state and its claim guard.

use super::types::OrchestratorInner;
use provisio_shared::errors::ProvisionError;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Notify;

/// Orchestrator run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Stopping,
            _ => RunState::Idle,
        }
    }
}

/// Atomic [`RunState`] plus the stop signal.
///
/// Every transition is a compare-and-set, so two near-simultaneous callers
/// can never both leave `Idle`.
#[derive(Debug)]
pub(crate) struct RunStateCell {
    state: AtomicU8,
    stop_signal: Notify,
}

impl RunStateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::Idle as u8),
            stop_signal: Notify::new(),
        }
    }

    pub(crate) fn load(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn try_transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.load() == RunState::Stopping
    }

    fn reset(&self) {
        self.state.store(RunState::Idle as u8, Ordering::Release);
    }

    /// `Running → Stopping`, waking the worker. False when nothing was running.
    pub(crate) fn request_stop(&self) -> bool {
        if !self.try_transition(RunState::Running, RunState::Stopping) {
            return false;
        }
        self.stop_signal.notify_waiters();
        true
    }

    /// Resolves once the state is `Stopping`.
    pub(crate) async fn stop_requested(&self) {
        loop {
            let notified = self.stop_signal.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent notify_waiters is not lost.
            notified.as_mut().enable();
            if self.load() == RunState::Stopping {
                return;
            }
            notified.await;
        }
    }
}

/// Exclusive claim on the orchestrator (`Idle → Running`).
///
/// Dropping the claim evicts outstanding commands, fails whichever step is
/// still `Running` with `Cancelled`, and returns the state to `Idle`. This
/// also covers a caller dropping the `start()` future mid-session.
pub(crate) struct SessionClaim<'a> {
    inner: &'a OrchestratorInner,
}

impl<'a> SessionClaim<'a> {
    pub(crate) fn acquire(inner: &'a OrchestratorInner) -> Option<Self> {
        inner
            .run_state
            .try_transition(RunState::Idle, RunState::Running)
            .then_some(Self { inner })
    }

    /// Fail the running step, if any, with `Cancelled`.
    pub(crate) fn cancel_running(&self) {
        let evicted = self.inner.correlator.evict_all();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted pending commands");
        }

        let running = self.inner.ledger.lock().running();
        if let Some(id) = running {
            self.inner.log(&format!("{} cancelled", id.label()));
            if let Err(e) = self
                .inner
                .update_step(id, |ledger| ledger.fail(id, &ProvisionError::Cancelled))
            {
                tracing::warn!(step = %id, "Failed to mark step cancelled: {}", e);
            }
        }
    }
}

impl Drop for SessionClaim<'_> {
    fn drop(&mut self) {
        let still_running = self.inner.ledger.lock().running().is_some();
        if still_running {
            tracing::warn!("Session ended with a step still running, cancelling it");
            self.cancel_running();
        }
        self.inner.run_state.reset();
    }
}
