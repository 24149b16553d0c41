//! Bridges pipeline task events to the step ledger.

use super::types::StepCtx;
use crate::ledger::{StepAction, StepId, StepStatus};
use crate::pipeline::{TaskDecision, TaskMetrics, TaskObserver};
use parking_lot::Mutex;
use provisio_shared::errors::{ProvisionError, ProvisionResult};

pub(crate) struct StepObserver {
    ctx: StepCtx,
    current: Mutex<Option<StepId>>,
}

impl StepObserver {
    pub(crate) fn new(ctx: StepCtx) -> Self {
        Self {
            ctx,
            current: Mutex::new(None),
        }
    }

    /// Last step the executor reached.
    pub(crate) fn current(&self) -> Option<StepId> {
        *self.current.lock()
    }
}

impl TaskObserver for StepObserver {
    fn before_task(&self, name: &str) -> ProvisionResult<TaskDecision> {
        let id: StepId = name.parse()?;
        if self.ctx.run_state.is_stopping() {
            return Err(ProvisionError::Cancelled);
        }
        *self.current.lock() = Some(id);

        let step = self.ctx.ledger.lock().get(id)?.clone();
        match step.status {
            status if status.is_settled() => Ok(TaskDecision::Skip),
            // No auto-advance past a failure; an operator must act first.
            StepStatus::Failed => Err(ProvisionError::InvalidState(format!(
                "step {} failed: {}",
                id,
                step.last_error.as_deref().unwrap_or("unknown error")
            ))),
            _ => {
                self.ctx
                    .update_step(id, |ledger| ledger.apply(id, StepAction::Start))?;
                self.ctx.log(&format!("==> {}", id.label()));
                Ok(TaskDecision::Run)
            }
        }
    }

    fn after_task(&self, name: &str, result: &ProvisionResult<()>, metrics: &TaskMetrics) {
        let Ok(id) = name.parse::<StepId>() else {
            return;
        };

        let update = match result {
            Ok(()) => {
                tracing::debug!(step = %id, duration_ms = metrics.duration_ms as u64, "Step completed");
                self.ctx.update_step(id, |ledger| {
                    if id == StepId::Download {
                        ledger.set_progress(id, 100)?;
                    }
                    ledger.apply(id, StepAction::Complete)
                })
            }
            Err(e) => {
                tracing::error!(
                    step = %id,
                    error_kind = ?e.kind(),
                    duration_ms = metrics.duration_ms as u64,
                    "Step failed: {}",
                    e
                );
                self.ctx.log(&format!("{} failed: {}", id.label(), e));
                self.ctx.update_step(id, |ledger| ledger.fail(id, e))
            }
        };

        if let Err(e) = update {
            tracing::warn!(step = %id, "Failed to record step result: {}", e);
        }
    }
}
