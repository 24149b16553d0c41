//! Shared state of an orchestrator and its step tasks.

use super::lifecycle::RunStateCell;
use super::metrics::OrchestratorMetrics;
use super::sink::ProvisionSink;
use crate::chain::DependencyInstallChain;
use crate::config::ProvisionOptions;
use crate::correlator::CommandCorrelator;
use crate::fetcher::{ArchitectureTag, ArtifactFetcher, CachedArtifact, CancelFn, LogFn};
use crate::ledger::{StepAction, StepId, StepLedger, StepStatus};
use crate::pipeline::PipelineMetrics;
use provisio_shared::errors::{ErrorKind, ProvisionError, ProvisionResult};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Overall result of one `start()` session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionOutcome {
    Completed,
    Failed { step: StepId, kind: ErrorKind },
    Cancelled,
}

/// Values produced by one step and consumed by later ones.
///
/// Survives across sessions so a retried step sees what its predecessors
/// produced; rerun of a step clears its slot.
#[derive(Debug, Default)]
pub(crate) struct StepContext {
    pub(crate) architecture: Option<ArchitectureTag>,
    pub(crate) artifact: Option<CachedArtifact>,
    pub(crate) installed: Option<bool>,
    /// Steps skipped automatically, keyed by the step that skipped them.
    pub(crate) auto_skipped: HashMap<StepId, Vec<StepId>>,
}

/// Everything a step task can reach.
pub(crate) struct OrchestratorInner {
    pub(crate) options: ProvisionOptions,
    pub(crate) fetcher: ArtifactFetcher,
    pub(crate) chain: DependencyInstallChain,
    pub(crate) correlator: CommandCorrelator,
    pub(crate) ledger: parking_lot::Mutex<StepLedger>,
    pub(crate) context: tokio::sync::Mutex<StepContext>,
    pub(crate) sink: Arc<dyn ProvisionSink>,
    pub(crate) run_state: RunStateCell,
    pub(crate) metrics: OrchestratorMetrics,
    pub(crate) last_pipeline: parking_lot::Mutex<Option<PipelineMetrics>>,
}

/// Context handed to every step task.
pub(crate) type StepCtx = Arc<OrchestratorInner>;

impl OrchestratorInner {
    pub(crate) fn log(&self, line: &str) {
        self.sink.on_log(line);
    }

    /// Log callback for blocking or chained work.
    pub(crate) fn log_fn(&self) -> LogFn {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |line: &str| sink.on_log(line))
    }

    /// Stop flag for blocking work, which cannot be dropped mid-flight.
    pub(crate) fn cancel_fn(self: &Arc<Self>) -> CancelFn {
        let inner = Arc::clone(self);
        Arc::new(move || inner.run_state.is_stopping())
    }

    /// Run `work` until it finishes or a stop is requested.
    ///
    /// Only for work that is safe to drop at an await point.
    pub(crate) async fn until_stopped<T>(
        &self,
        work: impl Future<Output = ProvisionResult<T>>,
    ) -> ProvisionResult<T> {
        tokio::select! {
            result = work => result,
            _ = self.run_state.stop_requested() => Err(ProvisionError::Cancelled),
        }
    }

    /// Mutate the ledger for `id` and notify the sink with the new step.
    ///
    /// The ledger lock is released before the sink runs.
    pub(crate) fn update_step(
        &self,
        id: StepId,
        update: impl FnOnce(&mut StepLedger) -> ProvisionResult<()>,
    ) -> ProvisionResult<()> {
        let step = {
            let mut ledger = self.ledger.lock();
            update(&mut ledger)?;
            ledger.get(id)?.clone()
        };
        self.sink.on_step_changed(&step);
        Ok(())
    }

    pub(crate) fn status(&self, id: StepId) -> ProvisionResult<StepStatus> {
        Ok(self.ledger.lock().get(id)?.status)
    }

    /// Skip `targets` because `cause` made them unnecessary.
    ///
    /// Steps that already settled are left alone. The skip is remembered so
    /// rerunning `cause` reopens them.
    pub(crate) async fn auto_skip(&self, cause: StepId, targets: &[StepId], reason: &str) {
        let mut skipped = Vec::new();
        for &target in targets {
            let status = match self.status(target) {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(step = %target, "Cannot auto-skip: {}", e);
                    continue;
                }
            };
            if !matches!(status, StepStatus::Pending | StepStatus::Failed) {
                continue;
            }
            match self.update_step(target, |ledger| ledger.apply(target, StepAction::Skip)) {
                Ok(()) => {
                    self.log(&format!("Skipping {}: {}", target.label(), reason));
                    skipped.push(target);
                }
                Err(e) => tracing::warn!(step = %target, "Auto-skip rejected: {}", e),
            }
        }

        if !skipped.is_empty() {
            self.context
                .lock()
                .await
                .auto_skipped
                .entry(cause)
                .or_default()
                .extend(skipped);
        }
    }

    /// Architecture from the context, detecting it when no step recorded one.
    pub(crate) async fn architecture(&self) -> ProvisionResult<ArchitectureTag> {
        let mut context = self.context.lock().await;
        if let Some(tag) = context.architecture {
            return Ok(tag);
        }
        let tag = self.fetcher.detect_architecture()?;
        context.architecture = Some(tag);
        Ok(tag)
    }

    /// Drop whatever `id` produced so it can run from scratch.
    pub(crate) async fn clear_step_outputs(&self, id: StepId) -> ProvisionResult<()> {
        match id {
            StepId::CheckInstalled => {
                self.context.lock().await.installed = None;
            }
            StepId::DetectArchitecture => {
                self.context.lock().await.architecture = None;
            }
            StepId::LocateCached => {
                self.context.lock().await.artifact = None;
            }
            StepId::Download => {
                let tag = self.architecture().await?;
                self.fetcher.clear_cached(tag)?;
                self.context.lock().await.artifact = None;
            }
            StepId::Install => {
                let prefix = &self.options.prefix_dir;
                if prefix.exists() {
                    tracing::info!(prefix = %prefix.display(), "Removing installed prefix");
                    tokio::fs::remove_dir_all(prefix).await?;
                }
                self.context.lock().await.installed = None;
            }
            StepId::InstallDependencies => {}
        }
        Ok(())
    }
}
