//! Provisioning orchestration.
//!
//! ## Architecture
//!
//! Steps run serially through the pipeline executor in a fixed order:
//!
//! ```text
//!   1. check_installed        (populated prefix → skip 3, 4, 5)
//!   2. detect_architecture
//!   3. locate_cached          (cache hit → skip 4)
//!   4. download               (throttled progress)
//!   5. install
//!   6. install_dependencies   (tool → libraries → target → verify)
//! ```
//!
//! `start()` walks past Completed and Skipped steps and halts on the first
//! Failed one. Nothing is retried automatically; the operator calls
//! `retry`, `skip` or `rerun` and starts again.
//!
//! A single atomic [`RunState`] guards re-entry: only one `start()` can move
//! it out of `Idle`, and `stop()` moves it from `Running` to `Stopping`.

mod lifecycle;
mod metrics;
mod observer;
mod sink;
mod tasks;
mod types;

pub use lifecycle::RunState;
pub use metrics::{OrchestratorMetrics, OrchestratorMetricsSnapshot};
pub use sink::{NullSink, ProvisionSink, TracingSink};
pub use types::SessionOutcome;

use crate::chain::{ChainEnvironment, DependencyInstallChain};
use crate::config::ProvisionOptions;
use crate::correlator::CommandCorrelator;
use crate::fetcher::{ArtifactFetcher, HttpTransport, ReqwestTransport};
use crate::ledger::{Step, StepAction, StepId, StepLedger, StepStatus, next_status};
use crate::pipeline::{ExecutionPlan, PipelineExecutor, PipelineMetrics};
use crate::surface::{ExecutionSurface, LocalShellSurface};
use lifecycle::{RunStateCell, SessionClaim};
use observer::StepObserver;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use std::sync::Arc;
use types::{OrchestratorInner, StepContext, StepCtx};
use uuid::Uuid;

/// Builds a [`ProvisioningOrchestrator`].
///
/// The execution surface and HTTP transport are injected explicitly; the
/// defaults run commands in a local shell and download over HTTPS.
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(options)
///     .sink(Arc::new(TracingSink))
///     .build()?;
/// let outcome = orchestrator.start().await;
/// ```
pub struct OrchestratorBuilder {
    options: ProvisionOptions,
    surface: Option<Arc<dyn ExecutionSurface>>,
    transport: Option<Arc<dyn HttpTransport>>,
    sink: Option<Arc<dyn ProvisionSink>>,
}

impl OrchestratorBuilder {
    pub fn new(options: ProvisionOptions) -> Self {
        Self {
            options,
            surface: None,
            transport: None,
            sink: None,
        }
    }

    /// Register the surface that runs chain commands.
    pub fn surface(mut self, surface: Arc<dyn ExecutionSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ProvisionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> ProvisionResult<ProvisioningOrchestrator> {
        let OrchestratorBuilder {
            options,
            surface,
            transport,
            sink,
        } = self;
        options.sanitize()?;

        let surface = match surface {
            Some(surface) => surface,
            None => Arc::new(LocalShellSurface::new(options.chain.shell.clone())),
        };
        let transport = match transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let sink = sink.unwrap_or_else(|| Arc::new(TracingSink));

        let correlator = CommandCorrelator::new(surface);
        let fetcher = ArtifactFetcher::new(
            options.artifact.clone(),
            options.cache_dir.clone(),
            transport,
        );
        let chain = DependencyInstallChain::new(
            options.chain.clone(),
            correlator.clone(),
            ChainEnvironment {
                prefix: options.prefix_dir.clone(),
                home: options.home_dir.clone(),
            },
        );

        tracing::debug!(
            prefix = %options.prefix_dir.display(),
            cache = %options.cache_dir.display(),
            "Built provisioning orchestrator"
        );

        Ok(ProvisioningOrchestrator {
            inner: Arc::new(OrchestratorInner {
                options,
                fetcher,
                chain,
                correlator,
                ledger: parking_lot::Mutex::new(StepLedger::default()),
                context: tokio::sync::Mutex::new(StepContext::default()),
                sink,
                run_state: RunStateCell::new(),
                metrics: OrchestratorMetrics::default(),
                last_pipeline: parking_lot::Mutex::new(None),
            }),
            plan: Arc::new(tasks::execution_plan()),
        })
    }
}

/// Top-level driver of a provisioning session.
///
/// Cheap to clone; clones share the same ledger and run state, so `stop()`
/// can be called from a task other than the one awaiting `start()`.
#[derive(Clone)]
pub struct ProvisioningOrchestrator {
    inner: StepCtx,
    plan: Arc<ExecutionPlan<StepCtx>>,
}

impl std::fmt::Debug for ProvisioningOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningOrchestrator")
            .field("run_state", &self.run_state())
            .finish()
    }
}

impl ProvisioningOrchestrator {
    pub fn builder(options: ProvisionOptions) -> OrchestratorBuilder {
        OrchestratorBuilder::new(options)
    }

    /// Run every unsettled step in order.
    ///
    /// Returns `None` without doing anything when a session is already
    /// running.
    pub async fn start(&self) -> Option<SessionOutcome> {
        let Some(claim) = SessionClaim::acquire(&self.inner) else {
            self.inner.metrics.increment_rejected();
            tracing::debug!("Provisioning already running, ignoring start");
            return None;
        };
        Some(self.run_session(claim).await)
    }

    /// Drive the plan while holding `claim`.
    ///
    /// A stop does not abandon the executor: each step observes the stop
    /// itself, and blocking work is joined before the claim is released.
    async fn run_session(&self, claim: SessionClaim<'_>) -> SessionOutcome {
        let session_id = Uuid::new_v4();
        self.inner.metrics.increment_started();
        tracing::info!(session_id = %session_id, "Provisioning session started");
        self.inner.log("Starting provisioning");

        let observer = StepObserver::new(Arc::clone(&self.inner));
        let result =
            PipelineExecutor::execute(&self.plan, Arc::clone(&self.inner), &observer).await;
        let stopping = self.inner.run_state.is_stopping();

        let outcome = match result {
            Ok(metrics) => {
                *self.inner.last_pipeline.lock() = Some(metrics);
                SessionOutcome::Completed
            }
            Err(e) if !stopping => self.failure_outcome(&observer, &e),
            Err(_) => {
                claim.cancel_running();
                SessionOutcome::Cancelled
            }
        };

        match outcome {
            SessionOutcome::Completed => {
                self.inner.metrics.increment_completed();
                self.inner.log("Provisioning complete");
            }
            SessionOutcome::Failed { step, kind } => {
                self.inner.metrics.increment_failed();
                self.inner
                    .log(&format!("Provisioning stopped at {} ({:?})", step.label(), kind));
            }
            SessionOutcome::Cancelled => {
                self.inner.metrics.increment_cancelled();
                self.inner.log("Provisioning cancelled");
            }
        }
        tracing::info!(session_id = %session_id, outcome = ?outcome, "Provisioning session finished");

        drop(claim);
        outcome
    }

    fn failure_outcome(&self, observer: &StepObserver, error: &ProvisionError) -> SessionOutcome {
        let failed = self
            .inner
            .ledger
            .lock()
            .steps()
            .iter()
            .find(|step| step.status == StepStatus::Failed)
            .map(|step| (step.id, step.error_kind));

        match failed {
            Some((step, kind)) => SessionOutcome::Failed {
                step,
                kind: kind.unwrap_or_else(|| error.kind()),
            },
            None => SessionOutcome::Failed {
                step: observer.current().unwrap_or(StepId::ALL[0]),
                kind: error.kind(),
            },
        }
    }

    /// `Failed → Pending`, keeping whatever the step already produced, then
    /// run a session.
    ///
    /// Not allowed while a session is running.
    pub async fn retry(&self, id: StepId) -> ProvisionResult<SessionOutcome> {
        let Some(claim) = SessionClaim::acquire(&self.inner) else {
            return Err(ProvisionError::InvalidState(format!(
                "cannot retry {} while provisioning is running",
                id
            )));
        };
        self.inner
            .update_step(id, |ledger| ledger.apply(id, StepAction::Retry))?;
        self.inner.log(&format!("Retrying {}", id.label()));
        Ok(self.run_session(claim).await)
    }

    /// Mark a Pending or Failed step Skipped.
    pub fn skip(&self, id: StepId) -> ProvisionResult<()> {
        self.inner
            .update_step(id, |ledger| ledger.apply(id, StepAction::Skip))?;
        self.inner.log(&format!("Skipped {}", id.label()));
        Ok(())
    }

    /// Return a terminal step to Pending, clearing its error, progress and
    /// outputs. Steps it skipped automatically reopen too.
    ///
    /// Not allowed while a session is running.
    pub async fn rerun(&self, id: StepId) -> ProvisionResult<()> {
        let Some(_claim) = SessionClaim::acquire(&self.inner) else {
            return Err(ProvisionError::InvalidState(format!(
                "cannot rerun {} while provisioning is running",
                id
            )));
        };

        let status = self.inner.status(id)?;
        if next_status(status, StepAction::Rerun).is_none() {
            return Err(ProvisionError::InvalidState(format!(
                "cannot rerun step {} in {:?} state",
                id, status
            )));
        }

        self.inner.clear_step_outputs(id).await?;
        self.inner
            .update_step(id, |ledger| ledger.apply(id, StepAction::Rerun))?;

        let reopened = self
            .inner
            .context
            .lock()
            .await
            .auto_skipped
            .remove(&id)
            .unwrap_or_default();
        for dependent in reopened {
            if self.inner.status(dependent)? == StepStatus::Skipped {
                self.inner
                    .update_step(dependent, |ledger| ledger.apply(dependent, StepAction::Rerun))?;
            }
        }

        self.inner.log(&format!("Reset {}", id.label()));
        Ok(())
    }

    /// Drop what `id` produced (cached files, installed prefix) without
    /// changing its status.
    ///
    /// Lets a fresh process force a step to redo its work before `start()`.
    pub async fn discard_outputs(&self, id: StepId) -> ProvisionResult<()> {
        let Some(_claim) = SessionClaim::acquire(&self.inner) else {
            return Err(ProvisionError::InvalidState(format!(
                "cannot discard {} outputs while provisioning is running",
                id
            )));
        };
        self.inner.clear_step_outputs(id).await?;
        self.inner.log(&format!("Discarded outputs of {}", id.label()));
        Ok(())
    }

    /// Cancel the running session.
    ///
    /// Evicts pending commands (killing their processes) and lets the worker
    /// mark the running step Failed with `Cancelled`. An extraction in
    /// progress stops at its next archive entry; `start()` returns once it
    /// has. Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        if !self.inner.run_state.request_stop() {
            return false;
        }
        let evicted = self.inner.correlator.evict_all();
        tracing::info!(evicted, "Stop requested");
        self.inner.log("Stopping provisioning");
        true
    }

    pub fn run_state(&self) -> RunState {
        self.inner.run_state.load()
    }

    /// Current steps, for display.
    pub fn snapshot(&self) -> Vec<Step> {
        self.inner.ledger.lock().steps().to_vec()
    }

    pub fn step(&self, id: StepId) -> ProvisionResult<Step> {
        Ok(self.inner.ledger.lock().get(id)?.clone())
    }

    pub fn metrics(&self) -> OrchestratorMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Step timings of the last session that completed.
    pub fn last_pipeline_metrics(&self) -> Option<PipelineMetrics> {
        self.inner.last_pipeline.lock().clone()
    }

    /// Correlator for surfaces that deliver results out of band.
    pub fn correlator(&self) -> &CommandCorrelator {
        &self.inner.correlator
    }

    pub fn fetcher(&self) -> &ArtifactFetcher {
        &self.inner.fetcher
    }

    pub fn options(&self) -> &ProvisionOptions {
        &self.inner.options
    }
}
