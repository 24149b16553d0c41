//! Task: run the dependency install chain.

use crate::ledger::StepId;
use crate::orchestrator::types::StepCtx;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use provisio_shared::errors::ProvisionResult;

pub struct InstallDependenciesTask;

#[async_trait]
impl PipelineTask<StepCtx> for InstallDependenciesTask {
    async fn run(&self, ctx: StepCtx) -> ProvisionResult<()> {
        let log = ctx.log_fn();
        let result = ctx.until_stopped(ctx.chain.run(log.as_ref())).await;
        if ctx.run_state.is_stopping() {
            // A command dispatched after stop's eviction would otherwise linger.
            ctx.correlator.evict_all();
        }
        let state = result?;
        tracing::debug!(phases = ?state.visited, "Install chain finished");
        Ok(())
    }

    fn name(&self) -> &str {
        StepId::InstallDependencies.as_str()
    }
}
