//! Task: detect the host architecture tag.

use crate::ledger::StepId;
use crate::orchestrator::types::StepCtx;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use provisio_shared::errors::ProvisionResult;

pub struct DetectArchitectureTask;

#[async_trait]
impl PipelineTask<StepCtx> for DetectArchitectureTask {
    async fn run(&self, ctx: StepCtx) -> ProvisionResult<()> {
        let tag = ctx.fetcher.detect_architecture()?;
        ctx.context.lock().await.architecture = Some(tag);
        ctx.log(&format!("Architecture: {}", tag));
        Ok(())
    }

    fn name(&self) -> &str {
        StepId::DetectArchitecture.as_str()
    }
}
