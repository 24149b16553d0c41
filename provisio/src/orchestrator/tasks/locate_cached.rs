//! Task: reuse a previously downloaded artifact.

use crate::ledger::StepId;
use crate::orchestrator::types::StepCtx;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use provisio_shared::errors::ProvisionResult;

pub struct LocateCachedTask;

#[async_trait]
impl PipelineTask<StepCtx> for LocateCachedTask {
    async fn run(&self, ctx: StepCtx) -> ProvisionResult<()> {
        let tag = ctx.architecture().await?;
        let cached = ctx.fetcher.locate_cached(tag).await?;

        let Some(artifact) = cached else {
            ctx.log("No usable cached artifact, will download");
            ctx.context.lock().await.artifact = None;
            return Ok(());
        };

        ctx.log(&format!(
            "Using cached artifact {}{}",
            artifact.path.display(),
            if artifact.verified { " (verified)" } else { "" }
        ));
        ctx.context.lock().await.artifact = Some(artifact);
        ctx.auto_skip(StepId::LocateCached, &[StepId::Download], "cache hit")
            .await;
        Ok(())
    }

    fn name(&self) -> &str {
        StepId::LocateCached.as_str()
    }
}
