//! Task: extract the artifact into the prefix.

use crate::ledger::StepId;
use crate::orchestrator::types::StepCtx;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use provisio_shared::errors::{ProvisionError, ProvisionResult};

pub struct InstallTask;

#[async_trait]
impl PipelineTask<StepCtx> for InstallTask {
    async fn run(&self, ctx: StepCtx) -> ProvisionResult<()> {
        let recorded = ctx.context.lock().await.artifact.clone();
        let artifact = match recorded {
            Some(artifact) => artifact,
            // Download may have completed in an earlier process.
            None => {
                let tag = ctx.architecture().await?;
                ctx.fetcher.locate_cached(tag).await?.ok_or_else(|| {
                    ProvisionError::NotFound(format!(
                        "no cached artifact for {}, download must run first",
                        tag
                    ))
                })?
            }
        };

        let prefix = ctx.options.prefix_dir.clone();
        ctx.log(&format!("Installing into {}", prefix.display()));
        ctx.fetcher
            .install(&artifact.path, &prefix, ctx.log_fn(), ctx.cancel_fn())
            .await?;
        ctx.context.lock().await.installed = Some(true);
        Ok(())
    }

    fn name(&self) -> &str {
        StepId::Install.as_str()
    }
}
