//! Task: detect an existing installation.
//!
//! A populated prefix makes every artifact step unnecessary.

use crate::ledger::StepId;
use crate::orchestrator::types::StepCtx;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use provisio_shared::errors::ProvisionResult;

pub struct CheckInstalledTask;

#[async_trait]
impl PipelineTask<StepCtx> for CheckInstalledTask {
    async fn run(&self, ctx: StepCtx) -> ProvisionResult<()> {
        let prefix = &ctx.options.prefix_dir;
        let installed = ctx.fetcher.is_installed(prefix);
        ctx.context.lock().await.installed = Some(installed);

        if installed {
            ctx.log(&format!("Runtime already installed at {}", prefix.display()));
            ctx.auto_skip(
                StepId::CheckInstalled,
                &[StepId::LocateCached, StepId::Download, StepId::Install],
                "already installed",
            )
            .await;
        } else {
            ctx.log(&format!("No runtime at {}", prefix.display()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        StepId::CheckInstalled.as_str()
    }
}
