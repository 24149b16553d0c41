//! Task: download the artifact with throttled progress.

use crate::fetcher::{DownloadProgress, ProgressThrottle};
use crate::ledger::StepId;
use crate::orchestrator::types::StepCtx;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use provisio_shared::errors::ProvisionResult;
use std::time::Instant;

pub struct DownloadTask;

#[async_trait]
impl PipelineTask<StepCtx> for DownloadTask {
    async fn run(&self, ctx: StepCtx) -> ProvisionResult<()> {
        let tag = ctx.architecture().await?;
        ctx.log(&format!("Downloading {}", ctx.fetcher.url_for(tag)));

        let mut throttle = ProgressThrottle::default();
        let reporter = ctx.clone();
        let mut on_progress = move |transferred: u64, total: Option<u64>| {
            let progress = DownloadProgress::new(transferred, total);
            let Some(update) = throttle.offer(progress, Instant::now()) else {
                return;
            };
            if let Some(percent) = update.percent
                && let Err(e) = reporter
                    .ledger
                    .lock()
                    .set_progress(StepId::Download, percent)
            {
                tracing::warn!("Failed to record download progress: {}", e);
            }
            reporter
                .sink
                .on_progress(update.percent, update.transferred, update.total);
        };

        let artifact = ctx
            .until_stopped(ctx.fetcher.download(tag, &mut on_progress))
            .await?;
        ctx.log(&format!("Downloaded {}", artifact.path.display()));
        ctx.context.lock().await.artifact = Some(artifact);
        Ok(())
    }

    fn name(&self) -> &str {
        StepId::Download.as_str()
    }
}
