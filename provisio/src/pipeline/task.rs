//! Generic task trait for pipeline execution.

use async_trait::async_trait;
use provisio_shared::errors::ProvisionResult;

/// Trait for tasks that can be executed in a pipeline.
///
/// Tasks borrow `self` so a plan can run again after retry or rerun.
/// The shared context is cloned per task.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    /// Execute the task with the shared pipeline context.
    async fn run(&self, ctx: Ctx) -> ProvisionResult<()>;

    /// Stable task name, used for lookup and logging.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
