//! Serial pipeline execution.
//!
//! Provides a table-driven executor that runs an ordered plan of tasks one at a
//! time, asking an observer before each task whether it should run.

use super::metrics::{PipelineMetrics, TaskMetrics};
use super::task::BoxedTask;
use provisio_shared::errors::ProvisionResult;
use std::time::Instant;

pub struct ExecutionPlan<Ctx> {
    tasks: Vec<BoxedTask<Ctx>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self { tasks }
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|task| task.name())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Observer verdict for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDecision {
    Run,
    Skip,
}

/// Hooks around every task of a pipeline run.
pub trait TaskObserver: Send + Sync {
    /// Decide whether `name` runs. An error halts the pipeline before the task.
    fn before_task(&self, name: &str) -> ProvisionResult<TaskDecision>;

    /// Called with the task's result before the executor propagates it.
    fn after_task(&self, name: &str, result: &ProvisionResult<()>, metrics: &TaskMetrics);
}

/// Pipeline executor framework.
///
/// This provides the generic infrastructure for executing a table-driven pipeline.
/// The actual task execution logic is provided by task implementations.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute a plan.
    ///
    /// Iterates tasks in order and stops at the first failure; there is no
    /// automatic retry. Generic over:
    /// - `Ctx`: Shared pipeline context (use interior mutability for writes)
    pub async fn execute<Ctx>(
        plan: &ExecutionPlan<Ctx>,
        ctx: Ctx,
        observer: &dyn TaskObserver,
    ) -> ProvisionResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut task_metrics = Vec::with_capacity(plan.tasks.len());

        for task in &plan.tasks {
            let name = task.name().to_string();

            if observer.before_task(&name)? == TaskDecision::Skip {
                tracing::trace!(task = %name, "Skipping task");
                task_metrics.push(TaskMetrics {
                    name,
                    duration_ms: 0,
                    skipped: true,
                });
                continue;
            }

            let task_start = Instant::now();
            let result = task.run(ctx.clone()).await;
            let metrics = TaskMetrics {
                name,
                duration_ms: task_start.elapsed().as_millis(),
                skipped: false,
            };
            observer.after_task(&metrics.name, &result, &metrics);
            result?;
            task_metrics.push(metrics);
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            tasks: task_metrics,
        })
    }
}
