//! Table-driven step execution.
//!
//! This module provides the step runner used by the orchestrator:
//! - An ordered execution plan of named tasks
//! - An observer consulted before and after every task (skip, halt, record)
//! - Per-task timing metrics
//!
//! ## Architecture
//!
//! ```text
//! ExecutionPlan → Tasks (serial, one at a time)
//!
//! - ExecutionPlan: Fixed order of tasks, reusable across runs
//! - TaskObserver: Decides Run/Skip per task and sees every result
//! - Task: Atomic unit of work
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pipeline::{ExecutionPlan, PipelineExecutor};
//!
//! let plan = ExecutionPlan::new(vec![Box::new(TaskA), Box::new(TaskB)]);
//! let metrics = PipelineExecutor::execute(&plan, ctx, &observer).await?;
//! println!("pipeline took {}ms", metrics.total_duration_ms);
//! ```

mod executor;
mod metrics;
mod task;

pub use executor::{ExecutionPlan, PipelineExecutor, TaskDecision, TaskObserver};
pub use metrics::{PipelineMetrics, TaskMetrics};
pub use task::{BoxedTask, PipelineTask};
