//! One pipeline task per provisioning step.

mod architecture;
mod check_installed;
mod dependencies;
mod download;
mod install;
mod locate_cached;

use super::types::StepCtx;
use crate::pipeline::{BoxedTask, ExecutionPlan};

use architecture::DetectArchitectureTask;
use check_installed::CheckInstalledTask;
use dependencies::InstallDependenciesTask;
use download::DownloadTask;
use install::InstallTask;
use locate_cached::LocateCachedTask;

/// The fixed step order.
pub(crate) fn execution_plan() -> ExecutionPlan<StepCtx> {
    let tasks: Vec<BoxedTask<StepCtx>> = vec![
        Box::new(CheckInstalledTask),
        Box::new(DetectArchitectureTask),
        Box::new(LocateCachedTask),
        Box::new(DownloadTask),
        Box::new(InstallTask),
        Box::new(InstallDependenciesTask),
    ];
    ExecutionPlan::new(tasks)
}
