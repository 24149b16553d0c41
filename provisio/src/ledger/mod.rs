//! Step ledger.
//!
//! Holds the ordered provisioning steps and enforces the transition table.
//! The ledger only does bookkeeping; callers own I/O and locking.

mod transitions;

pub use transitions::{StepAction, StepStatus, action_for, next_status};

use chrono::{DateTime, Utc};
use provisio_shared::errors::{ErrorKind, ProvisionError, ProvisionResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a provisioning step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    CheckInstalled,
    DetectArchitecture,
    LocateCached,
    Download,
    Install,
    InstallDependencies,
}

impl StepId {
    pub const ALL: [StepId; 6] = [
        StepId::CheckInstalled,
        StepId::DetectArchitecture,
        StepId::LocateCached,
        StepId::Download,
        StepId::Install,
        StepId::InstallDependencies,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::CheckInstalled => "check_installed",
            StepId::DetectArchitecture => "detect_architecture",
            StepId::LocateCached => "locate_cached",
            StepId::Download => "download",
            StepId::Install => "install",
            StepId::InstallDependencies => "install_dependencies",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepId::CheckInstalled => "Check existing installation",
            StepId::DetectArchitecture => "Detect architecture",
            StepId::LocateCached => "Locate cached artifact",
            StepId::Download => "Download artifact",
            StepId::Install => "Install prefix",
            StepId::InstallDependencies => "Install dependencies",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ProvisionError::NotFound(format!("unknown step '{}'", s)))
    }
}

/// One unit of the provisioning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub label: String,
    pub order: usize,
    pub status: StepStatus,
    pub last_error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Last reported percent for steps that report progress.
    pub progress: u8,
    pub updated_at: DateTime<Utc>,
}

impl Step {
    fn new(id: StepId, order: usize) -> Self {
        Self {
            id,
            label: id.label().to_string(),
            order,
            status: StepStatus::Pending,
            last_error: None,
            error_kind: None,
            progress: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Ordered list of steps with their statuses.
///
/// Invariant: at most one step is `Running`.
#[derive(Debug, Clone)]
pub struct StepLedger {
    steps: Vec<Step>,
}

impl Default for StepLedger {
    fn default() -> Self {
        Self::new(&StepId::ALL)
    }
}

impl StepLedger {
    /// Create a ledger with `ids` in execution order, all `Pending`.
    pub fn new(ids: &[StepId]) -> Self {
        Self {
            steps: ids
                .iter()
                .enumerate()
                .map(|(order, id)| Step::new(*id, order))
                .collect(),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, id: StepId) -> ProvisionResult<&Step> {
        self.steps
            .iter()
            .find(|step| step.id == id)
            .ok_or_else(|| ProvisionError::NotFound(format!("step {} not in ledger", id)))
    }

    fn get_mut(&mut self, id: StepId) -> ProvisionResult<&mut Step> {
        self.steps
            .iter_mut()
            .find(|step| step.id == id)
            .ok_or_else(|| ProvisionError::NotFound(format!("step {} not in ledger", id)))
    }

    /// The step currently running, if any.
    pub fn running(&self) -> Option<StepId> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::Running)
            .map(|step| step.id)
    }

    pub fn is_terminal(&self, id: StepId) -> ProvisionResult<bool> {
        Ok(self.get(id)?.is_terminal())
    }

    /// Move `id` to status `to`.
    ///
    /// Rejected transitions leave the ledger untouched.
    pub fn transition(&mut self, id: StepId, to: StepStatus) -> ProvisionResult<()> {
        let current = self.get(id)?.status;
        let action = action_for(current, to).ok_or_else(|| {
            ProvisionError::InvalidState(format!(
                "step {} cannot move from {:?} to {:?}",
                id, current, to
            ))
        })?;
        self.apply(id, action)
    }

    /// Apply an operator or worker action to `id`.
    pub fn apply(&mut self, id: StepId, action: StepAction) -> ProvisionResult<()> {
        if action == StepAction::Start
            && let Some(running) = self.running()
        {
            return Err(ProvisionError::InvalidState(format!(
                "cannot start {} while {} is running",
                id, running
            )));
        }

        let step = self.get_mut(id)?;
        let old_status = step.status;
        let new_status = next_status(old_status, action).ok_or_else(|| {
            ProvisionError::InvalidState(format!(
                "cannot {:?} step {} in {:?} state",
                action, id, old_status
            ))
        })?;

        if new_status == StepStatus::Pending {
            step.last_error = None;
            step.error_kind = None;
            step.progress = 0;
        }
        step.status = new_status;
        step.updated_at = Utc::now();

        tracing::debug!(
            step = %id,
            old_status = ?old_status,
            new_status = ?new_status,
            "Step transition"
        );
        Ok(())
    }

    /// Mark a running step failed and record its error.
    pub fn fail(&mut self, id: StepId, error: &ProvisionError) -> ProvisionResult<()> {
        self.apply(id, StepAction::Fail)?;
        let step = self.get_mut(id)?;
        step.last_error = Some(error.to_string());
        step.error_kind = Some(error.kind());
        Ok(())
    }

    pub fn set_progress(&mut self, id: StepId, percent: u8) -> ProvisionResult<()> {
        self.get_mut(id)?.progress = percent.min(100);
        Ok(())
    }

    /// Reset every step to `Pending`, dropping recorded errors.
    pub fn reset(&mut self) {
        for step in &mut self.steps {
            *step = Step::new(step.id, step.order);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_ledger() -> StepLedger {
        StepLedger::new(&[StepId::DetectArchitecture, StepId::Download])
    }

    #[test]
    fn test_new_ledger_is_pending_in_order() {
        let ledger = StepLedger::default();
        assert_eq!(ledger.steps().len(), StepId::ALL.len());
        for (order, step) in ledger.steps().iter().enumerate() {
            assert_eq!(step.order, order);
            assert_eq!(step.status, StepStatus::Pending);
        }
    }

    #[test]
    fn test_only_one_running() {
        let mut ledger = create_test_ledger();
        ledger
            .transition(StepId::DetectArchitecture, StepStatus::Running)
            .unwrap();

        let result = ledger.transition(StepId::Download, StepStatus::Running);
        assert!(result.unwrap_err().to_string().contains("is running"));
        assert_eq!(
            ledger.get(StepId::Download).unwrap().status,
            StepStatus::Pending
        );
    }

    #[test]
    fn test_complete_requires_running() {
        let mut ledger = create_test_ledger();
        let result = ledger.transition(StepId::Download, StepStatus::Completed);
        assert!(matches!(result, Err(ProvisionError::InvalidState(_))));
    }

    #[test]
    fn test_skip_from_pending() {
        let mut ledger = create_test_ledger();
        ledger
            .transition(StepId::Download, StepStatus::Skipped)
            .unwrap();
        assert!(ledger.is_terminal(StepId::Download).unwrap());
    }

    #[test]
    fn test_fail_records_error_and_rerun_clears_it() {
        let mut ledger = create_test_ledger();
        ledger.apply(StepId::Download, StepAction::Start).unwrap();
        ledger.set_progress(StepId::Download, 42).unwrap();
        ledger
            .fail(StepId::Download, &ProvisionError::download("HTTP 503"))
            .unwrap();

        let step = ledger.get(StepId::Download).unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error_kind, Some(ErrorKind::DownloadFailed));
        assert!(step.last_error.as_deref().unwrap().contains("HTTP 503"));

        ledger.apply(StepId::Download, StepAction::Rerun).unwrap();
        let step = ledger.get(StepId::Download).unwrap();
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.last_error.is_none());
        assert!(step.error_kind.is_none());
        assert_eq!(step.progress, 0);
    }

    #[test]
    fn test_rejected_transition_leaves_state() {
        let mut ledger = create_test_ledger();
        assert!(ledger.apply(StepId::Download, StepAction::Retry).is_err());
        assert_eq!(
            ledger.get(StepId::Download).unwrap().status,
            StepStatus::Pending
        );
    }

    #[test]
    fn test_step_id_parse() {
        assert_eq!("download".parse::<StepId>().unwrap(), StepId::Download);
        assert!("bogus".parse::<StepId>().is_err());
    }
}
