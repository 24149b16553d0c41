//! Step status and the shared `(status, action) → status` table.

use serde::{Deserialize, Serialize};

/// Status of a single provisioning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl StepStatus {
    /// Completed, Skipped and Failed are terminal until an operator acts.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Skipped | StepStatus::Failed
        )
    }

    /// Whether `start()` walks past a step in this status without running it.
    pub fn is_settled(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Actions that move a step between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepAction {
    Start,
    Complete,
    Fail,
    Skip,
    Retry,
    Rerun,
}

impl StepAction {
    pub const ALL: [StepAction; 6] = [
        StepAction::Start,
        StepAction::Complete,
        StepAction::Fail,
        StepAction::Skip,
        StepAction::Retry,
        StepAction::Rerun,
    ];
}

/// Transition table shared by every step.
///
/// Returns `None` when `action` is not allowed from `current`.
pub fn next_status(current: StepStatus, action: StepAction) -> Option<StepStatus> {
    use StepAction::*;
    use StepStatus::*;

    match (current, action) {
        (Pending, Start) => Some(Running),
        (Running, Complete) => Some(Completed),
        (Running, Fail) => Some(Failed),
        (Pending | Failed, Skip) => Some(Skipped),
        (Failed, Retry) => Some(Pending),
        (Completed | Skipped | Failed, Rerun) => Some(Pending),
        _ => None,
    }
}

/// Find the action that moves `current` to `to`, if any.
///
/// Retry is preferred over Rerun for `Failed → Pending` since it has no side effects.
pub fn action_for(current: StepStatus, to: StepStatus) -> Option<StepAction> {
    StepAction::ALL
        .into_iter()
        .find(|action| next_status(current, *action) == Some(to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_only_from_pending() {
        assert_eq!(
            next_status(StepStatus::Pending, StepAction::Start),
            Some(StepStatus::Running)
        );
        assert_eq!(next_status(StepStatus::Failed, StepAction::Start), None);
        assert_eq!(next_status(StepStatus::Completed, StepAction::Start), None);
    }

    #[test]
    fn test_complete_and_fail_require_running() {
        for status in [
            StepStatus::Pending,
            StepStatus::Completed,
            StepStatus::Skipped,
            StepStatus::Failed,
        ] {
            assert_eq!(next_status(status, StepAction::Complete), None);
            assert_eq!(next_status(status, StepAction::Fail), None);
        }
    }

    #[test]
    fn test_rerun_from_every_terminal_status() {
        for status in [
            StepStatus::Completed,
            StepStatus::Skipped,
            StepStatus::Failed,
        ] {
            assert!(status.is_terminal());
            assert_eq!(
                next_status(status, StepAction::Rerun),
                Some(StepStatus::Pending)
            );
        }
        assert_eq!(next_status(StepStatus::Running, StepAction::Rerun), None);
    }

    #[test]
    fn test_action_for_prefers_retry() {
        assert_eq!(
            action_for(StepStatus::Failed, StepStatus::Pending),
            Some(StepAction::Retry)
        );
        assert_eq!(
            action_for(StepStatus::Completed, StepStatus::Pending),
            Some(StepAction::Rerun)
        );
        assert_eq!(action_for(StepStatus::Running, StepStatus::Skipped), None);
    }
}
