// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The execution node lifecycle state machine.
//!
//! ```text
//!                  ┌───────────┐
//!                  │ AVAILABLE │
//!                  └─────┬─────┘
//!                 enable │   occur (milestone / event listener)
//!                        ▼
//!                  ┌───────────┐  disable   ┌──────────┐
//!                  │  ENABLED  │───────────►│ DISABLED │
//!                  └─────┬─────┘◄───────────└──────────┘
//!      manual_start /    │        reenable
//!             start      ▼
//!                  ┌───────────┐  suspend   ┌───────────┐
//!                  │  ACTIVE   │───────────►│ SUSPENDED │
//!                  └─────┬─────┘◄───────────└───────────┘
//!                        │        resume (to prior state)
//!        ┌───────────────┼────────────────┐
//!        ▼               ▼                ▼
//!  ┌───────────┐  ┌────────────┐    ┌──────────┐
//!  │ COMPLETED │  │ TERMINATED │    │  FAILED  │
//!  └───────────┘  └────────────┘    └──────────┘
//! ```
//!
//! Transitions are a pure function of (behavior kind, current state,
//! trigger). Side effects — parent notification, sentry evaluation, history
//! emission — are decided by the behavior dispatcher, never here.

use serde::{Deserialize, Serialize};

use crate::plan::BehaviorKind;

/// Lifecycle state of an execution node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    /// Instantiated, entry criteria not yet satisfied.
    Available,
    /// Entry criteria satisfied, awaiting (manual) activation.
    Enabled,
    /// Manually deactivated; can be re-enabled.
    Disabled,
    /// Work in progress.
    Active,
    /// Paused; resumes to the pre-suspension state.
    Suspended,
    /// Finished successfully (milestones: occurred). Terminal.
    Completed,
    /// Ended by an exit criterion or terminate command. Terminal.
    Terminated,
    /// Ended abnormally. Terminal.
    Failed,
}

impl LifecycleState {
    /// Stable lowercase name, used in persistence and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    /// Parse a state from its persisted name.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "available" => Self::Available,
            "enabled" => Self::Enabled,
            "disabled" => Self::Disabled,
            "active" => Self::Active,
            "suspended" => Self::Suspended,
            "completed" => Self::Completed,
            "terminated" => Self::Terminated,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    /// Whether this state is terminal (no trigger leaves it).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Failed)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state machine trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    /// Entry criterion satisfied: AVAILABLE → ENABLED.
    Enable,
    /// Manual deactivation: ENABLED → DISABLED (manual-activation nodes).
    Disable,
    /// Undo a disable: DISABLED → ENABLED.
    Reenable,
    /// Operator starts a manual-activation node: ENABLED → ACTIVE.
    ManualStart,
    /// Automatic activation: ENABLED → ACTIVE.
    Start,
    /// Work finished: ACTIVE → COMPLETED.
    Complete,
    /// Milestone/event listener fires: AVAILABLE → COMPLETED.
    Occur,
    /// Explicit termination command.
    Terminate,
    /// Forced termination via a satisfied exit criterion (cascades).
    Exit,
    /// Abnormal end: ACTIVE → FAILED.
    Fail,
    /// Pause: ACTIVE/ENABLED → SUSPENDED.
    Suspend,
    /// Unpause: SUSPENDED → pre-suspension state.
    Resume,
    /// Suspension cascading down from a suspended ancestor.
    ParentSuspend,
    /// Resume cascading down from a resumed ancestor.
    ParentResume,
}

impl Trigger {
    /// Stable lowercase name, used in the command API and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Reenable => "reenable",
            Self::ManualStart => "manual_start",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Occur => "occur",
            Self::Terminate => "terminate",
            Self::Exit => "exit",
            Self::Fail => "fail",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::ParentSuspend => "parent_suspend",
            Self::ParentResume => "parent_resume",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a legal transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionTarget {
    /// A fixed target state.
    To(LifecycleState),
    /// The state recorded before suspension (resume semantics).
    ToPreSuspensionState,
}

/// Compute the target of applying `trigger` to a node of `kind` in `current`.
///
/// Returns `None` for an illegal transition; the caller reports it with the
/// execution id attached and leaves state untouched. Terminal states accept
/// no trigger at all.
pub fn transition(
    kind: BehaviorKind,
    current: LifecycleState,
    trigger: Trigger,
) -> Option<TransitionTarget> {
    use LifecycleState::*;
    use TransitionTarget::*;
    use Trigger::*;

    if current.is_terminal() {
        return None;
    }

    // Termination is legal from every non-terminal state, for every kind.
    if matches!(trigger, Terminate | Exit) {
        return Some(To(Terminated));
    }

    let target = match kind {
        BehaviorKind::Task | BehaviorKind::Stage => match (current, trigger) {
            (Available, Enable) => To(Enabled),
            (Enabled, Disable) => To(Disabled),
            (Disabled, Reenable) => To(Enabled),
            (Enabled, ManualStart | Start) => To(Active),
            (Active, Complete) => To(Completed),
            (Active, Fail) => To(Failed),
            (Enabled | Active, Suspend | ParentSuspend) => To(Suspended),
            (Available, ParentSuspend) => To(Suspended),
            (Suspended, Resume | ParentResume) => ToPreSuspensionState,
            _ => return None,
        },
        BehaviorKind::Milestone | BehaviorKind::EventListener => match (current, trigger) {
            (Available, Occur) => To(Completed),
            (Available, Suspend | ParentSuspend) => To(Suspended),
            (Suspended, Resume | ParentResume) => ToPreSuspensionState,
            _ => return None,
        },
        BehaviorKind::CaseRoot => match (current, trigger) {
            (Active, Complete) => To(Completed),
            (Active, Fail) => To(Failed),
            (Active, Suspend) => To(Suspended),
            (Suspended, Resume) => ToPreSuspensionState,
            _ => return None,
        },
    };

    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;
    use Trigger::*;

    fn task(current: LifecycleState, trigger: Trigger) -> Option<TransitionTarget> {
        transition(BehaviorKind::Task, current, trigger)
    }

    #[test]
    fn test_task_happy_path() {
        assert_eq!(
            task(Available, Enable),
            Some(TransitionTarget::To(Enabled))
        );
        assert_eq!(task(Enabled, Start), Some(TransitionTarget::To(Active)));
        assert_eq!(
            task(Active, Complete),
            Some(TransitionTarget::To(Completed))
        );
    }

    #[test]
    fn test_manual_activation_path() {
        assert_eq!(
            task(Enabled, Disable),
            Some(TransitionTarget::To(Disabled))
        );
        assert_eq!(
            task(Disabled, Reenable),
            Some(TransitionTarget::To(Enabled))
        );
        assert_eq!(
            task(Enabled, ManualStart),
            Some(TransitionTarget::To(Active))
        );
    }

    #[test]
    fn test_completing_available_node_is_illegal() {
        assert_eq!(task(Available, Complete), None);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for state in [Completed, Terminated, Failed] {
            for trigger in [
                Enable, Disable, Reenable, ManualStart, Start, Complete, Occur, Terminate, Exit,
                Fail, Suspend, Resume, ParentSuspend, ParentResume,
            ] {
                assert_eq!(
                    task(state, trigger),
                    None,
                    "{:?} must not leave terminal {:?}",
                    trigger,
                    state
                );
            }
        }
    }

    #[test]
    fn test_terminate_legal_from_all_non_terminal_states() {
        for state in [Available, Enabled, Disabled, Active, Suspended] {
            assert_eq!(
                task(state, Terminate),
                Some(TransitionTarget::To(Terminated))
            );
            assert_eq!(task(state, Exit), Some(TransitionTarget::To(Terminated)));
        }
    }

    #[test]
    fn test_suspend_resume_round_trip() {
        assert_eq!(task(Active, Suspend), Some(TransitionTarget::To(Suspended)));
        assert_eq!(
            task(Suspended, Resume),
            Some(TransitionTarget::ToPreSuspensionState)
        );
        assert_eq!(task(Enabled, Suspend), Some(TransitionTarget::To(Suspended)));
    }

    #[test]
    fn test_milestone_occurs_from_available_only() {
        let milestone = |s, t| transition(BehaviorKind::Milestone, s, t);
        assert_eq!(
            milestone(Available, Occur),
            Some(TransitionTarget::To(Completed))
        );
        assert_eq!(milestone(Available, Enable), None);
        assert_eq!(milestone(Available, Start), None);
    }

    #[test]
    fn test_case_root_lifecycle() {
        let root = |s, t| transition(BehaviorKind::CaseRoot, s, t);
        assert_eq!(root(Active, Complete), Some(TransitionTarget::To(Completed)));
        assert_eq!(root(Active, Fail), Some(TransitionTarget::To(Failed)));
        assert_eq!(
            root(Active, Terminate),
            Some(TransitionTarget::To(Terminated))
        );
        assert_eq!(root(Active, Enable), None);
    }

    #[test]
    fn test_state_name_round_trip() {
        for state in [
            Available, Enabled, Disabled, Active, Suspended, Completed, Terminated, Failed,
        ] {
            assert_eq!(LifecycleState::parse(state.as_str()), Some(state));
        }
        assert_eq!(LifecycleState::parse("bogus"), None);
    }
}
