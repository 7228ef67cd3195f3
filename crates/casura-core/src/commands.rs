// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed commands: the external triggers a case engine accepts.
//!
//! Each command targets exactly one execution (or the case instance root for
//! `Close`) and executes as one unit of work: resolve, authorize, apply,
//! fan out, commit. An unknown target id fails with `NotFound`, never a
//! silent no-op.

use serde::{Deserialize, Serialize};

use crate::lifecycle::Trigger;
use crate::variables::Variables;

/// An external trigger submitted to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaseCommand {
    /// Start a manual-activation node that is ENABLED.
    ManualStart {
        /// Target execution.
        execution_id: String,
    },
    /// Disable an ENABLED manual-activation node.
    Disable {
        /// Target execution.
        execution_id: String,
    },
    /// Re-enable a DISABLED node.
    Reenable {
        /// Target execution.
        execution_id: String,
    },
    /// Complete an ACTIVE node (or a completable composite).
    Complete {
        /// Target execution.
        execution_id: String,
    },
    /// Fire an AVAILABLE milestone or event listener.
    Occur {
        /// Target execution.
        execution_id: String,
    },
    /// Terminate a node and its subtree.
    Terminate {
        /// Target execution.
        execution_id: String,
    },
    /// Mark an ACTIVE node failed.
    Fail {
        /// Target execution.
        execution_id: String,
    },
    /// Suspend a node (cascades through composites).
    Suspend {
        /// Target execution.
        execution_id: String,
    },
    /// Resume a suspended node to its pre-suspension state.
    Resume {
        /// Target execution.
        execution_id: String,
    },
    /// Write variables into an execution's scope.
    SetVariables {
        /// Target execution (scope owner).
        execution_id: String,
        /// Variables to write.
        variables: Variables,
    },
    /// Remove a terminal case instance from the live tree.
    Close {
        /// The case instance to close.
        case_instance_id: String,
    },
}

impl CaseCommand {
    /// The execution (or case instance) id the command targets.
    pub fn target_id(&self) -> &str {
        match self {
            Self::ManualStart { execution_id }
            | Self::Disable { execution_id }
            | Self::Reenable { execution_id }
            | Self::Complete { execution_id }
            | Self::Occur { execution_id }
            | Self::Terminate { execution_id }
            | Self::Fail { execution_id }
            | Self::Suspend { execution_id }
            | Self::Resume { execution_id }
            | Self::SetVariables { execution_id, .. } => execution_id,
            Self::Close { case_instance_id } => case_instance_id,
        }
    }

    /// The state machine trigger this command applies, if it is a plain
    /// transition command.
    pub fn trigger(&self) -> Option<Trigger> {
        Some(match self {
            Self::ManualStart { .. } => Trigger::ManualStart,
            Self::Disable { .. } => Trigger::Disable,
            Self::Reenable { .. } => Trigger::Reenable,
            Self::Complete { .. } => Trigger::Complete,
            Self::Occur { .. } => Trigger::Occur,
            Self::Terminate { .. } => Trigger::Terminate,
            Self::Fail { .. } => Trigger::Fail,
            Self::Suspend { .. } => Trigger::Suspend,
            Self::Resume { .. } => Trigger::Resume,
            Self::SetVariables { .. } | Self::Close { .. } => return None,
        })
    }

    /// Stable command name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ManualStart { .. } => "manual_start",
            Self::Disable { .. } => "disable",
            Self::Reenable { .. } => "reenable",
            Self::Complete { .. } => "complete",
            Self::Occur { .. } => "occur",
            Self::Terminate { .. } => "terminate",
            Self::Fail { .. } => "fail",
            Self::Suspend { .. } => "suspend",
            Self::Resume { .. } => "resume",
            Self::SetVariables { .. } => "set_variables",
            Self::Close { .. } => "close",
        }
    }

    /// Parse a transition command from its REST path segment.
    ///
    /// `set_variables` and `close` have dedicated payloads and are not
    /// reachable through this constructor.
    pub fn from_transition_name(name: &str, execution_id: impl Into<String>) -> Option<Self> {
        let execution_id = execution_id.into();
        Some(match name {
            "manual-start" | "manual_start" => Self::ManualStart { execution_id },
            "disable" => Self::Disable { execution_id },
            "reenable" => Self::Reenable { execution_id },
            "complete" => Self::Complete { execution_id },
            "occur" => Self::Occur { execution_id },
            "terminate" => Self::Terminate { execution_id },
            "fail" => Self::Fail { execution_id },
            "suspend" => Self::Suspend { execution_id },
            "resume" => Self::Resume { execution_id },
            _ => return None,
        })
    }
}

/// What one committed command changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    /// The case instance the command ran against.
    pub case_instance_id: String,
    /// Number of lifecycle transitions the command applied (including
    /// propagation and sentry fan-out).
    pub transitions: u32,
    /// Number of history records the command projected.
    pub history_records: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_mapping() {
        let cmd = CaseCommand::Complete {
            execution_id: "e-1".to_string(),
        };
        assert_eq!(cmd.trigger(), Some(Trigger::Complete));
        assert_eq!(cmd.target_id(), "e-1");
        assert_eq!(cmd.name(), "complete");

        let close = CaseCommand::Close {
            case_instance_id: "c-1".to_string(),
        };
        assert_eq!(close.trigger(), None);
        assert_eq!(close.target_id(), "c-1");
    }

    #[test]
    fn test_from_transition_name() {
        assert_eq!(
            CaseCommand::from_transition_name("manual-start", "e"),
            Some(CaseCommand::ManualStart {
                execution_id: "e".to_string()
            })
        );
        assert_eq!(CaseCommand::from_transition_name("bogus", "e"), None);
    }

    #[test]
    fn test_command_json_round_trip() {
        let cmd = CaseCommand::SetVariables {
            execution_id: "e-1".to_string(),
            variables: Variables::from([(
                "amount".to_string(),
                crate::variables::VariableValue::Integer(12),
            )]),
        };
        let encoded = serde_json::to_string(&cmd).unwrap();
        let decoded: CaseCommand = serde_json::from_str(&encoded).unwrap();
        assert_eq!(cmd, decoded);
    }
}
