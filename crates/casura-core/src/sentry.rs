// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Criteria (sentry) evaluation.
//!
//! Sentries are stateless guards attached to plan items. On every variable
//! write and every plan item transition the evaluator collects the sentries
//! whose on-part matches the event, evaluates their if-parts against the
//! current variable scope and sibling snapshot, and reports which entry and
//! exit criteria newly became satisfied. Evaluation order across sentries on
//! the same event is unspecified; guards must be side-effect-free.

use crate::execution::CaseTree;
use crate::plan::{Guard, PlanItemEvent, PlanItemId, PlanModel, Sentry, SentryDirection};
use crate::variables::compare;

/// The event that triggers sentry re-evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum SentryEvent {
    /// A plan item's execution transitioned.
    PlanItemTransition {
        /// The plan item that transitioned.
        source: PlanItemId,
        /// The lifecycle event it emitted.
        event: PlanItemEvent,
    },
    /// One or more variables were written.
    VariableWrite,
}

/// Criteria that newly became satisfied for one event.
#[derive(Debug, Default, PartialEq)]
pub struct SatisfiedCriteria {
    /// Plan items whose entry criterion fired (AVAILABLE nodes to enable).
    pub entries: Vec<PlanItemId>,
    /// Plan items whose exit criterion fired (force termination, cascading).
    pub exits: Vec<PlanItemId>,
}

impl SatisfiedCriteria {
    /// Whether nothing fired.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.exits.is_empty()
    }
}

/// Evaluate all sentries of `plan` against `tree` for one event.
///
/// Entry criteria are only reported for live AVAILABLE executions; exit
/// criteria only for live non-terminal executions. Activation downstream is
/// idempotent per node, so duplicate reports across events are harmless.
pub fn evaluate(plan: &PlanModel, tree: &CaseTree, event: &SentryEvent) -> SatisfiedCriteria {
    let mut satisfied = SatisfiedCriteria::default();

    for (item_id, direction, sentry) in plan.iter_sentries() {
        if !matches_event(sentry, event) {
            continue;
        }

        let Some(node) = tree.node_for_plan_item(item_id) else {
            continue;
        };
        let relevant = match direction {
            SentryDirection::Entry => node.state == crate::lifecycle::LifecycleState::Available,
            SentryDirection::Exit => !node.state.is_terminal(),
        };
        if !relevant {
            continue;
        }

        // Guards read variables through the owning execution's scope chain.
        if let Some(guard) = &sentry.if_part
            && !guard_satisfied(guard, tree, &node.id)
        {
            continue;
        }

        match direction {
            SentryDirection::Entry => satisfied.entries.push(item_id.clone()),
            SentryDirection::Exit => satisfied.exits.push(item_id.clone()),
        }
    }

    satisfied
}

/// An on-part sentry matches exactly its (source, event) pair; a sentry
/// without an on-part is re-evaluated on every event.
fn matches_event(sentry: &Sentry, event: &SentryEvent) -> bool {
    match &sentry.on_part {
        None => true,
        Some(on_part) => match event {
            SentryEvent::PlanItemTransition { source, event } => {
                on_part.source == *source && on_part.event == *event
            }
            SentryEvent::VariableWrite => false,
        },
    }
}

/// Evaluate a guard against the tree snapshot.
fn guard_satisfied(guard: &Guard, tree: &CaseTree, scope_execution_id: &str) -> bool {
    match guard {
        Guard::VariableCmp { name, op, value } => tree
            .variable(scope_execution_id, name)
            .and_then(|current| compare(current, *op, value))
            .unwrap_or(false),
        Guard::SiblingInState { plan_item, state } => tree
            .node_for_plan_item(plan_item)
            .is_some_and(|node| node.state == *state),
        Guard::All(guards) => guards
            .iter()
            .all(|g| guard_satisfied(g, tree, scope_execution_id)),
        Guard::Any(guards) => guards
            .iter()
            .any(|g| guard_satisfied(g, tree, scope_execution_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionNode;
    use crate::lifecycle::LifecycleState;
    use crate::plan::{PlanItem, PlanModel};
    use crate::variables::{Comparison, VariableValue};
    use std::collections::HashMap;

    /// Root with a task and a milestone that waits for the task to complete
    /// while the amount is large enough.
    fn guarded_plan() -> PlanModel {
        PlanModel::builder("credit", "Credit check")
            .root("case1", ["task1", "ms1"])
            .add(PlanItem::task("task1", "Score applicant").required())
            .add(
                PlanItem::milestone("ms1", "Applicant scored").with_entry_criterion(
                    Sentry::on_event("task1", PlanItemEvent::Complete).with_guard(
                        Guard::VariableCmp {
                            name: "amount".to_string(),
                            op: Comparison::GreaterThanOrEqual,
                            value: VariableValue::Integer(100),
                        },
                    ),
                ),
            )
            .build()
            .unwrap()
    }

    fn tree_with_amount(amount: i64) -> CaseTree {
        let mut root = ExecutionNode::new("case-1", "case1", None, LifecycleState::Active);
        root.id = "case-1".to_string();
        let mut task = ExecutionNode::new(
            "case-1",
            "task1",
            Some("case-1".to_string()),
            LifecycleState::Active,
        );
        task.id = "exec-task".to_string();
        let mut ms = ExecutionNode::new(
            "case-1",
            "ms1",
            Some("case-1".to_string()),
            LifecycleState::Available,
        );
        ms.id = "exec-ms".to_string();

        let mut variables = HashMap::new();
        variables.insert(
            "case-1".to_string(),
            HashMap::from([("amount".to_string(), VariableValue::Integer(amount))]),
        );
        CaseTree::from_parts("case-1", vec![root, task, ms], variables)
    }

    fn task_completed() -> SentryEvent {
        SentryEvent::PlanItemTransition {
            source: "task1".to_string(),
            event: PlanItemEvent::Complete,
        }
    }

    #[test]
    fn test_entry_fires_on_matching_event_and_guard() {
        let plan = guarded_plan();
        let tree = tree_with_amount(500);
        let satisfied = evaluate(&plan, &tree, &task_completed());
        assert_eq!(satisfied.entries, vec!["ms1".to_string()]);
        assert!(satisfied.exits.is_empty());
    }

    #[test]
    fn test_guard_blocks_satisfaction() {
        let plan = guarded_plan();
        let tree = tree_with_amount(50);
        assert!(evaluate(&plan, &tree, &task_completed()).is_empty());
    }

    #[test]
    fn test_wrong_event_does_not_match() {
        let plan = guarded_plan();
        let tree = tree_with_amount(500);
        let event = SentryEvent::PlanItemTransition {
            source: "task1".to_string(),
            event: PlanItemEvent::Terminate,
        };
        assert!(evaluate(&plan, &tree, &event).is_empty());
        assert!(evaluate(&plan, &tree, &SentryEvent::VariableWrite).is_empty());
    }

    #[test]
    fn test_entry_ignored_when_node_not_available() {
        let plan = guarded_plan();
        let mut tree = tree_with_amount(500);
        tree.set_state("exec-ms", LifecycleState::Completed).unwrap();
        assert!(evaluate(&plan, &tree, &task_completed()).is_empty());
    }

    #[test]
    fn test_pure_if_part_sentry_fires_on_variable_write() {
        let plan = PlanModel::builder("limits", "Limit monitor")
            .root("case1", ["t1", "stage1"])
            .add(PlanItem::task("t1", "Watch"))
            .add(
                PlanItem::stage("stage1", "Escalation", Vec::<String>::new()).with_entry_criterion(
                    Sentry::when(Guard::VariableCmp {
                        name: "breaches".to_string(),
                        op: Comparison::GreaterThan,
                        value: VariableValue::Integer(3),
                    }),
                ),
            )
            .build()
            .unwrap();

        let mut root = ExecutionNode::new("c", "case1", None, LifecycleState::Active);
        root.id = "c".to_string();
        let mut stage = ExecutionNode::new(
            "c",
            "stage1",
            Some("c".to_string()),
            LifecycleState::Available,
        );
        stage.id = "exec-stage".to_string();
        let mut tree = CaseTree::from_parts("c", vec![root, stage], HashMap::new());

        tree.set_variable("c", "breaches", VariableValue::Integer(2));
        assert!(evaluate(&plan, &tree, &SentryEvent::VariableWrite).is_empty());

        tree.set_variable("c", "breaches", VariableValue::Integer(4));
        let satisfied = evaluate(&plan, &tree, &SentryEvent::VariableWrite);
        assert_eq!(satisfied.entries, vec!["stage1".to_string()]);
    }

    #[test]
    fn test_exit_criterion_reported_for_live_node() {
        let plan = PlanModel::builder("k", "n")
            .root("case1", ["stage1", "ev1"])
            .add(
                PlanItem::stage("stage1", "Work", Vec::<String>::new()).with_exit_criterion(
                    Sentry::on_event("ev1", PlanItemEvent::Occur),
                ),
            )
            .add(PlanItem::event_listener("ev1", "Cancel requested"))
            .build()
            .unwrap();

        let mut root = ExecutionNode::new("c", "case1", None, LifecycleState::Active);
        root.id = "c".to_string();
        let mut stage =
            ExecutionNode::new("c", "stage1", Some("c".to_string()), LifecycleState::Active);
        stage.id = "exec-stage".to_string();
        let mut ev = ExecutionNode::new(
            "c",
            "ev1",
            Some("c".to_string()),
            LifecycleState::Available,
        );
        ev.id = "exec-ev".to_string();
        let tree = CaseTree::from_parts("c", vec![root, stage, ev], HashMap::new());

        let event = SentryEvent::PlanItemTransition {
            source: "ev1".to_string(),
            event: PlanItemEvent::Occur,
        };
        let satisfied = evaluate(&plan, &tree, &event);
        assert_eq!(satisfied.exits, vec!["stage1".to_string()]);
    }

    #[test]
    fn test_sibling_state_guard() {
        let guard = Guard::All(vec![
            Guard::SiblingInState {
                plan_item: "task1".to_string(),
                state: LifecycleState::Active,
            },
            Guard::Any(vec![Guard::VariableCmp {
                name: "amount".to_string(),
                op: Comparison::Equals,
                value: VariableValue::Integer(500),
            }]),
        ]);
        let tree = tree_with_amount(500);
        assert!(guard_satisfied(&guard, &tree, "case-1"));

        let tree = tree_with_amount(400);
        assert!(!guard_satisfied(&guard, &tree, "case-1"));
    }
}
