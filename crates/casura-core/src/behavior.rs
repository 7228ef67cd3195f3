// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Behavior dispatch and composite propagation.
//!
//! One external trigger enters through [`Dispatcher::submit_trigger`] (or a
//! variable write through [`Dispatcher::write_variables`]); everything that
//! follows — parent notification, sentry evaluation, auto-activation,
//! cascading termination — happens synchronously inside the same command by
//! draining a work queue until the tree reaches a fixpoint. A committed
//! child transition is delivered to its parent as a typed [`ChildEvent`];
//! the parent's reaction is a pure function of its own state, the event and
//! the sibling snapshot, which keeps the handlers idempotent: re-delivering
//! an already-accounted event computes the same target state and produces no
//! second transition.

use std::collections::VecDeque;

use chrono::Utc;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::execution::{CaseTree, ExecutionNode};
use crate::history::{HistoricCaseInstance, HistoryEvent};
use crate::lifecycle::{LifecycleState, TransitionTarget, Trigger, transition};
use crate::plan::{
    BehaviorKind, ChildTerminationPolicy, PlanItem, PlanItemEvent, PlanItemId, PlanModel,
};
use crate::sentry::{self, SentryEvent};
use crate::variables::Variables;

/// A committed child transition, delivered to the parent composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEvent {
    /// The child was manually disabled.
    Disabled,
    /// The child reached TERMINATED or FAILED.
    Terminated {
        /// True when the child FAILED rather than being terminated.
        via_failure: bool,
    },
    /// The child was suspended.
    Suspended,
    /// The child reached COMPLETED.
    Completed,
}

/// Queued unit of work inside one command.
#[derive(Debug)]
enum Work {
    Transition {
        execution_id: String,
        trigger: Trigger,
        /// Internal transitions that turned stale (state moved on) are
        /// skipped; external ones fail loudly.
        internal: bool,
    },
    ChildNotify {
        parent_id: String,
        child_id: String,
        child_required: bool,
        event: ChildEvent,
    },
    Sentries(SentryEvent),
}

/// Drives one case tree through the fan-out of a single command.
pub struct Dispatcher<'a> {
    plan: &'a PlanModel,
    tree: &'a mut CaseTree,
    history: Vec<HistoryEvent>,
    queue: VecDeque<Work>,
    transitions: u32,
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher over one loaded case tree.
    pub fn new(plan: &'a PlanModel, tree: &'a mut CaseTree) -> Self {
        Self {
            plan,
            tree,
            history: Vec::new(),
            queue: VecDeque::new(),
            transitions: 0,
        }
    }

    /// Number of state transitions applied so far.
    pub fn transition_count(&self) -> u32 {
        self.transitions
    }

    /// Consume the dispatcher, yielding the history events to commit.
    pub fn into_history(self) -> Vec<HistoryEvent> {
        self.history
    }

    /// Create the case instance: root node, its children, initial variables.
    ///
    /// The root id doubles as the case instance id and must match the id the
    /// tree was created with.
    pub fn start_instance(
        &mut self,
        case_instance_id: &str,
        business_key: Option<String>,
        variables: Variables,
    ) -> Result<()> {
        let root_item = self.plan.root_item();
        let mut root = ExecutionNode::new(
            case_instance_id,
            root_item.id.clone(),
            None,
            LifecycleState::Active,
        );
        root.id = case_instance_id.to_string();
        root.business_key = business_key.clone();
        let create_time = root.created_at;
        self.tree.insert(root);

        for (name, value) in variables {
            self.tree.set_variable(case_instance_id, name, value);
        }

        self.history.push(HistoryEvent::CaseStarted(HistoricCaseInstance {
            id: case_instance_id.to_string(),
            case_definition_id: self.plan.id.clone(),
            case_definition_key: self.plan.key.clone(),
            case_definition_name: self.plan.name.clone(),
            business_key,
            create_time,
            close_time: None,
            state: LifecycleState::Active,
        }));

        let root_id = case_instance_id.to_string();
        self.instantiate_children(&root_id)?;
        // Initial variables may already satisfy pure if-part criteria.
        self.queue.push_back(Work::Sentries(SentryEvent::VariableWrite));
        self.drain()
    }

    /// Apply one external trigger and drain the resulting fan-out.
    pub fn submit_trigger(&mut self, execution_id: &str, trigger: Trigger) -> Result<()> {
        self.apply_transition(execution_id, trigger, false)?;
        self.drain()
    }

    /// Write variables into an execution's scope and re-evaluate criteria.
    pub fn write_variables(&mut self, execution_id: &str, variables: Variables) -> Result<()> {
        if variables.is_empty() {
            return Err(EngineError::validation(
                "variables",
                "at least one variable is required",
            ));
        }
        self.tree.require_node(execution_id)?;
        for (name, value) in variables {
            self.tree.set_variable(execution_id, name, value);
        }
        self.queue.push_back(Work::Sentries(SentryEvent::VariableWrite));
        self.drain()
    }

    // ========================================================================
    // Work loop
    // ========================================================================

    fn drain(&mut self) -> Result<()> {
        while let Some(work) = self.queue.pop_front() {
            match work {
                Work::Transition {
                    execution_id,
                    trigger,
                    internal,
                } => {
                    self.apply_transition(&execution_id, trigger, internal)?;
                }
                Work::ChildNotify {
                    parent_id,
                    child_id,
                    child_required,
                    event,
                } => {
                    self.on_child_event(&parent_id, &child_id, child_required, event)?;
                }
                Work::Sentries(event) => {
                    self.run_sentries(event)?;
                }
            }
        }
        Ok(())
    }

    /// Apply one trigger to one node and record the follow-up work.
    fn apply_transition(
        &mut self,
        execution_id: &str,
        trigger: Trigger,
        internal: bool,
    ) -> Result<()> {
        let Some(node) = self.tree.node(execution_id) else {
            if internal {
                return Ok(()); // already removed by its parent
            }
            return Err(EngineError::not_found("case execution", execution_id));
        };
        let node_state = node.state;
        let previous_state = node.previous_state;
        let plan_item_id = node.plan_item_id.clone();
        let is_root = node.is_root();
        let parent_id = node.parent_id.clone();
        let item = self.plan.require_item(&plan_item_id)?;
        let kind = item.behavior;
        let required = item.required;

        // Manual-activation gates: disable/reenable/manual start only exist
        // on manual-activation items.
        if matches!(
            trigger,
            Trigger::Disable | Trigger::Reenable | Trigger::ManualStart
        ) && !item.manual_activation
        {
            if internal {
                return Ok(());
            }
            return Err(EngineError::IllegalTransition {
                execution_id: execution_id.to_string(),
                state: node_state.as_str().to_string(),
                trigger: trigger.as_str().to_string(),
            });
        }

        let Some(target) = transition(kind, node_state, trigger) else {
            if internal {
                return Ok(()); // stale queued work, state moved on
            }
            return Err(EngineError::IllegalTransition {
                execution_id: execution_id.to_string(),
                state: node_state.as_str().to_string(),
                trigger: trigger.as_str().to_string(),
            });
        };
        let new_state = match target {
            TransitionTarget::To(state) => state,
            TransitionTarget::ToPreSuspensionState => {
                previous_state.unwrap_or(match kind {
                    BehaviorKind::Milestone | BehaviorKind::EventListener => {
                        LifecycleState::Available
                    }
                    _ => LifecycleState::Active,
                })
            }
        };
        if new_state == node_state {
            return Ok(()); // no-op transition ends the bubble
        }

        // A composite completes only once its children allow it; remaining
        // non-terminal, non-blocking children are discarded first.
        if trigger == Trigger::Complete && kind.is_composite() {
            if !self.composite_ready_to_complete(execution_id) {
                if internal {
                    return Ok(());
                }
                return Err(EngineError::IllegalTransition {
                    execution_id: execution_id.to_string(),
                    state: node_state.as_str().to_string(),
                    trigger: trigger.as_str().to_string(),
                });
            }
            self.discard_remaining_children(execution_id)?;
        }

        // Terminating a composite terminates its subtree, innermost first.
        if matches!(trigger, Trigger::Terminate | Trigger::Exit) && kind.is_composite() {
            let children: Vec<String> = self.tree.child_ids(execution_id).to_vec();
            for child in children {
                self.exit_subtree(&child)?;
            }
        }

        self.tree.set_state(execution_id, new_state)?;
        self.transitions += 1;
        debug!(
            execution_id,
            plan_item = %plan_item_id,
            from = %node_state,
            to = %new_state,
            trigger = %trigger,
            "execution transitioned"
        );

        // Suspension cascades down; resume restores each node's prior state.
        if kind.is_composite() && new_state == LifecycleState::Suspended {
            self.cascade(execution_id, Trigger::ParentSuspend)?;
        }
        if kind.is_composite()
            && node_state == LifecycleState::Suspended
            && !new_state.is_terminal()
        {
            self.cascade(execution_id, Trigger::ParentResume)?;
        }

        // A stage instantiates its children on first activation; resuming
        // from suspension must not re-create already-finished children.
        if new_state == LifecycleState::Active
            && kind.is_composite()
            && matches!(trigger, Trigger::Start | Trigger::ManualStart)
        {
            self.instantiate_children(execution_id)?;
        }

        // Auto-activation: a non-manual item does not linger in ENABLED.
        if new_state == LifecycleState::Enabled && !item.manual_activation {
            self.queue.push_back(Work::Transition {
                execution_id: execution_id.to_string(),
                trigger: Trigger::Start,
                internal: true,
            });
        }

        // History projection for terminal transitions.
        if new_state.is_terminal() {
            let node = self.tree.require_node(execution_id)?;
            self.history.push(HistoryEvent::ActivityEnded(
                crate::history::activity_record(self.plan, item, node, new_state, Utc::now()),
            ));
            if is_root {
                self.history.push(HistoryEvent::CaseEnded {
                    case_instance_id: execution_id.to_string(),
                    state: new_state,
                    close_time: Utc::now(),
                });
            }
        }

        // Sentry on-parts observe the emitted lifecycle event.
        if let Some(event) = lifecycle_event(trigger, new_state) {
            self.queue.push_back(Work::Sentries(SentryEvent::PlanItemTransition {
                source: plan_item_id.clone(),
                event,
            }));
        }

        // Deliver the typed child event to the parent composite.
        if let Some(parent_id) = parent_id
            && let Some(event) = child_event(new_state)
        {
            self.queue.push_back(Work::ChildNotify {
                parent_id,
                child_id: execution_id.to_string(),
                child_required: required,
                event,
            });
        }

        Ok(())
    }

    /// The four composite handlers: onChildDisabled / onChildTerminated /
    /// onChildSuspended / onChildCompleted.
    fn on_child_event(
        &mut self,
        parent_id: &str,
        child_id: &str,
        child_required: bool,
        event: ChildEvent,
    ) -> Result<()> {
        let Some(parent) = self.tree.node(parent_id) else {
            return Ok(());
        };
        let parent_state = parent.state;
        let parent_item = self.plan.require_item(&parent.plan_item_id)?;
        let exit_on_termination =
            parent_item.on_child_termination == ChildTerminationPolicy::ExitStage;

        match event {
            ChildEvent::Terminated { via_failure } => {
                debug!(parent_id, child_id, via_failure, "child terminated");
                if child_required && exit_on_termination && !parent_state.is_terminal() {
                    // Configured policy: abnormal termination of a required
                    // child takes the whole stage down.
                    self.exit_subtree(parent_id)?;
                } else {
                    self.recheck_completion(parent_id, parent_state);
                }
                self.tree.remove(child_id);
            }
            ChildEvent::Completed => {
                debug!(parent_id, child_id, "child completed");
                self.recheck_completion(parent_id, parent_state);
                self.tree.remove(child_id);
            }
            ChildEvent::Disabled => {
                debug!(parent_id, child_id, "child disabled");
                self.recheck_completion(parent_id, parent_state);
            }
            ChildEvent::Suspended => {
                debug!(parent_id, child_id, "child suspended");
            }
        }
        Ok(())
    }

    /// Queue a completion attempt when the composite's children allow it.
    ///
    /// The queued transition re-validates at processing time, so duplicate
    /// re-checks collapse into a single parent transition.
    fn recheck_completion(&mut self, parent_id: &str, parent_state: LifecycleState) {
        if parent_state == LifecycleState::Active && self.composite_ready_to_complete(parent_id) {
            self.queue.push_back(Work::Transition {
                execution_id: parent_id.to_string(),
                trigger: Trigger::Complete,
                internal: true,
            });
        }
    }

    /// A composite may complete when every required child is terminal and no
    /// child is active or still enabled.
    fn composite_ready_to_complete(&self, parent_id: &str) -> bool {
        self.tree.children_of(parent_id).iter().all(|child| {
            let required = self
                .plan
                .item(&child.plan_item_id)
                .is_some_and(|item| item.required);
            if required && !child.state.is_terminal() {
                return false;
            }
            !matches!(
                child.state,
                LifecycleState::Active | LifecycleState::Enabled
            )
        })
    }

    /// Exit the remaining non-terminal children of a completing composite.
    fn discard_remaining_children(&mut self, parent_id: &str) -> Result<()> {
        let remaining: Vec<String> = self
            .tree
            .children_of(parent_id)
            .iter()
            .filter(|c| !c.state.is_terminal())
            .map(|c| c.id.clone())
            .collect();
        for child in remaining {
            self.exit_subtree(&child)?;
        }
        Ok(())
    }

    /// Force-terminate a node and its descendants, innermost first, each
    /// emitting its own history record.
    fn exit_subtree(&mut self, execution_id: &str) -> Result<()> {
        let children: Vec<String> = self.tree.child_ids(execution_id).to_vec();
        for child in children {
            self.exit_subtree(&child)?;
        }
        self.apply_transition(execution_id, Trigger::Exit, true)
    }

    /// Apply a parent-driven trigger to the direct children. Nested stages
    /// cascade further from their own transition.
    fn cascade(&mut self, parent_id: &str, trigger: Trigger) -> Result<()> {
        let children: Vec<String> = self.tree.child_ids(parent_id).to_vec();
        for child in children {
            self.apply_transition(&child, trigger, true)?;
        }
        Ok(())
    }

    /// Create executions for a composite's child plan items.
    fn instantiate_children(&mut self, parent_execution_id: &str) -> Result<()> {
        let parent = self.tree.require_node(parent_execution_id)?;
        let case_instance_id = parent.case_instance_id.clone();
        let parent_item = self.plan.require_item(&parent.plan_item_id)?;

        for child_plan_id in parent_item.children.clone() {
            if self.tree.node_for_plan_item(&child_plan_id).is_some() {
                continue; // already instantiated
            }
            let child_item = self.plan.require_item(&child_plan_id)?;
            let initial = initial_state(child_item);
            let node = ExecutionNode::new(
                case_instance_id.clone(),
                child_plan_id.clone(),
                Some(parent_execution_id.to_string()),
                initial,
            );
            let node_id = node.id.clone();
            debug!(
                execution_id = %node_id,
                plan_item = %child_plan_id,
                state = %initial,
                "execution created"
            );
            self.tree.insert(node);

            if initial == LifecycleState::Enabled && !child_item.manual_activation {
                self.queue.push_back(Work::Transition {
                    execution_id: node_id,
                    trigger: Trigger::Start,
                    internal: true,
                });
            }
        }
        // Freshly instantiated items may have pure if-part entry criteria
        // that current variables already satisfy.
        self.queue.push_back(Work::Sentries(SentryEvent::VariableWrite));
        Ok(())
    }

    /// React to newly satisfied entry/exit criteria.
    fn run_sentries(&mut self, event: SentryEvent) -> Result<()> {
        let satisfied = sentry::evaluate(self.plan, self.tree, &event);
        for plan_item_id in satisfied.entries {
            self.on_entry_satisfied(&plan_item_id)?;
        }
        for plan_item_id in satisfied.exits {
            if let Some(node) = self.tree.node_for_plan_item(&plan_item_id) {
                let id = node.id.clone();
                self.exit_subtree(&id)?;
            }
        }
        Ok(())
    }

    fn on_entry_satisfied(&mut self, plan_item_id: &PlanItemId) -> Result<()> {
        let Some(node) = self.tree.node_for_plan_item(plan_item_id) else {
            return Ok(());
        };
        if node.state != LifecycleState::Available {
            return Ok(()); // activation is idempotent per node
        }
        let id = node.id.clone();
        let item = self.plan.require_item(plan_item_id)?;
        match item.behavior {
            // A milestone occurs the moment its entry criterion fires.
            BehaviorKind::Milestone => self.apply_transition(&id, Trigger::Occur, true),
            BehaviorKind::EventListener => Ok(()),
            _ => self.apply_transition(&id, Trigger::Enable, true),
        }
    }
}

/// Initial lifecycle state of a freshly instantiated plan item.
fn initial_state(item: &PlanItem) -> LifecycleState {
    match item.behavior {
        // Milestones and event listeners wait in AVAILABLE for occurrence.
        BehaviorKind::Milestone | BehaviorKind::EventListener => LifecycleState::Available,
        _ if item.entry_criteria.is_empty() => LifecycleState::Enabled,
        _ => LifecycleState::Available,
    }
}

/// The sentry-visible lifecycle event emitted by a transition, if any.
fn lifecycle_event(trigger: Trigger, new_state: LifecycleState) -> Option<PlanItemEvent> {
    match (trigger, new_state) {
        (Trigger::Occur, LifecycleState::Completed) => Some(PlanItemEvent::Occur),
        (_, LifecycleState::Completed) => Some(PlanItemEvent::Complete),
        (_, LifecycleState::Active) => Some(PlanItemEvent::Start),
        (_, LifecycleState::Terminated | LifecycleState::Failed) => Some(PlanItemEvent::Terminate),
        _ => None,
    }
}

/// The child event a new state produces for the parent composite, if any.
fn child_event(new_state: LifecycleState) -> Option<ChildEvent> {
    match new_state {
        LifecycleState::Completed => Some(ChildEvent::Completed),
        LifecycleState::Terminated => Some(ChildEvent::Terminated { via_failure: false }),
        LifecycleState::Failed => Some(ChildEvent::Terminated { via_failure: true }),
        LifecycleState::Suspended => Some(ChildEvent::Suspended),
        LifecycleState::Disabled => Some(ChildEvent::Disabled),
        _ => None,
    }
}
