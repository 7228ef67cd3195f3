// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The immutable plan model.
//!
//! A plan model is the deployed, validated definition of a case: a tree of
//! plan items, each tagged with a behavior kind and optionally guarded by
//! entry/exit sentries. The engine consumes plan models opaquely; producing
//! them (deployment, versioning) happens upstream. [`PlanModelBuilder`]
//! validates structure once at build time so the engine can assume a
//! well-formed tree everywhere else.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::lifecycle::LifecycleState;
use crate::variables::{Comparison, VariableValue};

/// Identifier of a plan item within its plan model.
pub type PlanItemId = String;

/// The closed set of behavior kinds.
///
/// Dispatch is an exhaustive match on this enum; adding a kind is a
/// compile-visible change everywhere behavior matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BehaviorKind {
    /// A unit of work performed outside the engine.
    Task,
    /// A composite grouping of child plan items.
    Stage,
    /// A marker that occurs when its entry criterion is satisfied.
    Milestone,
    /// Reacts to an external event (timer, user signal).
    EventListener,
    /// The root of a case instance; exactly one per plan model.
    CaseRoot,
}

impl BehaviorKind {
    /// Whether this kind aggregates children (stage semantics).
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Stage | Self::CaseRoot)
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Stage => "stage",
            Self::Milestone => "milestone",
            Self::EventListener => "event_listener",
            Self::CaseRoot => "case_root",
        }
    }
}

/// Lifecycle events of a plan item that sentry on-parts can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanItemEvent {
    /// The item became active.
    Start,
    /// The item completed.
    Complete,
    /// The item occurred (milestones, event listeners).
    Occur,
    /// The item was terminated.
    Terminate,
}

/// A side-effect-free guard predicate over variables and sibling states.
///
/// Guards arrive structured; expression-language parsing is out of scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Guard {
    /// Compare a variable (looked up through the scope chain) to a constant.
    VariableCmp {
        /// Variable name.
        name: String,
        /// Comparison operator.
        op: Comparison,
        /// Right-hand constant.
        value: VariableValue,
    },
    /// True when the referenced plan item's execution is in the given state.
    SiblingInState {
        /// The plan item to inspect.
        plan_item: PlanItemId,
        /// The required lifecycle state.
        state: LifecycleState,
    },
    /// True when every sub-guard is true.
    All(Vec<Guard>),
    /// True when at least one sub-guard is true.
    Any(Vec<Guard>),
}

/// The on-part of a sentry: which lifecycle event of which item triggers
/// re-evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnPart {
    /// The plan item whose event is observed.
    pub source: PlanItemId,
    /// The observed event.
    pub event: PlanItemEvent,
}

/// An entry or exit criterion: optional on-part plus optional if-part.
///
/// A sentry with no on-part is re-evaluated on every variable write; a
/// sentry with no if-part is satisfied as soon as its on-part event fires.
/// Sentries are stateless; satisfaction is recomputed, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentry {
    /// The triggering event, if any.
    pub on_part: Option<OnPart>,
    /// The guard expression, if any.
    pub if_part: Option<Guard>,
}

impl Sentry {
    /// A sentry satisfied when `event` fires on `source`.
    pub fn on_event(source: impl Into<PlanItemId>, event: PlanItemEvent) -> Self {
        Self {
            on_part: Some(OnPart {
                source: source.into(),
                event,
            }),
            if_part: None,
        }
    }

    /// A pure if-part sentry, re-evaluated on variable writes.
    pub fn when(guard: Guard) -> Self {
        Self {
            on_part: None,
            if_part: Some(guard),
        }
    }

    /// Attach a guard to this sentry.
    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.if_part = Some(guard);
        self
    }
}

/// How a stage reacts when a required child terminates abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChildTerminationPolicy {
    /// Child termination only feeds the completion re-check.
    #[default]
    Ignore,
    /// Abnormal termination of a required child terminates the stage.
    ExitStage,
}

/// One node of the plan model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    /// Identifier, unique within the plan model.
    pub id: PlanItemId,
    /// Human-readable name, denormalized into history.
    pub name: String,
    /// Behavior kind.
    pub behavior: BehaviorKind,
    /// Ordered child plan item ids (composites only).
    pub children: Vec<PlanItemId>,
    /// Entry criteria; any one satisfied enables the item.
    pub entry_criteria: Vec<Sentry>,
    /// Exit criteria; any one satisfied force-terminates the item.
    pub exit_criteria: Vec<Sentry>,
    /// A composite parent cannot complete while this item is non-terminal.
    pub required: bool,
    /// The item waits in ENABLED for a manual start instead of
    /// auto-activating.
    pub manual_activation: bool,
    /// Reaction to abnormal termination of a required child.
    pub on_child_termination: ChildTerminationPolicy,
}

impl PlanItem {
    fn new(id: impl Into<PlanItemId>, name: impl Into<String>, behavior: BehaviorKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            behavior,
            children: Vec::new(),
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            required: false,
            manual_activation: false,
            on_child_termination: ChildTerminationPolicy::default(),
        }
    }

    /// A task item.
    pub fn task(id: impl Into<PlanItemId>, name: impl Into<String>) -> Self {
        Self::new(id, name, BehaviorKind::Task)
    }

    /// A stage item with the given children.
    pub fn stage<I, C>(id: impl Into<PlanItemId>, name: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<PlanItemId>,
    {
        let mut item = Self::new(id, name, BehaviorKind::Stage);
        item.children = children.into_iter().map(Into::into).collect();
        item
    }

    /// A milestone item.
    pub fn milestone(id: impl Into<PlanItemId>, name: impl Into<String>) -> Self {
        Self::new(id, name, BehaviorKind::Milestone)
    }

    /// An event listener item.
    pub fn event_listener(id: impl Into<PlanItemId>, name: impl Into<String>) -> Self {
        Self::new(id, name, BehaviorKind::EventListener)
    }

    /// Mark the item required for parent completion.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Require manual activation (ENABLED waits for a manual start).
    pub fn manual(mut self) -> Self {
        self.manual_activation = true;
        self
    }

    /// Terminate this stage when a required child terminates abnormally.
    pub fn exit_on_child_termination(mut self) -> Self {
        self.on_child_termination = ChildTerminationPolicy::ExitStage;
        self
    }

    /// Add an entry criterion.
    pub fn with_entry_criterion(mut self, sentry: Sentry) -> Self {
        self.entry_criteria.push(sentry);
        self
    }

    /// Add an exit criterion.
    pub fn with_exit_criterion(mut self, sentry: Sentry) -> Self {
        self.exit_criteria.push(sentry);
        self
    }
}

/// A validated, immutable plan model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanModel {
    /// Unique id of this deployed definition (`key:version:uuid`).
    pub id: String,
    /// Stable definition key across versions.
    pub key: String,
    /// Human-readable name.
    pub name: String,
    /// Definition version.
    pub version: i32,
    /// All plan items keyed by id.
    items: HashMap<PlanItemId, PlanItem>,
    /// The case root item id.
    root: PlanItemId,
    /// Child → parent links, derived at build time.
    parents: HashMap<PlanItemId, PlanItemId>,
}

impl PlanModel {
    /// Start building a plan model.
    pub fn builder(key: impl Into<String>, name: impl Into<String>) -> PlanModelBuilder {
        PlanModelBuilder {
            key: key.into(),
            name: name.into(),
            version: 1,
            root: None,
            items: Vec::new(),
        }
    }

    /// Look up a plan item.
    pub fn item(&self, id: &str) -> Option<&PlanItem> {
        self.items.get(id)
    }

    /// Look up a plan item, failing with `NotFound` when absent.
    pub fn require_item(&self, id: &str) -> Result<&PlanItem> {
        self.item(id)
            .ok_or_else(|| EngineError::not_found("plan item", id))
    }

    /// The case root item.
    pub fn root_item(&self) -> &PlanItem {
        &self.items[&self.root]
    }

    /// Id of the case root item.
    pub fn root_id(&self) -> &PlanItemId {
        &self.root
    }

    /// Parent of a plan item, `None` for the root.
    pub fn parent_of(&self, id: &str) -> Option<&PlanItemId> {
        self.parents.get(id)
    }

    /// Iterate all plan items in unspecified order.
    pub fn iter_items(&self) -> impl Iterator<Item = &PlanItem> {
        self.items.values()
    }

    /// All sentries (item id, direction, sentry) in the model.
    pub fn iter_sentries(&self) -> impl Iterator<Item = (&PlanItemId, SentryDirection, &Sentry)> {
        self.items.values().flat_map(|item| {
            let entries = item
                .entry_criteria
                .iter()
                .map(move |s| (&item.id, SentryDirection::Entry, s));
            let exits = item
                .exit_criteria
                .iter()
                .map(move |s| (&item.id, SentryDirection::Exit, s));
            entries.chain(exits)
        })
    }
}

/// Whether a sentry guards entry into or exit from its plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentryDirection {
    /// Satisfaction enables the item.
    Entry,
    /// Satisfaction force-terminates the item.
    Exit,
}

/// Builder for [`PlanModel`] with structural validation.
#[derive(Debug)]
pub struct PlanModelBuilder {
    key: String,
    name: String,
    version: i32,
    root: Option<PlanItem>,
    items: Vec<PlanItem>,
}

impl PlanModelBuilder {
    /// Set the definition version (default 1).
    pub fn version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Define the case root with its direct children.
    pub fn root<I, C>(mut self, id: impl Into<PlanItemId>, children: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<PlanItemId>,
    {
        let mut item = PlanItem::new(id, self.name.clone(), BehaviorKind::CaseRoot);
        item.children = children.into_iter().map(Into::into).collect();
        self.root = Some(item);
        self
    }

    /// Add a plan item.
    pub fn add(mut self, item: PlanItem) -> Self {
        self.items.push(item);
        self
    }

    /// Validate and build the plan model.
    pub fn build(self) -> Result<PlanModel> {
        if self.key.is_empty() {
            return Err(EngineError::validation("key", "must not be empty"));
        }
        let root = self
            .root
            .ok_or_else(|| EngineError::validation("root", "plan model has no case root"))?;

        let mut items: HashMap<PlanItemId, PlanItem> = HashMap::new();
        let root_id = root.id.clone();
        for item in std::iter::once(root).chain(self.items) {
            if item.behavior == BehaviorKind::CaseRoot && item.id != root_id {
                return Err(EngineError::validation(
                    &item.id,
                    "only the root may use the case root behavior",
                ));
            }
            if !item.behavior.is_composite() && !item.children.is_empty() {
                return Err(EngineError::validation(
                    &item.id,
                    format!("{} items cannot have children", item.behavior.as_str()),
                ));
            }
            if items.insert(item.id.clone(), item).is_some() {
                return Err(EngineError::validation(
                    "items",
                    "duplicate plan item id".to_string(),
                ));
            }
        }

        // Derive parent links; every child must exist and have one parent.
        let mut parents: HashMap<PlanItemId, PlanItemId> = HashMap::new();
        for item in items.values() {
            for child in &item.children {
                if !items.contains_key(child) {
                    return Err(EngineError::validation(
                        child,
                        format!("referenced as child of '{}' but not defined", item.id),
                    ));
                }
                if *child == root_id {
                    return Err(EngineError::validation(
                        child,
                        "the case root cannot be a child",
                    ));
                }
                if parents.insert(child.clone(), item.id.clone()).is_some() {
                    return Err(EngineError::validation(
                        child,
                        "plan item has more than one parent",
                    ));
                }
            }
        }

        // Reachability from the root; unreachable items mean a detached
        // subtree or a cycle.
        let mut reachable: HashSet<&PlanItemId> = HashSet::new();
        let mut stack = vec![&root_id];
        while let Some(id) = stack.pop() {
            if reachable.insert(id) {
                stack.extend(items[id].children.iter());
            }
        }
        if reachable.len() != items.len() {
            let orphan = items
                .keys()
                .find(|id| !reachable.contains(id))
                .cloned()
                .unwrap_or_default();
            return Err(EngineError::validation(
                orphan,
                "plan item is not reachable from the case root",
            ));
        }

        // Sentry on-parts and sibling guards must reference known items.
        for item in items.values() {
            for sentry in item.entry_criteria.iter().chain(&item.exit_criteria) {
                if let Some(on_part) = &sentry.on_part
                    && !items.contains_key(&on_part.source)
                {
                    return Err(EngineError::validation(
                        &on_part.source,
                        format!("sentry on '{}' references an unknown plan item", item.id),
                    ));
                }
                if let Some(guard) = &sentry.if_part {
                    validate_guard_refs(guard, &items, &item.id)?;
                }
            }
        }

        let id = format!("{}:{}:{}", self.key, self.version, Uuid::new_v4());
        Ok(PlanModel {
            id,
            key: self.key,
            name: self.name,
            version: self.version,
            items,
            root: root_id,
            parents,
        })
    }
}

fn validate_guard_refs(
    guard: &Guard,
    items: &HashMap<PlanItemId, PlanItem>,
    owner: &str,
) -> Result<()> {
    match guard {
        Guard::VariableCmp { .. } => Ok(()),
        Guard::SiblingInState { plan_item, .. } => {
            if items.contains_key(plan_item) {
                Ok(())
            } else {
                Err(EngineError::validation(
                    plan_item,
                    format!("guard on '{}' references an unknown plan item", owner),
                ))
            }
        }
        Guard::All(guards) | Guard::Any(guards) => {
            for inner in guards {
                validate_guard_refs(inner, items, owner)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_plan() -> PlanModel {
        PlanModel::builder("loan", "Loan handling")
            .root("case1", ["stage1"])
            .add(PlanItem::stage("stage1", "Collect documents", ["task1", "ms1"]).required())
            .add(PlanItem::task("task1", "Upload documents").required())
            .add(
                PlanItem::milestone("ms1", "Documents complete").with_entry_criterion(
                    Sentry::on_event("task1", PlanItemEvent::Complete),
                ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_valid_plan() {
        let plan = two_level_plan();
        assert_eq!(plan.key, "loan");
        assert_eq!(plan.version, 1);
        assert!(plan.id.starts_with("loan:1:"));
        assert_eq!(plan.root_item().behavior, BehaviorKind::CaseRoot);
        assert_eq!(plan.parent_of("task1"), Some(&"stage1".to_string()));
        assert_eq!(plan.parent_of("case1"), None);
        assert_eq!(plan.iter_sentries().count(), 1);
    }

    #[test]
    fn test_missing_root_rejected() {
        let err = PlanModel::builder("k", "n")
            .add(PlanItem::task("t1", "Task"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no case root"));
    }

    #[test]
    fn test_unknown_child_rejected() {
        let err = PlanModel::builder("k", "n")
            .root("root", ["ghost"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }

    #[test]
    fn test_duplicate_parent_rejected() {
        let err = PlanModel::builder("k", "n")
            .root("root", ["s1", "s2"])
            .add(PlanItem::stage("s1", "S1", ["t1"]))
            .add(PlanItem::stage("s2", "S2", ["t1"]))
            .add(PlanItem::task("t1", "T1"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("more than one parent"));
    }

    #[test]
    fn test_unreachable_item_rejected() {
        let err = PlanModel::builder("k", "n")
            .root("root", ["t1"])
            .add(PlanItem::task("t1", "T1"))
            .add(PlanItem::task("island", "Unreferenced"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not reachable"));
    }

    #[test]
    fn test_task_with_children_rejected() {
        let mut bad = PlanItem::task("t1", "T1");
        bad.children.push("t2".to_string());
        let err = PlanModel::builder("k", "n")
            .root("root", ["t1"])
            .add(bad)
            .add(PlanItem::task("t2", "T2"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cannot have children"));
    }

    #[test]
    fn test_sentry_unknown_source_rejected() {
        let err = PlanModel::builder("k", "n")
            .root("root", ["t1"])
            .add(
                PlanItem::task("t1", "T1")
                    .with_entry_criterion(Sentry::on_event("ghost", PlanItemEvent::Complete)),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown plan item"));
    }

    #[test]
    fn test_guard_sibling_reference_validated() {
        let err = PlanModel::builder("k", "n")
            .root("root", ["t1"])
            .add(PlanItem::task("t1", "T1").with_exit_criterion(Sentry::when(
                Guard::SiblingInState {
                    plan_item: "ghost".to_string(),
                    state: LifecycleState::Completed,
                },
            )))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown plan item"));
    }

    #[test]
    fn test_plan_json_round_trip() {
        let plan = two_level_plan();
        let encoded = serde_json::to_string(&plan).unwrap();
        let decoded: PlanModel = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, plan.id);
        assert_eq!(decoded.item("task1").unwrap(), plan.item("task1").unwrap());
        assert_eq!(decoded.parent_of("ms1"), plan.parent_of("ms1"));
    }
}
