// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution nodes and the per-instance case tree.
//!
//! All execution nodes of one case instance live in a [`CaseTree`] arena
//! keyed by execution id; parent/child links are id references into the
//! arena, never owning pointers. A command loads one tree as a consistent
//! snapshot, mutates it in memory through behavior dispatch, and hands the
//! accumulated change set to the persistence layer for an optimistic,
//! version-checked commit.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::lifecycle::LifecycleState;
use crate::plan::PlanItemId;
use crate::variables::{VariableValue, Variables};

/// The mutable runtime instantiation of one plan item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionNode {
    /// Unique execution id.
    pub id: String,
    /// The case instance this node belongs to (equals `id` for the root).
    pub case_instance_id: String,
    /// The plan item this node instantiates.
    pub plan_item_id: PlanItemId,
    /// Parent execution id; `None` only for the instance root. Never
    /// reassigned once set.
    pub parent_id: Option<String>,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// State before suspension; present only while suspended.
    pub previous_state: Option<LifecycleState>,
    /// Optimistic locking version counter.
    pub version: i64,
    /// Business key; root only.
    pub business_key: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ExecutionNode {
    /// Create a fresh node in the given initial state.
    pub fn new(
        case_instance_id: impl Into<String>,
        plan_item_id: impl Into<PlanItemId>,
        parent_id: Option<String>,
        state: LifecycleState,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            case_instance_id: case_instance_id.into(),
            plan_item_id: plan_item_id.into(),
            parent_id,
            state,
            previous_state: None,
            version: 0,
            business_key: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the node is the instance root.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// All execution nodes of one case instance, plus change tracking.
#[derive(Debug, Default)]
pub struct CaseTree {
    case_instance_id: String,
    nodes: HashMap<String, ExecutionNode>,
    /// Parent execution id → ordered child execution ids.
    children: HashMap<String, Vec<String>>,
    /// Plan item id → execution id (one live node per plan item).
    by_plan_item: HashMap<PlanItemId, String>,
    /// Execution id → local variable scope.
    variables: HashMap<String, Variables>,

    dirty: HashSet<String>,
    inserted: HashSet<String>,
    removed: Vec<ExecutionNode>,
    dirty_variables: HashSet<String>,
}

impl CaseTree {
    /// Rebuild a tree from persisted rows (one consistent snapshot).
    pub fn from_parts(
        case_instance_id: impl Into<String>,
        nodes: Vec<ExecutionNode>,
        variables: HashMap<String, Variables>,
    ) -> Self {
        let mut tree = Self {
            case_instance_id: case_instance_id.into(),
            variables,
            ..Self::default()
        };
        for node in nodes {
            tree.index(&node);
            tree.nodes.insert(node.id.clone(), node);
        }
        tree
    }

    /// Create an empty tree for a new instance.
    pub fn empty(case_instance_id: impl Into<String>) -> Self {
        Self {
            case_instance_id: case_instance_id.into(),
            ..Self::default()
        }
    }

    fn index(&mut self, node: &ExecutionNode) {
        if let Some(parent) = &node.parent_id {
            self.children
                .entry(parent.clone())
                .or_default()
                .push(node.id.clone());
        }
        self.by_plan_item
            .insert(node.plan_item_id.clone(), node.id.clone());
    }

    /// The case instance id this tree belongs to.
    pub fn case_instance_id(&self) -> &str {
        &self.case_instance_id
    }

    /// Look up a node.
    pub fn node(&self, id: &str) -> Option<&ExecutionNode> {
        self.nodes.get(id)
    }

    /// Look up a node, failing with `NotFound` when absent.
    pub fn require_node(&self, id: &str) -> Result<&ExecutionNode> {
        self.node(id)
            .ok_or_else(|| EngineError::not_found("case execution", id))
    }

    /// The instance root node.
    pub fn root(&self) -> Option<&ExecutionNode> {
        self.nodes.values().find(|n| n.is_root())
    }

    /// The live execution for a plan item, if any.
    pub fn node_for_plan_item(&self, plan_item_id: &str) -> Option<&ExecutionNode> {
        self.by_plan_item
            .get(plan_item_id)
            .and_then(|id| self.nodes.get(id))
    }

    /// Ordered child execution ids of a node.
    pub fn child_ids(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Child nodes of a node.
    pub fn children_of(&self, id: &str) -> Vec<&ExecutionNode> {
        self.child_ids(id)
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .collect()
    }

    /// Iterate all live nodes in unspecified order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &ExecutionNode> {
        self.nodes.values()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no live nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a freshly created node.
    pub fn insert(&mut self, node: ExecutionNode) {
        self.index(&node);
        self.inserted.insert(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    /// Move a node to `new_state`, recording the pre-suspension state when
    /// entering SUSPENDED and restoring bookkeeping when leaving it.
    ///
    /// This is a raw state write; legality is the dispatcher's business.
    pub fn set_state(&mut self, id: &str, new_state: LifecycleState) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("case execution", id))?;
        if new_state == LifecycleState::Suspended && node.state != LifecycleState::Suspended {
            node.previous_state = Some(node.state);
        } else if new_state != LifecycleState::Suspended {
            node.previous_state = None;
        }
        node.state = new_state;
        if !self.inserted.contains(id) {
            self.dirty.insert(id.to_string());
        }
        Ok(())
    }

    /// Remove a node from the live tree (terminal, parent has processed it).
    ///
    /// Removal participates in the optimistic commit: deleting a row whose
    /// version moved on since the snapshot fails the command.
    pub fn remove(&mut self, id: &str) {
        if let Some(node) = self.nodes.remove(id) {
            if let Some(parent) = &node.parent_id
                && let Some(siblings) = self.children.get_mut(parent)
            {
                siblings.retain(|c| c != id);
            }
            self.children.remove(id);
            self.by_plan_item.remove(&node.plan_item_id);
            self.variables.remove(id);
            self.dirty.remove(id);
            self.dirty_variables.remove(id);
            if !self.inserted.remove(id) {
                self.removed.push(node);
            }
        }
    }

    /// Read a variable, falling back through ancestor scopes.
    pub fn variable(&self, execution_id: &str, name: &str) -> Option<&VariableValue> {
        let mut current = Some(execution_id);
        while let Some(id) = current {
            if let Some(value) = self.variables.get(id).and_then(|scope| scope.get(name)) {
                return Some(value);
            }
            current = self.nodes.get(id).and_then(|n| n.parent_id.as_deref());
        }
        None
    }

    /// The local variable scope of one execution.
    pub fn local_variables(&self, execution_id: &str) -> Option<&Variables> {
        self.variables.get(execution_id)
    }

    /// Write a variable into an execution's local scope.
    pub fn set_variable(&mut self, execution_id: &str, name: impl Into<String>, value: VariableValue) {
        self.variables
            .entry(execution_id.to_string())
            .or_default()
            .insert(name.into(), value);
        self.dirty_variables.insert(execution_id.to_string());
    }

    /// Drain the accumulated changes for the persistence commit.
    pub fn take_commit(&mut self) -> TreeCommit {
        let mut commit = TreeCommit::default();
        for id in self.inserted.drain() {
            if let Some(node) = self.nodes.get(&id) {
                commit.inserts.push(node.clone());
            }
        }
        for id in self.dirty.drain() {
            if let Some(node) = self.nodes.get(&id) {
                commit.updates.push(node.clone());
            }
        }
        commit.removes = std::mem::take(&mut self.removed);
        for id in self.dirty_variables.drain() {
            commit
                .variable_scopes
                .push((id.clone(), self.variables.get(&id).cloned().unwrap_or_default()));
        }
        commit
    }

    /// Whether any change is pending commit.
    pub fn has_changes(&self) -> bool {
        !self.inserted.is_empty()
            || !self.dirty.is_empty()
            || !self.removed.is_empty()
            || !self.dirty_variables.is_empty()
    }
}

/// The change set of one command against one case tree.
///
/// `updates` and `removes` carry the snapshot version; the persistence
/// layer commits them conditionally (`WHERE version = ?`) and bumps the
/// stored version, failing the whole transaction on any mismatch.
#[derive(Debug, Default)]
pub struct TreeCommit {
    /// Newly created nodes.
    pub inserts: Vec<ExecutionNode>,
    /// Mutated nodes, at their snapshot version.
    pub updates: Vec<ExecutionNode>,
    /// Removed nodes, at their snapshot version.
    pub removes: Vec<ExecutionNode>,
    /// Full replacement variable scopes for dirtied executions.
    pub variable_scopes: Vec<(String, Variables)>,
}

impl TreeCommit {
    /// Whether the commit carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.removes.is_empty()
            && self.variable_scopes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> CaseTree {
        let mut root = ExecutionNode::new("case-1", "case1", None, LifecycleState::Active);
        root.id = "case-1".to_string();
        root.business_key = Some("order-77".to_string());
        root.version = 3;

        let mut stage = ExecutionNode::new(
            "case-1",
            "stage1",
            Some("case-1".to_string()),
            LifecycleState::Active,
        );
        stage.id = "exec-stage".to_string();

        let mut task = ExecutionNode::new(
            "case-1",
            "task1",
            Some("exec-stage".to_string()),
            LifecycleState::Active,
        );
        task.id = "exec-task".to_string();
        task.version = 5;

        let mut variables = HashMap::new();
        variables.insert(
            "case-1".to_string(),
            Variables::from([(
                "amount".to_string(),
                VariableValue::Integer(1000),
            )]),
        );

        CaseTree::from_parts("case-1", vec![root, stage, task], variables)
    }

    #[test]
    fn test_tree_indexing() {
        let tree = sample_tree();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.root().unwrap().id, "case-1");
        assert_eq!(tree.child_ids("case-1"), ["exec-stage"]);
        assert_eq!(tree.child_ids("exec-stage"), ["exec-task"]);
        assert_eq!(
            tree.node_for_plan_item("task1").unwrap().id,
            "exec-task"
        );
    }

    #[test]
    fn test_require_node_not_found() {
        let tree = sample_tree();
        let err = tree.require_node("ghost").unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert_eq!(
            err.to_string(),
            "Case execution with id 'ghost' does not exist"
        );
    }

    #[test]
    fn test_inherited_variable_lookup() {
        let mut tree = sample_tree();
        // Task has no local 'amount'; lookup walks up to the root scope.
        assert_eq!(
            tree.variable("exec-task", "amount"),
            Some(&VariableValue::Integer(1000))
        );
        // A local write shadows the inherited value.
        tree.set_variable("exec-task", "amount", VariableValue::Integer(7));
        assert_eq!(
            tree.variable("exec-task", "amount"),
            Some(&VariableValue::Integer(7))
        );
        assert_eq!(
            tree.variable("case-1", "amount"),
            Some(&VariableValue::Integer(1000))
        );
        assert_eq!(tree.variable("exec-task", "missing"), None);
    }

    #[test]
    fn test_suspension_records_previous_state() {
        let mut tree = sample_tree();
        tree.set_state("exec-task", LifecycleState::Suspended).unwrap();
        assert_eq!(
            tree.node("exec-task").unwrap().previous_state,
            Some(LifecycleState::Active)
        );
        tree.set_state("exec-task", LifecycleState::Active).unwrap();
        assert_eq!(tree.node("exec-task").unwrap().previous_state, None);
    }

    #[test]
    fn test_commit_tracks_updates_with_snapshot_version() {
        let mut tree = sample_tree();
        tree.set_state("exec-task", LifecycleState::Completed).unwrap();
        let commit = tree.take_commit();
        assert_eq!(commit.updates.len(), 1);
        assert_eq!(commit.updates[0].id, "exec-task");
        // The snapshot version rides along for the conditional UPDATE.
        assert_eq!(commit.updates[0].version, 5);
        assert!(commit.inserts.is_empty());
        assert!(commit.removes.is_empty());
        assert!(!tree.has_changes());
    }

    #[test]
    fn test_insert_then_mutate_stays_an_insert() {
        let mut tree = sample_tree();
        let node = ExecutionNode::new(
            "case-1",
            "ms1",
            Some("exec-stage".to_string()),
            LifecycleState::Available,
        );
        let id = node.id.clone();
        tree.insert(node);
        tree.set_state(&id, LifecycleState::Completed).unwrap();
        let commit = tree.take_commit();
        assert_eq!(commit.inserts.len(), 1);
        assert!(commit.updates.is_empty());
    }

    #[test]
    fn test_insert_then_remove_is_a_no_op_commit() {
        let mut tree = sample_tree();
        let node = ExecutionNode::new(
            "case-1",
            "ms1",
            Some("exec-stage".to_string()),
            LifecycleState::Available,
        );
        let id = node.id.clone();
        tree.insert(node);
        tree.remove(&id);
        let commit = tree.take_commit();
        assert!(commit.is_empty());
    }

    #[test]
    fn test_remove_unlinks_from_parent_and_index() {
        let mut tree = sample_tree();
        tree.remove("exec-task");
        assert!(tree.node("exec-task").is_none());
        assert!(tree.child_ids("exec-stage").is_empty());
        assert!(tree.node_for_plan_item("task1").is_none());
        let commit = tree.take_commit();
        assert_eq!(commit.removes.len(), 1);
        assert_eq!(commit.removes[0].version, 5);
    }
}
