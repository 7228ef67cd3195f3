// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! History projection: immutable audit records of completed lifecycles.
//!
//! The projector subscribes (in-process, same unit of work) to instance
//! start and to every terminal transition. Records denormalize the identity
//! fields reporting needs — definition id/key/name, business key, plan item
//! id, timestamps — so the reporting surface never joins back into live
//! execution state. Records are committed in the same transaction as the
//! triggering mutation: a rolled-back command leaves no history behind.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::execution::ExecutionNode;
use crate::lifecycle::LifecycleState;
use crate::persistence::Persistence;
use crate::plan::{PlanItem, PlanModel};

/// Immutable projection of one case instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricCaseInstance {
    /// The case instance id.
    pub id: String,
    /// Deployed definition id.
    pub case_definition_id: String,
    /// Definition key.
    pub case_definition_key: String,
    /// Definition name.
    pub case_definition_name: String,
    /// Business key, if one was supplied at creation.
    pub business_key: Option<String>,
    /// When the instance was created.
    pub create_time: DateTime<Utc>,
    /// When the instance reached a terminal state; `None` while running.
    pub close_time: Option<DateTime<Utc>>,
    /// Final (or current) state.
    pub state: LifecycleState,
}

/// Immutable projection of one completed execution node lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricCaseActivityInstance {
    /// The execution id.
    pub id: String,
    /// The owning case instance.
    pub case_instance_id: String,
    /// Deployed definition id.
    pub case_definition_id: String,
    /// Definition key.
    pub case_definition_key: String,
    /// The plan item this execution instantiated.
    pub plan_item_id: String,
    /// Plan item name.
    pub name: String,
    /// When the execution was created.
    pub create_time: DateTime<Utc>,
    /// When the execution reached its terminal state.
    pub end_time: DateTime<Utc>,
    /// The terminal state.
    pub state: LifecycleState,
}

/// Immutable record of one decision evaluation.
///
/// Decision-table evaluation itself happens outside the engine; the
/// evaluating layer reports results through
/// [`HistoryService::record_decision_instance`] and the engine stores and
/// serves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HistoricDecisionInstance {
    /// The historic decision instance id.
    pub id: String,
    /// Deployed decision definition id.
    pub decision_definition_id: String,
    /// Decision definition key.
    pub decision_definition_key: String,
    /// Decision definition name.
    pub decision_definition_name: String,
    /// When the decision was evaluated.
    pub evaluation_time: DateTime<Utc>,
    /// Deployed process definition id of the evaluating scope.
    pub process_definition_id: Option<String>,
    /// Process definition key of the evaluating scope.
    pub process_definition_key: Option<String>,
    /// The evaluating process instance.
    pub process_instance_id: Option<String>,
    /// The activity that evaluated the decision.
    pub activity_id: Option<String>,
    /// The activity instance that evaluated the decision.
    pub activity_instance_id: Option<String>,
}

/// A history projection produced inside a command.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    /// The instance started; insert its historic case record.
    CaseStarted(HistoricCaseInstance),
    /// The instance root reached a terminal state; close the case record.
    CaseEnded {
        /// The case instance id.
        case_instance_id: String,
        /// The terminal state.
        state: LifecycleState,
        /// The close timestamp.
        close_time: DateTime<Utc>,
    },
    /// An execution node reached a terminal state.
    ActivityEnded(HistoricCaseActivityInstance),
}

/// Build the historic record for one terminal execution node transition.
pub fn activity_record(
    plan: &PlanModel,
    item: &PlanItem,
    node: &ExecutionNode,
    state: LifecycleState,
    end_time: DateTime<Utc>,
) -> HistoricCaseActivityInstance {
    HistoricCaseActivityInstance {
        id: node.id.clone(),
        case_instance_id: node.case_instance_id.clone(),
        case_definition_id: plan.id.clone(),
        case_definition_key: plan.key.clone(),
        plan_item_id: node.plan_item_id.clone(),
        name: item.name.clone(),
        create_time: node.created_at,
        end_time,
        state,
    }
}

/// Fields reported by the decision layer for one evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDecisionInstance {
    /// Deployed decision definition id (required).
    pub decision_definition_id: String,
    /// Decision definition key (required).
    pub decision_definition_key: String,
    /// Decision definition name.
    pub decision_definition_name: String,
    /// Process definition id of the evaluating scope.
    pub process_definition_id: Option<String>,
    /// Process definition key of the evaluating scope.
    pub process_definition_key: Option<String>,
    /// The evaluating process instance.
    pub process_instance_id: Option<String>,
    /// The evaluating activity.
    pub activity_id: Option<String>,
    /// The evaluating activity instance.
    pub activity_instance_id: Option<String>,
}

/// Read-only reporting surface over committed history, plus the append and
/// removal operations the excluded layers call.
#[derive(Clone)]
pub struct HistoryService {
    persistence: Arc<dyn Persistence>,
}

impl HistoryService {
    /// Create a history service over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Record one decision evaluation, assigning id and evaluation time.
    pub async fn record_decision_instance(
        &self,
        new: NewDecisionInstance,
    ) -> Result<HistoricDecisionInstance> {
        if new.decision_definition_id.is_empty() {
            return Err(EngineError::validation(
                "decisionDefinitionId",
                "must not be empty",
            ));
        }
        if new.decision_definition_key.is_empty() {
            return Err(EngineError::validation(
                "decisionDefinitionKey",
                "must not be empty",
            ));
        }
        let record = HistoricDecisionInstance {
            id: Uuid::new_v4().to_string(),
            decision_definition_id: new.decision_definition_id,
            decision_definition_key: new.decision_definition_key,
            decision_definition_name: new.decision_definition_name,
            evaluation_time: Utc::now(),
            process_definition_id: new.process_definition_id,
            process_definition_key: new.process_definition_key,
            process_instance_id: new.process_instance_id,
            activity_id: new.activity_id,
            activity_instance_id: new.activity_instance_id,
        };
        self.persistence.insert_decision_instance(&record).await?;
        Ok(record)
    }

    /// Fetch one historic decision instance.
    ///
    /// # Errors
    ///
    /// `NotFound` with the message the REST layer surfaces verbatim when no
    /// record exists for `id`.
    pub async fn decision_instance(&self, id: &str) -> Result<HistoricDecisionInstance> {
        self.persistence
            .get_decision_instance(id)
            .await?
            .ok_or_else(|| EngineError::not_found("historic decision instance", id))
    }

    /// Remove one historic decision instance (explicit archival operation).
    pub async fn delete_decision_instance(&self, id: &str) -> Result<()> {
        let removed = self.persistence.delete_decision_instance(id).await?;
        if !removed {
            return Err(EngineError::not_found("historic decision instance", id));
        }
        Ok(())
    }

    /// Fetch the historic record of one case instance.
    pub async fn case_instance(&self, id: &str) -> Result<HistoricCaseInstance> {
        self.persistence
            .get_historic_case_instance(id)
            .await?
            .ok_or_else(|| EngineError::not_found("historic case instance", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanItem;

    #[test]
    fn test_activity_record_denormalizes_identity() {
        let plan = PlanModel::builder("loan", "Loan handling")
            .root("case1", ["task1"])
            .add(PlanItem::task("task1", "Check documents"))
            .build()
            .unwrap();
        let item = plan.item("task1").unwrap();
        let node = ExecutionNode::new("case-9", "task1", Some("case-9".to_string()), LifecycleState::Active);
        let end = Utc::now();

        let record = activity_record(&plan, item, &node, LifecycleState::Completed, end);
        assert_eq!(record.id, node.id);
        assert_eq!(record.case_instance_id, "case-9");
        assert_eq!(record.case_definition_id, plan.id);
        assert_eq!(record.case_definition_key, "loan");
        assert_eq!(record.plan_item_id, "task1");
        assert_eq!(record.name, "Check documents");
        assert_eq!(record.state, LifecycleState::Completed);
        assert_eq!(record.end_time, end);
    }

    #[test]
    fn test_decision_instance_serializes_camel_case() {
        let record = HistoricDecisionInstance {
            id: "d-1".to_string(),
            decision_definition_id: "def-1".to_string(),
            decision_definition_key: "credit".to_string(),
            decision_definition_name: "Credit decision".to_string(),
            evaluation_time: Utc::now(),
            process_definition_id: Some("pd-1".to_string()),
            process_definition_key: Some("invoice".to_string()),
            process_instance_id: Some("pi-1".to_string()),
            activity_id: Some("evaluateDecision".to_string()),
            activity_instance_id: Some("ai-1".to_string()),
        };
        let encoded = serde_json::to_value(&record).unwrap();
        for field in [
            "id",
            "decisionDefinitionId",
            "decisionDefinitionKey",
            "decisionDefinitionName",
            "evaluationTime",
            "processDefinitionId",
            "processDefinitionKey",
            "processInstanceId",
            "activityId",
            "activityInstanceId",
        ] {
            assert!(encoded.get(field).is_some(), "missing field {}", field);
        }
    }
}
