// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The embeddable case engine.
//!
//! [`CaseEngine`] is the library facade the HTTP layer (and embedding
//! applications) talk to. Every external trigger executes as one logical
//! unit of work: resolve the target, authorize, load a consistent snapshot
//! of the instance tree, apply exactly one top-level trigger (which fans out
//! through propagation and sentry evaluation synchronously, in memory), and
//! commit all resulting mutations and history records atomically under
//! optimistic version checks. A version conflict retries the whole command
//! up to the configured bound before surfacing `Concurrency`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use casura_core::engine::CaseEngine;
//! use casura_core::persistence::SqlitePersistence;
//!
//! let persistence = Arc::new(SqlitePersistence::from_path(".data/casura.db").await?);
//! let engine = CaseEngine::builder()
//!     .persistence(persistence)
//!     .command_retries(3)
//!     .build()?;
//! engine.deploy_plan(plan);
//! let instance = engine
//!     .create_case_instance("loan", Some("order-77".into()), Default::default(), &ctx)
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::authorization::{
    AuthorizationContext, AuthorizationService, Permission, ResourceType,
};
use crate::behavior::Dispatcher;
use crate::commands::{CaseCommand, CommitSummary};
use crate::error::{EngineError, Result};
use crate::execution::{CaseTree, ExecutionNode};
use crate::filter::FilterService;
use crate::history::HistoryService;
use crate::identity::IdentityService;
use crate::persistence::{CaseCommit, CaseInstanceSummary, Persistence};
use crate::plan::PlanModel;
use crate::query::{
    AuthorizationQuery, CaseInstanceQuery, FilterQuery, HistoricCaseActivityQuery,
    HistoricDecisionInstanceQuery,
};
use crate::variables::Variables;

/// Builder for creating a [`CaseEngine`].
pub struct CaseEngineBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    command_retries: u32,
    authorization_enabled: bool,
}

impl std::fmt::Debug for CaseEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseEngineBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("command_retries", &self.command_retries)
            .field("authorization_enabled", &self.authorization_enabled)
            .finish()
    }
}

impl Default for CaseEngineBuilder {
    fn default() -> Self {
        Self {
            persistence: None,
            command_retries: 3,
            authorization_enabled: false,
        }
    }
}

impl CaseEngineBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Bound on command retries after optimistic-lock conflicts.
    ///
    /// Default: 3. Zero disables retrying; conflicts surface immediately.
    pub fn command_retries(mut self, retries: u32) -> Self {
        self.command_retries = retries;
        self
    }

    /// Enforce permission checks on commands and scope queries by subject.
    ///
    /// Default: off (every check passes).
    pub fn authorization_enabled(mut self, enabled: bool) -> Self {
        self.authorization_enabled = enabled;
        self
    }

    /// Build the engine.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<CaseEngine> {
        let persistence = self.persistence.ok_or_else(|| {
            EngineError::validation("persistence", "persistence is required")
        })?;
        Ok(CaseEngine {
            persistence,
            plans_by_id: RwLock::new(HashMap::new()),
            latest_by_key: RwLock::new(HashMap::new()),
            command_retries: self.command_retries,
            authorization_enabled: self.authorization_enabled,
        })
    }
}

/// The case orchestration engine.
pub struct CaseEngine {
    persistence: Arc<dyn Persistence>,
    plans_by_id: RwLock<HashMap<String, Arc<PlanModel>>>,
    latest_by_key: RwLock<HashMap<String, String>>,
    command_retries: u32,
    authorization_enabled: bool,
}

impl std::fmt::Debug for CaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseEngine")
            .field("persistence", &"...")
            .field("command_retries", &self.command_retries)
            .field("authorization_enabled", &self.authorization_enabled)
            .finish()
    }
}

impl CaseEngine {
    /// Create a new builder for configuring the engine.
    pub fn builder() -> CaseEngineBuilder {
        CaseEngineBuilder::new()
    }

    /// The configured command retry bound.
    pub fn command_retries(&self) -> u32 {
        self.command_retries
    }

    /// Whether authorization is enforced.
    pub fn authorization_enabled(&self) -> bool {
        self.authorization_enabled
    }

    /// Get a reference to the persistence layer.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    // ------------------------------------------------------------------
    // Plan registry
    // ------------------------------------------------------------------

    /// Register a resolved plan model, making it the latest of its key.
    ///
    /// Deployment and version resolution happen upstream; the engine only
    /// keeps resolved models addressable by definition id and key.
    pub fn deploy_plan(&self, plan: PlanModel) -> Arc<PlanModel> {
        let plan = Arc::new(plan);
        self.plans_by_id
            .write()
            .expect("plan registry poisoned")
            .insert(plan.id.clone(), plan.clone());
        self.latest_by_key
            .write()
            .expect("plan registry poisoned")
            .insert(plan.key.clone(), plan.id.clone());
        debug!(definition_id = %plan.id, key = %plan.key, "plan model deployed");
        plan
    }

    /// The plan model with the given definition id.
    pub fn plan_by_id(&self, definition_id: &str) -> Result<Arc<PlanModel>> {
        self.plans_by_id
            .read()
            .expect("plan registry poisoned")
            .get(definition_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("case definition", definition_id))
    }

    /// The latest plan model deployed under the given key.
    pub fn plan_by_key(&self, definition_key: &str) -> Result<Arc<PlanModel>> {
        let id = self
            .latest_by_key
            .read()
            .expect("plan registry poisoned")
            .get(definition_key)
            .cloned()
            .ok_or_else(|| EngineError::not_found("case definition", definition_key))?;
        self.plan_by_id(&id)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Create a case instance of the latest definition with the given key.
    #[instrument(skip(self, variables, ctx))]
    pub async fn create_case_instance(
        &self,
        definition_key: &str,
        business_key: Option<String>,
        variables: Variables,
        ctx: &AuthorizationContext,
    ) -> Result<CaseInstanceSummary> {
        self.authorizations()
            .require(
                ctx,
                Permission::Create,
                ResourceType::CaseInstance,
                crate::authorization::ANY_RESOURCE,
            )
            .await?;
        let plan = self.plan_by_key(definition_key)?;

        let case_instance_id = Uuid::new_v4().to_string();
        let mut tree = CaseTree::empty(&case_instance_id);
        let mut dispatcher = Dispatcher::new(&plan, &mut tree);
        dispatcher.start_instance(&case_instance_id, business_key.clone(), variables)?;
        let history = dispatcher.into_history();

        let root = tree
            .root()
            .cloned()
            .ok_or_else(|| EngineError::not_found("case execution", &case_instance_id))?;
        let commit = CaseCommit {
            case_instance_id: case_instance_id.clone(),
            case_definition_id: plan.id.clone(),
            case_definition_key: plan.key.clone(),
            tree: tree.take_commit(),
            history,
        };
        self.persistence.commit_case(&commit).await?;

        debug!(case_instance_id, "case instance created");
        Ok(CaseInstanceSummary {
            id: case_instance_id,
            business_key,
            case_definition_id: plan.id.clone(),
            case_definition_key: plan.key.clone(),
            state: root.state,
            create_time: root.created_at,
        })
    }

    /// Submit one command, retrying on optimistic-lock conflicts.
    ///
    /// The whole command (resolve, apply, fan-out, commit) re-executes on
    /// each retry against a fresh snapshot; the bound is
    /// [`CaseEngineBuilder::command_retries`]. Exhausting it surfaces the
    /// terminal `Concurrency` error.
    #[instrument(skip(self, ctx, command), fields(command = command.name(), target = command.target_id()))]
    pub async fn submit(
        &self,
        command: CaseCommand,
        ctx: &AuthorizationContext,
    ) -> Result<CommitSummary> {
        let mut attempt = 0;
        loop {
            match self.try_execute(&command, ctx).await {
                Err(error) if error.is_concurrency() && attempt < self.command_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_attempts = self.command_retries,
                        "optimistic lock conflict, retrying command"
                    );
                }
                other => return other,
            }
        }
    }

    async fn try_execute(
        &self,
        command: &CaseCommand,
        ctx: &AuthorizationContext,
    ) -> Result<CommitSummary> {
        if let CaseCommand::Close { case_instance_id } = command {
            return self.close_case(case_instance_id, ctx).await;
        }

        let execution_id = command.target_id();
        let case_instance_id = self
            .persistence
            .find_case_instance_id(execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found("case execution", execution_id))?;
        self.authorizations()
            .require(
                ctx,
                Permission::Update,
                ResourceType::CaseInstance,
                &case_instance_id,
            )
            .await?;

        let loaded = self
            .persistence
            .load_case_tree(&case_instance_id)
            .await?
            .ok_or_else(|| EngineError::not_found("case instance", &case_instance_id))?;
        // After a restart the deployment layer re-registers plans under
        // fresh definition ids; fall back to the latest model of the key.
        let plan = self
            .plan_by_id(&loaded.case_definition_id)
            .or_else(|_| self.plan_by_key(&loaded.case_definition_key))?;

        let mut tree =
            CaseTree::from_parts(case_instance_id.clone(), loaded.nodes, loaded.variables);
        let mut dispatcher = Dispatcher::new(&plan, &mut tree);
        match command {
            CaseCommand::SetVariables {
                execution_id,
                variables,
            } => {
                dispatcher.write_variables(execution_id, variables.clone())?;
            }
            _ => {
                let trigger = command
                    .trigger()
                    .expect("transition commands carry a trigger");
                dispatcher.submit_trigger(execution_id, trigger)?;
            }
        }
        let transitions = dispatcher.transition_count();
        let history = dispatcher.into_history();
        let history_records = history.len() as u32;

        let commit = CaseCommit {
            case_instance_id: case_instance_id.clone(),
            case_definition_id: loaded.case_definition_id,
            case_definition_key: loaded.case_definition_key,
            tree: tree.take_commit(),
            history,
        };
        self.persistence.commit_case(&commit).await?;

        Ok(CommitSummary {
            case_instance_id,
            transitions,
            history_records,
        })
    }

    /// Remove a terminal case instance from the live tree.
    async fn close_case(
        &self,
        case_instance_id: &str,
        ctx: &AuthorizationContext,
    ) -> Result<CommitSummary> {
        self.authorizations()
            .require(
                ctx,
                Permission::Update,
                ResourceType::CaseInstance,
                case_instance_id,
            )
            .await?;
        let root = self
            .persistence
            .get_execution(case_instance_id)
            .await?
            .ok_or_else(|| EngineError::not_found("case instance", case_instance_id))?;
        if !root.state.is_terminal() {
            return Err(EngineError::IllegalTransition {
                execution_id: case_instance_id.to_string(),
                state: root.state.as_str().to_string(),
                trigger: "close".to_string(),
            });
        }
        self.persistence
            .remove_case(case_instance_id, root.version)
            .await?;
        debug!(case_instance_id, "case instance closed");
        Ok(CommitSummary {
            case_instance_id: case_instance_id.to_string(),
            transitions: 0,
            history_records: 0,
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch one execution node.
    ///
    /// A missing id and an id the subject cannot read are indistinguishable:
    /// both surface `NotFound`, matching the query layer's row-exclusion
    /// semantics.
    pub async fn get_execution(
        &self,
        execution_id: &str,
        ctx: &AuthorizationContext,
    ) -> Result<ExecutionNode> {
        let node = self
            .persistence
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found("case execution", execution_id))?;
        let readable = self
            .authorizations()
            .is_authorized(
                ctx,
                Permission::Read,
                ResourceType::CaseInstance,
                &node.case_instance_id,
            )
            .await?;
        if !readable {
            return Err(EngineError::not_found("case execution", execution_id));
        }
        Ok(node)
    }

    /// Start a case instance query for the given subject.
    pub fn create_case_instance_query(&self, ctx: &AuthorizationContext) -> CaseInstanceQuery {
        CaseInstanceQuery::new(
            self.persistence.clone(),
            ctx.clone(),
            self.authorization_enabled,
        )
    }

    /// Start a historic case activity query.
    pub fn create_historic_activity_query(&self) -> HistoricCaseActivityQuery {
        HistoricCaseActivityQuery::new(self.persistence.clone())
    }

    /// Start a historic decision instance query.
    pub fn create_decision_instance_query(&self) -> HistoricDecisionInstanceQuery {
        HistoricDecisionInstanceQuery::new(self.persistence.clone())
    }

    /// Start an authorization grant query (administrative).
    pub fn create_authorization_query(&self) -> AuthorizationQuery {
        AuthorizationQuery::new(self.persistence.clone())
    }

    /// Start a saved-filter query.
    pub fn create_filter_query(&self) -> FilterQuery {
        FilterQuery::new(self.persistence.clone())
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    /// The history reporting surface.
    pub fn history(&self) -> HistoryService {
        HistoryService::new(self.persistence.clone())
    }

    /// The saved-filter service.
    pub fn filters(&self) -> FilterService {
        FilterService::new(self.persistence.clone())
    }

    /// The identity service.
    pub fn identity(&self) -> IdentityService {
        IdentityService::new(self.persistence.clone(), self.authorization_enabled)
    }

    /// The authorization service.
    pub fn authorizations(&self) -> AuthorizationService {
        AuthorizationService::new(self.persistence.clone(), self.authorization_enabled)
    }

    /// Whether the backing database is reachable.
    pub async fn health_check(&self) -> bool {
        self.persistence.health_check_db().await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqlitePersistence;
    use crate::plan::PlanItem;

    async fn engine() -> CaseEngine {
        let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        CaseEngine::builder().persistence(persistence).build().unwrap()
    }

    fn simple_plan() -> PlanModel {
        PlanModel::builder("review", "Document review")
            .root("case1", ["task1"])
            .add(PlanItem::task("task1", "Review document").required())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_persistence() {
        let err = CaseEngine::builder().build().unwrap_err();
        assert!(err.to_string().contains("persistence is required"));
    }

    #[test]
    fn test_builder_debug_hides_persistence() {
        let builder = CaseEngineBuilder::new();
        let debug_str = format!("{:?}", builder);
        assert!(debug_str.contains("CaseEngineBuilder"));
        assert!(debug_str.contains("command_retries"));
    }

    #[tokio::test]
    async fn test_plan_registry_latest_by_key() {
        let engine = engine().await;
        let v1 = engine.deploy_plan(simple_plan());
        let v2 = engine.deploy_plan(
            PlanModel::builder("review", "Document review")
                .version(2)
                .root("case1", ["task1"])
                .add(PlanItem::task("task1", "Review document").required())
                .build()
                .unwrap(),
        );

        assert_eq!(engine.plan_by_key("review").unwrap().id, v2.id);
        assert_eq!(engine.plan_by_id(&v1.id).unwrap().version, 1);
        let err = engine.plan_by_key("unknown").unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_create_and_complete_instance_end_to_end() {
        let engine = engine().await;
        engine.deploy_plan(simple_plan());
        let ctx = AuthorizationContext::anonymous();

        let instance = engine
            .create_case_instance("review", Some("bk-42".to_string()), Variables::new(), &ctx)
            .await
            .unwrap();
        assert_eq!(instance.case_definition_key, "review");
        assert_eq!(instance.business_key.as_deref(), Some("bk-42"));

        // The task auto-activated on instance creation.
        let query = engine.create_case_instance_query(&ctx);
        let listed = query.active().list().await.unwrap();
        assert_eq!(listed.len(), 1);

        let loaded = engine
            .persistence()
            .load_case_tree(&instance.id)
            .await
            .unwrap()
            .unwrap();
        let task = loaded
            .nodes
            .iter()
            .find(|n| n.plan_item_id == "task1")
            .unwrap();

        let summary = engine
            .submit(
                CaseCommand::Complete {
                    execution_id: task.id.clone(),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(summary.case_instance_id, instance.id);

        // Task and root completed: one historic record each.
        let history = engine
            .create_historic_activity_query()
            .case_instance_id(&instance.id)
            .unwrap()
            .list()
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_submit_unknown_execution_not_found() {
        let engine = engine().await;
        engine.deploy_plan(simple_plan());
        let err = engine
            .submit(
                CaseCommand::Complete {
                    execution_id: "ghost".to_string(),
                },
                &AuthorizationContext::anonymous(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_close_requires_terminal_state() {
        let engine = engine().await;
        engine.deploy_plan(simple_plan());
        let ctx = AuthorizationContext::anonymous();
        let instance = engine
            .create_case_instance("review", None, Variables::new(), &ctx)
            .await
            .unwrap();

        let err = engine
            .submit(
                CaseCommand::Close {
                    case_instance_id: instance.id.clone(),
                },
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ILLEGAL_TRANSITION");
    }
}
