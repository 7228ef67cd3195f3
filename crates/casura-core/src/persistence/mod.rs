// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for casura-core.
//!
//! This module defines the persistence abstraction and backend
//! implementations. The engine core never blocks: all I/O funnels through
//! the [`Persistence`] trait, and the optimistic concurrency contract lives
//! at this boundary — [`Persistence::commit_case`] applies a command's whole
//! change set in one transaction, version-checking every update and delete,
//! and fails with a concurrency error when any row moved on since the
//! snapshot was read.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::authorization::{
    Authorization, AuthorizationContext, Permission, Permissions, ResourceType,
};
use crate::error::{EngineError, Result};
use crate::execution::{ExecutionNode, TreeCommit};
use crate::filter::Filter;
use crate::history::{
    HistoricCaseActivityInstance, HistoricCaseInstance, HistoricDecisionInstance, HistoryEvent,
};
use crate::identity::{Group, Tenant, User};
use crate::lifecycle::LifecycleState;
use crate::variables::{Comparison, VariableValue, Variables};

/// One case instance tree as loaded from storage: a consistent snapshot.
#[derive(Debug)]
pub struct LoadedCase {
    /// Deployed definition id of the instance.
    pub case_definition_id: String,
    /// Definition key of the instance.
    pub case_definition_key: String,
    /// All live execution nodes of the instance.
    pub nodes: Vec<ExecutionNode>,
    /// Local variable scopes keyed by execution id.
    pub variables: HashMap<String, Variables>,
}

/// The full change set of one command, committed atomically.
#[derive(Debug)]
pub struct CaseCommit {
    /// The case instance the change set belongs to.
    pub case_instance_id: String,
    /// Deployed definition id, denormalized onto every execution row.
    pub case_definition_id: String,
    /// Definition key, denormalized onto every execution row.
    pub case_definition_key: String,
    /// Execution tree changes with snapshot versions.
    pub tree: TreeCommit,
    /// History records to project in the same transaction.
    pub history: Vec<HistoryEvent>,
}

/// Sort direction; every requested order field carries one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Ascending,
    /// Descending.
    Descending,
}

impl SortDirection {
    /// The SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Orderable fields of a case instance query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseInstanceOrderField {
    /// Order by case instance id.
    CaseInstanceId,
    /// Order by definition key.
    CaseDefinitionKey,
    /// Order by definition id.
    CaseDefinitionId,
}

impl CaseInstanceOrderField {
    /// The backing column.
    pub fn column(&self) -> &'static str {
        match self {
            Self::CaseInstanceId => "id",
            Self::CaseDefinitionKey => "case_definition_key",
            Self::CaseDefinitionId => "case_definition_id",
        }
    }
}

/// A variable comparison filter, validated by the query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableFilter {
    /// Variable name.
    pub name: String,
    /// Comparison operator.
    pub op: Comparison,
    /// Comparison constant.
    pub value: VariableValue,
}

/// The subject scope folded into a query's SQL when authorization is on.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthScope {
    /// The subject's user id, if authenticated.
    pub user_id: Option<String>,
    /// The subject's group ids.
    pub group_ids: Vec<String>,
}

impl AuthScope {
    /// Build a scope from a call's authorization context.
    pub fn from_context(ctx: &AuthorizationContext) -> Self {
        Self {
            user_id: ctx.user_id.clone(),
            group_ids: ctx.group_ids.clone(),
        }
    }
}

/// Filter options for case instance queries.
#[derive(Debug, Clone, Default)]
pub struct CaseInstanceQueryParams {
    /// Select a single instance by id.
    pub case_instance_id: Option<String>,
    /// Filter by business key.
    pub business_key: Option<String>,
    /// Filter by deployed definition id.
    pub case_definition_id: Option<String>,
    /// Filter by definition key.
    pub case_definition_key: Option<String>,
    /// Filter by lifecycle states (empty = any).
    pub states: Vec<LifecycleState>,
    /// Variable comparisons against the instance's global scope.
    pub variables: Vec<VariableFilter>,
    /// Requested ordering, applied in sequence.
    pub order: Vec<(CaseInstanceOrderField, SortDirection)>,
    /// Rows to skip.
    pub first_result: Option<i64>,
    /// Maximum rows to return.
    pub max_results: Option<i64>,
    /// Authorization scope; `None` when authorization is disabled.
    pub auth: Option<AuthScope>,
}

/// A case instance as returned by queries (the root execution row plus the
/// denormalized definition identity).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseInstanceSummary {
    /// The case instance id.
    pub id: String,
    /// Business key.
    pub business_key: Option<String>,
    /// Deployed definition id.
    pub case_definition_id: String,
    /// Definition key.
    pub case_definition_key: String,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Creation timestamp.
    pub create_time: DateTime<Utc>,
}

/// Filter options for tenant queries.
#[derive(Debug, Clone, Default)]
pub struct TenantQueryParams {
    /// Select a single tenant by id.
    pub tenant_id: Option<String>,
    /// Filter by exact name.
    pub name: Option<String>,
    /// Filter by name pattern (`%` wildcards).
    pub name_like: Option<String>,
    /// Order by tenant id.
    pub order_by_id: Option<SortDirection>,
    /// Authorization scope; `None` when authorization is disabled.
    pub auth: Option<AuthScope>,
}

/// Filter options for saved-filter queries.
#[derive(Debug, Clone, Default)]
pub struct FilterQueryParams {
    /// Select a single filter by id.
    pub filter_id: Option<String>,
    /// Filter by exact name.
    pub name: Option<String>,
    /// Filter by name pattern (`%` wildcards).
    pub name_like: Option<String>,
    /// Filter by owner.
    pub owner: Option<String>,
    /// Filter by resource type.
    pub resource_type: Option<String>,
}

/// Filter options for authorization grant queries.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationQueryParams {
    /// Grants for any of these users.
    pub user_ids: Vec<String>,
    /// Grants for any of these groups.
    pub group_ids: Vec<String>,
    /// Filter by resource type.
    pub resource_type: Option<ResourceType>,
    /// Filter by resource id.
    pub resource_id: Option<String>,
    /// Only grants carrying this permission.
    pub permission: Option<Permission>,
}

/// Filter options for historic case activity queries.
#[derive(Debug, Clone, Default)]
pub struct HistoricActivityQueryParams {
    /// Filter by owning case instance.
    pub case_instance_id: Option<String>,
    /// Filter by plan item.
    pub plan_item_id: Option<String>,
    /// Filter by terminal states (empty = any).
    pub states: Vec<LifecycleState>,
}

/// Filter options for historic decision instance queries.
#[derive(Debug, Clone, Default)]
pub struct DecisionInstanceQueryParams {
    /// Filter by decision definition key.
    pub decision_definition_key: Option<String>,
    /// Filter by evaluating process instance.
    pub process_instance_id: Option<String>,
}

/// Versioned storage of execution trees, history, filters, identities and
/// grants.
///
/// Implementations must make [`commit_case`](Self::commit_case) atomic: all
/// updates/removes are conditional on their snapshot version and any
/// mismatch aborts the transaction with [`EngineError::Concurrency`].
#[async_trait]
pub trait Persistence: Send + Sync {
    // ------------------------------------------------------------------
    // Case execution trees
    // ------------------------------------------------------------------

    /// Load the full tree of one case instance, or `None` when unknown.
    async fn load_case_tree(&self, case_instance_id: &str) -> Result<Option<LoadedCase>>;

    /// Load a single execution node.
    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionNode>>;

    /// Resolve the case instance an execution belongs to.
    async fn find_case_instance_id(&self, execution_id: &str) -> Result<Option<String>>;

    /// Commit one command's change set atomically under version checks.
    async fn commit_case(&self, commit: &CaseCommit) -> Result<()>;

    /// Remove a closed case's remaining rows, guarded by the root version.
    async fn remove_case(&self, case_instance_id: &str, expected_root_version: i64) -> Result<()>;

    /// Query case instances (root executions), authorization-scoped.
    async fn query_case_instances(
        &self,
        params: &CaseInstanceQueryParams,
    ) -> Result<Vec<CaseInstanceSummary>>;

    /// Count case instances matching the params (ignores pagination).
    async fn count_case_instances(&self, params: &CaseInstanceQueryParams) -> Result<i64>;

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Fetch one historic case instance.
    async fn get_historic_case_instance(&self, id: &str)
    -> Result<Option<HistoricCaseInstance>>;

    /// Query historic case activity records.
    async fn query_historic_activities(
        &self,
        params: &HistoricActivityQueryParams,
    ) -> Result<Vec<HistoricCaseActivityInstance>>;

    /// Append one historic decision instance.
    async fn insert_decision_instance(&self, record: &HistoricDecisionInstance) -> Result<()>;

    /// Fetch one historic decision instance.
    async fn get_decision_instance(&self, id: &str) -> Result<Option<HistoricDecisionInstance>>;

    /// Delete one historic decision instance. Returns whether it existed.
    async fn delete_decision_instance(&self, id: &str) -> Result<bool>;

    /// Query historic decision instances.
    async fn query_decision_instances(
        &self,
        params: &DecisionInstanceQueryParams,
    ) -> Result<Vec<HistoricDecisionInstance>>;

    // ------------------------------------------------------------------
    // Saved filters
    // ------------------------------------------------------------------

    /// Insert a new filter.
    async fn insert_filter(&self, filter: &Filter) -> Result<()>;

    /// Update an existing filter by id.
    async fn update_filter(&self, filter: &Filter) -> Result<()>;

    /// Fetch a filter by id.
    async fn get_filter(&self, id: &str) -> Result<Option<Filter>>;

    /// Delete a filter by id. Returns whether it existed.
    async fn delete_filter(&self, id: &str) -> Result<bool>;

    /// Query filters.
    async fn query_filters(&self, params: &FilterQueryParams) -> Result<Vec<Filter>>;

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Insert or update a user.
    async fn save_user(&self, user: &User) -> Result<()>;

    /// Fetch a user by id.
    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    /// Delete a user by id. Returns whether it existed.
    async fn delete_user(&self, id: &str) -> Result<bool>;

    /// Insert or update a group.
    async fn save_group(&self, group: &Group) -> Result<()>;

    /// Fetch a group by id.
    async fn get_group(&self, id: &str) -> Result<Option<Group>>;

    /// Delete a group by id. Returns whether it existed.
    async fn delete_group(&self, id: &str) -> Result<bool>;

    /// Insert or update a tenant.
    async fn save_tenant(&self, tenant: &Tenant) -> Result<()>;

    /// Fetch a tenant by id.
    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>>;

    /// Delete a tenant by id. Returns whether it existed.
    async fn delete_tenant(&self, id: &str) -> Result<bool>;

    /// Insert a tenant membership for a user or a group.
    async fn insert_tenant_membership(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        group_id: Option<&str>,
    ) -> Result<()>;

    /// Delete a tenant membership. Returns whether it existed.
    async fn delete_tenant_membership(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        group_id: Option<&str>,
    ) -> Result<bool>;

    /// Query tenants, authorization-scoped.
    async fn query_tenants(&self, params: &TenantQueryParams) -> Result<Vec<Tenant>>;

    /// Count tenants matching the params.
    async fn count_tenants(&self, params: &TenantQueryParams) -> Result<i64>;

    // ------------------------------------------------------------------
    // Authorizations
    // ------------------------------------------------------------------

    /// Insert a grant.
    async fn insert_authorization(&self, authorization: &Authorization) -> Result<()>;

    /// Delete a grant by id. Returns whether it existed.
    async fn delete_authorization(&self, id: &str) -> Result<bool>;

    /// Delete all grants of one subject on one resource. Returns the count.
    async fn delete_authorizations_for_subject(
        &self,
        user_id: Option<&str>,
        group_id: Option<&str>,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<u64>;

    /// Query grants.
    async fn query_authorizations(
        &self,
        params: &AuthorizationQueryParams,
    ) -> Result<Vec<Authorization>>;

    /// Count grants matching the params.
    async fn count_authorizations(&self, params: &AuthorizationQueryParams) -> Result<i64>;

    /// Whether the subject holds a permission on a resource, directly or via
    /// a group, for the specific id or the ANY wildcard.
    async fn has_permission(
        &self,
        ctx: &AuthorizationContext,
        permission: Permission,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool>;

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// Whether the backing database answers a trivial query.
    async fn health_check_db(&self) -> Result<bool>;
}

// ======================================================================
// Row types shared by the SQL backends
// ======================================================================

/// Execution row as stored; converts to/from [`ExecutionNode`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionRow {
    /// Execution id.
    pub id: String,
    /// Owning case instance id.
    pub case_instance_id: String,
    /// Denormalized definition id.
    pub case_definition_id: String,
    /// Denormalized definition key.
    pub case_definition_key: String,
    /// Plan item id.
    pub plan_item_id: String,
    /// Parent execution id.
    pub parent_id: Option<String>,
    /// Lifecycle state name.
    pub state: String,
    /// Pre-suspension state name.
    pub previous_state: Option<String>,
    /// Optimistic locking version.
    pub version: i64,
    /// Business key (root only).
    pub business_key: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ExecutionRow {
    /// Convert to the in-memory node, parsing the stored state names.
    pub fn into_node(self) -> Result<ExecutionNode> {
        let state = parse_state(&self.state)?;
        let previous_state = self
            .previous_state
            .as_deref()
            .map(parse_state)
            .transpose()?;
        Ok(ExecutionNode {
            id: self.id,
            case_instance_id: self.case_instance_id,
            plan_item_id: self.plan_item_id,
            parent_id: self.parent_id,
            state,
            previous_state,
            version: self.version,
            business_key: self.business_key,
            created_at: self.created_at,
        })
    }

    /// Convert a root row to the query-facing summary.
    pub fn into_summary(self) -> Result<CaseInstanceSummary> {
        let state = parse_state(&self.state)?;
        Ok(CaseInstanceSummary {
            id: self.id,
            business_key: self.business_key,
            case_definition_id: self.case_definition_id,
            case_definition_key: self.case_definition_key,
            state,
            create_time: self.created_at,
        })
    }
}

fn parse_state(value: &str) -> Result<LifecycleState> {
    LifecycleState::parse(value).ok_or_else(|| EngineError::Database {
        operation: "decode".to_string(),
        details: format!("unknown lifecycle state '{}'", value),
    })
}

/// Variable row in the typed-column layout.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VariableRow {
    /// Owning execution id.
    pub execution_id: String,
    /// Variable name.
    pub name: String,
    /// Value type tag.
    pub var_type: String,
    /// String/json payload.
    pub text_value: Option<String>,
    /// Integer/boolean payload.
    pub long_value: Option<i64>,
    /// Double payload.
    pub double_value: Option<f64>,
    /// Date payload.
    pub timestamp_value: Option<DateTime<Utc>>,
    /// Bytes payload.
    pub bytes_value: Option<Vec<u8>>,
}

impl VariableRow {
    /// Decode the typed value out of the column layout.
    pub fn decode(&self) -> Result<VariableValue> {
        let missing = || EngineError::Database {
            operation: "decode".to_string(),
            details: format!("variable '{}' has no value for its type", self.name),
        };
        Ok(match self.var_type.as_str() {
            "string" => VariableValue::String(self.text_value.clone().ok_or_else(missing)?),
            "integer" => VariableValue::Integer(self.long_value.ok_or_else(missing)?),
            "double" => VariableValue::Double(self.double_value.ok_or_else(missing)?),
            "boolean" => VariableValue::Boolean(self.long_value.ok_or_else(missing)? != 0),
            "date" => VariableValue::Date(self.timestamp_value.ok_or_else(missing)?),
            "bytes" => VariableValue::Bytes(self.bytes_value.clone().ok_or_else(missing)?),
            "json" => VariableValue::Json(serde_json::from_str(
                self.text_value.as_deref().ok_or_else(missing)?,
            )?),
            other => {
                return Err(EngineError::Database {
                    operation: "decode".to_string(),
                    details: format!("unknown variable type '{}'", other),
                });
            }
        })
    }
}

/// The typed-column encoding of one variable value for INSERT binding.
#[derive(Debug, Default)]
pub struct VariableColumns {
    /// Value type tag.
    pub var_type: &'static str,
    /// String/json payload.
    pub text_value: Option<String>,
    /// Integer/boolean payload.
    pub long_value: Option<i64>,
    /// Double payload.
    pub double_value: Option<f64>,
    /// Date payload.
    pub timestamp_value: Option<DateTime<Utc>>,
    /// Bytes payload.
    pub bytes_value: Option<Vec<u8>>,
}

impl VariableColumns {
    /// Encode a value into the column layout.
    pub fn encode(value: &VariableValue) -> Result<Self> {
        Ok(match value {
            VariableValue::String(s) => Self {
                var_type: "string",
                text_value: Some(s.clone()),
                ..Self::default()
            },
            VariableValue::Integer(i) => Self {
                var_type: "integer",
                long_value: Some(*i),
                // Mirrored for cross-type numeric comparison in SQL.
                double_value: Some(*i as f64),
                ..Self::default()
            },
            VariableValue::Double(d) => Self {
                var_type: "double",
                double_value: Some(*d),
                ..Self::default()
            },
            VariableValue::Boolean(b) => Self {
                var_type: "boolean",
                long_value: Some(i64::from(*b)),
                ..Self::default()
            },
            VariableValue::Date(d) => Self {
                var_type: "date",
                timestamp_value: Some(*d),
                ..Self::default()
            },
            VariableValue::Bytes(b) => Self {
                var_type: "bytes",
                bytes_value: Some(b.clone()),
                ..Self::default()
            },
            VariableValue::Json(j) => Self {
                var_type: "json",
                text_value: Some(serde_json::to_string(j)?),
                ..Self::default()
            },
        })
    }
}

/// Historic case instance row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoricCaseInstanceRow {
    /// The case instance id.
    pub id: String,
    /// Definition id.
    pub case_definition_id: String,
    /// Definition key.
    pub case_definition_key: String,
    /// Definition name.
    pub case_definition_name: String,
    /// Business key.
    pub business_key: Option<String>,
    /// Creation timestamp.
    pub create_time: DateTime<Utc>,
    /// Close timestamp.
    pub close_time: Option<DateTime<Utc>>,
    /// State name.
    pub state: String,
}

impl HistoricCaseInstanceRow {
    /// Convert to the API record.
    pub fn into_record(self) -> Result<HistoricCaseInstance> {
        let state = parse_state(&self.state)?;
        Ok(HistoricCaseInstance {
            id: self.id,
            case_definition_id: self.case_definition_id,
            case_definition_key: self.case_definition_key,
            case_definition_name: self.case_definition_name,
            business_key: self.business_key,
            create_time: self.create_time,
            close_time: self.close_time,
            state,
        })
    }
}

/// Historic case activity row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoricActivityRow {
    /// The execution id.
    pub id: String,
    /// Owning case instance.
    pub case_instance_id: String,
    /// Definition id.
    pub case_definition_id: String,
    /// Definition key.
    pub case_definition_key: String,
    /// Plan item id.
    pub plan_item_id: String,
    /// Plan item name.
    pub name: String,
    /// Creation timestamp.
    pub create_time: DateTime<Utc>,
    /// End timestamp.
    pub end_time: DateTime<Utc>,
    /// Terminal state name.
    pub state: String,
}

impl HistoricActivityRow {
    /// Convert to the API record.
    pub fn into_record(self) -> Result<HistoricCaseActivityInstance> {
        let state = parse_state(&self.state)?;
        Ok(HistoricCaseActivityInstance {
            id: self.id,
            case_instance_id: self.case_instance_id,
            case_definition_id: self.case_definition_id,
            case_definition_key: self.case_definition_key,
            plan_item_id: self.plan_item_id,
            name: self.name,
            create_time: self.create_time,
            end_time: self.end_time,
            state,
        })
    }
}

/// Saved filter row; query/properties are stored as JSON text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FilterRow {
    /// Filter id.
    pub id: String,
    /// Resource type.
    pub resource_type: String,
    /// Display name.
    pub name: String,
    /// Owner.
    pub owner: Option<String>,
    /// Stored query JSON.
    pub query: String,
    /// Stored properties JSON.
    pub properties: String,
}

impl FilterRow {
    /// Convert to the API record, parsing the JSON payloads.
    pub fn into_record(self) -> Result<Filter> {
        Ok(Filter {
            id: self.id,
            resource_type: self.resource_type,
            name: self.name,
            owner: self.owner,
            query: serde_json::from_str(&self.query)?,
            properties: serde_json::from_str(&self.properties)?,
        })
    }
}

/// Authorization grant row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthorizationRow {
    /// Grant id.
    pub id: String,
    /// Granted user.
    pub user_id: Option<String>,
    /// Granted group.
    pub group_id: Option<String>,
    /// Resource type name.
    pub resource_type: String,
    /// Resource id or the ANY wildcard.
    pub resource_id: String,
    /// Permission bitmask.
    pub permissions: i64,
}

impl AuthorizationRow {
    /// Convert to the API record.
    pub fn into_record(self) -> Result<Authorization> {
        let resource_type =
            ResourceType::parse(&self.resource_type).ok_or_else(|| EngineError::Database {
                operation: "decode".to_string(),
                details: format!("unknown resource type '{}'", self.resource_type),
            })?;
        Ok(Authorization {
            id: self.id,
            user_id: self.user_id,
            group_id: self.group_id,
            resource_type,
            resource_id: self.resource_id,
            permissions: Permissions(self.permissions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_row_round_trip() {
        let row = ExecutionRow {
            id: "e-1".to_string(),
            case_instance_id: "c-1".to_string(),
            case_definition_id: "loan:1:abc".to_string(),
            case_definition_key: "loan".to_string(),
            plan_item_id: "task1".to_string(),
            parent_id: Some("c-1".to_string()),
            state: "suspended".to_string(),
            previous_state: Some("active".to_string()),
            version: 7,
            business_key: None,
            created_at: Utc::now(),
        };
        let node = row.into_node().unwrap();
        assert_eq!(node.state, LifecycleState::Suspended);
        assert_eq!(node.previous_state, Some(LifecycleState::Active));
        assert_eq!(node.version, 7);
    }

    #[test]
    fn test_execution_row_rejects_unknown_state() {
        let row = ExecutionRow {
            id: "e-1".to_string(),
            case_instance_id: "c-1".to_string(),
            case_definition_id: "d".to_string(),
            case_definition_key: "k".to_string(),
            plan_item_id: "t".to_string(),
            parent_id: None,
            state: "garbled".to_string(),
            previous_state: None,
            version: 0,
            business_key: None,
            created_at: Utc::now(),
        };
        assert!(row.into_node().is_err());
    }

    #[test]
    fn test_variable_columns_round_trip() {
        let values = vec![
            VariableValue::String("x".to_string()),
            VariableValue::Integer(42),
            VariableValue::Double(2.5),
            VariableValue::Boolean(true),
            VariableValue::Date(Utc::now()),
            VariableValue::Bytes(vec![1, 2]),
            VariableValue::Json(serde_json::json!({"k": 1})),
        ];
        for value in values {
            let cols = VariableColumns::encode(&value).unwrap();
            let row = VariableRow {
                execution_id: "e".to_string(),
                name: "v".to_string(),
                var_type: cols.var_type.to_string(),
                text_value: cols.text_value.clone(),
                long_value: cols.long_value,
                double_value: cols.double_value,
                timestamp_value: cols.timestamp_value,
                bytes_value: cols.bytes_value.clone(),
            };
            assert_eq!(row.decode().unwrap(), value);
        }
    }

    #[test]
    fn test_integer_mirrors_into_double_column() {
        let cols = VariableColumns::encode(&VariableValue::Integer(3)).unwrap();
        assert_eq!(cols.double_value, Some(3.0));
    }
}
