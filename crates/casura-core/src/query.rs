// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fluent, permission-scoped query builders.
//!
//! Builders validate their inputs immediately (`Validation` errors carry the
//! offending field and operator) and execute through the persistence layer,
//! which folds the subject's authorization scope into the SQL before
//! ordering and pagination — result counts are authorization-accurate, never
//! post-filtered.
//!
//! Ordering uses a typestate: `order_by_*()` hands out a sort builder whose
//! only exits are `asc()` and `desc()`, so "order field without a direction"
//! is not representable in compiling code.

use std::sync::Arc;

use crate::authorization::{AuthorizationContext, Permission, ResourceType};
use crate::error::{EngineError, Result};
use crate::filter::Filter;
use crate::history::{HistoricCaseActivityInstance, HistoricDecisionInstance};
use crate::identity::Tenant;
use crate::lifecycle::LifecycleState;
use crate::persistence::{
    AuthScope, AuthorizationQueryParams, CaseInstanceOrderField, CaseInstanceQueryParams,
    CaseInstanceSummary, DecisionInstanceQueryParams, FilterQueryParams,
    HistoricActivityQueryParams, Persistence, SortDirection, TenantQueryParams, VariableFilter,
};
use crate::variables::{Comparison, VariableValue, ensure_operator_supported};

fn require_non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(EngineError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn single<T>(mut results: Vec<T>) -> Result<Option<T>> {
    if results.len() > 1 {
        return Err(EngineError::validation(
            "query",
            format!("expected at most one result, got {}", results.len()),
        ));
    }
    Ok(results.pop())
}

// ======================================================================
// Case instance query
// ======================================================================

/// Query over live case instances (root executions).
pub struct CaseInstanceQuery {
    persistence: Arc<dyn Persistence>,
    ctx: AuthorizationContext,
    authorization_enabled: bool,
    params: CaseInstanceQueryParams,
}

impl std::fmt::Debug for CaseInstanceQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseInstanceQuery")
            .field("persistence", &"...")
            .field("ctx", &self.ctx)
            .field("authorization_enabled", &self.authorization_enabled)
            .field("params", &self.params)
            .finish()
    }
}

impl CaseInstanceQuery {
    pub(crate) fn new(
        persistence: Arc<dyn Persistence>,
        ctx: AuthorizationContext,
        authorization_enabled: bool,
    ) -> Self {
        Self {
            persistence,
            ctx,
            authorization_enabled,
            params: CaseInstanceQueryParams::default(),
        }
    }

    /// Select the case instance with the given id.
    pub fn case_instance_id(mut self, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        require_non_empty("caseInstanceId", &id)?;
        self.params.case_instance_id = Some(id);
        Ok(self)
    }

    /// Select case instances with the given business key.
    pub fn business_key(mut self, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        require_non_empty("businessKey", &key)?;
        self.params.business_key = Some(key);
        Ok(self)
    }

    /// Select case instances of the definition with the given id.
    pub fn case_definition_id(mut self, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        require_non_empty("caseDefinitionId", &id)?;
        self.params.case_definition_id = Some(id);
        Ok(self)
    }

    /// Select case instances of definitions with the given key.
    pub fn case_definition_key(mut self, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        require_non_empty("caseDefinitionKey", &key)?;
        self.params.case_definition_key = Some(key);
        Ok(self)
    }

    /// Only select case instances which are active.
    pub fn active(mut self) -> Self {
        self.params.states.push(LifecycleState::Active);
        self
    }

    /// Only select case instances which are completed.
    pub fn completed(mut self) -> Self {
        self.params.states.push(LifecycleState::Completed);
        self
    }

    /// Only select case instances which are terminated.
    pub fn terminated(mut self) -> Self {
        self.params.states.push(LifecycleState::Terminated);
        self
    }

    fn variable_filter(
        mut self,
        name: impl Into<String>,
        op: Comparison,
        value: VariableValue,
    ) -> Result<Self> {
        let name = name.into();
        require_non_empty("variableName", &name)?;
        ensure_operator_supported(&name, &value, op)?;
        self.params.variables.push(VariableFilter { name, op, value });
        Ok(self)
    }

    /// Only select instances with a global variable equal to the value.
    pub fn variable_value_equals(
        self,
        name: impl Into<String>,
        value: VariableValue,
    ) -> Result<Self> {
        self.variable_filter(name, Comparison::Equals, value)
    }

    /// Only select instances with the variable different from the value.
    pub fn variable_value_not_equals(
        self,
        name: impl Into<String>,
        value: VariableValue,
    ) -> Result<Self> {
        self.variable_filter(name, Comparison::NotEquals, value)
    }

    /// Only select instances with the variable greater than the value.
    ///
    /// Booleans, byte arrays and complex serialized values are rejected.
    pub fn variable_value_greater_than(
        self,
        name: impl Into<String>,
        value: VariableValue,
    ) -> Result<Self> {
        self.variable_filter(name, Comparison::GreaterThan, value)
    }

    /// Only select instances with the variable greater than or equal to the
    /// value.
    pub fn variable_value_greater_than_or_equal(
        self,
        name: impl Into<String>,
        value: VariableValue,
    ) -> Result<Self> {
        self.variable_filter(name, Comparison::GreaterThanOrEqual, value)
    }

    /// Only select instances with the variable less than the value.
    pub fn variable_value_less_than(
        self,
        name: impl Into<String>,
        value: VariableValue,
    ) -> Result<Self> {
        self.variable_filter(name, Comparison::LessThan, value)
    }

    /// Only select instances with the variable less than or equal to the
    /// value.
    pub fn variable_value_less_than_or_equal(
        self,
        name: impl Into<String>,
        value: VariableValue,
    ) -> Result<Self> {
        self.variable_filter(name, Comparison::LessThanOrEqual, value)
    }

    /// Only select instances whose string variable matches the pattern.
    ///
    /// The `%` wildcard expresses starts-with (`string%`), ends-with
    /// (`%string`) and contains (`%string%`).
    pub fn variable_value_like(
        self,
        name: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Result<Self> {
        self.variable_filter(name, Comparison::Like, VariableValue::String(pattern.into()))
    }

    /// Order by case instance id; must be followed by `asc()` or `desc()`.
    pub fn order_by_case_instance_id(self) -> CaseInstanceSort {
        CaseInstanceSort {
            query: self,
            field: CaseInstanceOrderField::CaseInstanceId,
        }
    }

    /// Order by definition key; must be followed by `asc()` or `desc()`.
    pub fn order_by_case_definition_key(self) -> CaseInstanceSort {
        CaseInstanceSort {
            query: self,
            field: CaseInstanceOrderField::CaseDefinitionKey,
        }
    }

    /// Order by definition id; must be followed by `asc()` or `desc()`.
    pub fn order_by_case_definition_id(self) -> CaseInstanceSort {
        CaseInstanceSort {
            query: self,
            field: CaseInstanceOrderField::CaseDefinitionId,
        }
    }

    fn scoped(&self) -> CaseInstanceQueryParams {
        let mut params = self.params.clone();
        params.auth = self
            .authorization_enabled
            .then(|| AuthScope::from_context(&self.ctx));
        params
    }

    /// Execute and return all matching instances.
    pub async fn list(&self) -> Result<Vec<CaseInstanceSummary>> {
        self.persistence.query_case_instances(&self.scoped()).await
    }

    /// Execute with pagination.
    pub async fn list_page(
        &self,
        first_result: i64,
        max_results: i64,
    ) -> Result<Vec<CaseInstanceSummary>> {
        let mut params = self.scoped();
        params.first_result = Some(first_result);
        params.max_results = Some(max_results);
        self.persistence.query_case_instances(&params).await
    }

    /// Count matching instances (authorization-accurate).
    pub async fn count(&self) -> Result<i64> {
        self.persistence.count_case_instances(&self.scoped()).await
    }

    /// Execute expecting at most one result.
    pub async fn single_result(&self) -> Result<Option<CaseInstanceSummary>> {
        single(self.list().await?)
    }
}

/// A pending order field; only `asc()` or `desc()` lead back to the query.
pub struct CaseInstanceSort {
    query: CaseInstanceQuery,
    field: CaseInstanceOrderField,
}

impl CaseInstanceSort {
    /// Ascending order.
    pub fn asc(mut self) -> CaseInstanceQuery {
        self.query
            .params
            .order
            .push((self.field, SortDirection::Ascending));
        self.query
    }

    /// Descending order.
    pub fn desc(mut self) -> CaseInstanceQuery {
        self.query
            .params
            .order
            .push((self.field, SortDirection::Descending));
        self.query
    }
}

// ======================================================================
// Tenant query
// ======================================================================

/// Query over tenants, authorization-scoped.
pub struct TenantQuery {
    persistence: Arc<dyn Persistence>,
    ctx: AuthorizationContext,
    authorization_enabled: bool,
    params: TenantQueryParams,
}

impl TenantQuery {
    pub(crate) fn new(
        persistence: Arc<dyn Persistence>,
        ctx: AuthorizationContext,
        authorization_enabled: bool,
    ) -> Self {
        Self {
            persistence,
            ctx,
            authorization_enabled,
            params: TenantQueryParams::default(),
        }
    }

    /// Select the tenant with the given id.
    pub fn tenant_id(mut self, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        require_non_empty("tenantId", &id)?;
        self.params.tenant_id = Some(id);
        Ok(self)
    }

    /// Select tenants with the given name.
    pub fn name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        require_non_empty("name", &name)?;
        self.params.name = Some(name);
        Ok(self)
    }

    /// Select tenants whose name matches the pattern (`%` wildcards).
    pub fn name_like(mut self, pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        require_non_empty("nameLike", &pattern)?;
        self.params.name_like = Some(pattern);
        Ok(self)
    }

    /// Order by tenant id; must be followed by `asc()` or `desc()`.
    pub fn order_by_tenant_id(self) -> TenantSort {
        TenantSort { query: self }
    }

    fn scoped(&self) -> TenantQueryParams {
        let mut params = self.params.clone();
        params.auth = self
            .authorization_enabled
            .then(|| AuthScope::from_context(&self.ctx));
        params
    }

    /// Execute and return all visible tenants.
    pub async fn list(&self) -> Result<Vec<Tenant>> {
        self.persistence.query_tenants(&self.scoped()).await
    }

    /// Count visible tenants.
    pub async fn count(&self) -> Result<i64> {
        self.persistence.count_tenants(&self.scoped()).await
    }

    /// Execute expecting at most one result.
    pub async fn single_result(&self) -> Result<Option<Tenant>> {
        single(self.list().await?)
    }
}

/// A pending tenant order field.
pub struct TenantSort {
    query: TenantQuery,
}

impl TenantSort {
    /// Ascending order.
    pub fn asc(mut self) -> TenantQuery {
        self.query.params.order_by_id = Some(SortDirection::Ascending);
        self.query
    }

    /// Descending order.
    pub fn desc(mut self) -> TenantQuery {
        self.query.params.order_by_id = Some(SortDirection::Descending);
        self.query
    }
}

// ======================================================================
// Authorization query
// ======================================================================

/// Query over stored grants (administrative, unscoped).
pub struct AuthorizationQuery {
    persistence: Arc<dyn Persistence>,
    params: AuthorizationQueryParams,
}

impl AuthorizationQuery {
    pub(crate) fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            params: AuthorizationQueryParams::default(),
        }
    }

    /// Grants for any of the given users.
    pub fn user_id_in<I, S>(mut self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params
            .user_ids
            .extend(user_ids.into_iter().map(Into::into));
        self
    }

    /// Grants for any of the given groups.
    pub fn group_id_in<I, S>(mut self, group_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params
            .group_ids
            .extend(group_ids.into_iter().map(Into::into));
        self
    }

    /// Grants on the given resource type.
    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.params.resource_type = Some(resource_type);
        self
    }

    /// Grants on the given resource id.
    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Result<Self> {
        let resource_id = resource_id.into();
        require_non_empty("resourceId", &resource_id)?;
        self.params.resource_id = Some(resource_id);
        Ok(self)
    }

    /// Only grants carrying the given permission.
    pub fn has_permission(mut self, permission: Permission) -> Self {
        self.params.permission = Some(permission);
        self
    }

    /// Execute and return matching grants.
    pub async fn list(&self) -> Result<Vec<crate::authorization::Authorization>> {
        self.persistence.query_authorizations(&self.params).await
    }

    /// Count matching grants.
    pub async fn count(&self) -> Result<i64> {
        self.persistence.count_authorizations(&self.params).await
    }
}

// ======================================================================
// Historic queries
// ======================================================================

/// Query over historic case activity records.
pub struct HistoricCaseActivityQuery {
    persistence: Arc<dyn Persistence>,
    params: HistoricActivityQueryParams,
}

impl HistoricCaseActivityQuery {
    pub(crate) fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            params: HistoricActivityQueryParams::default(),
        }
    }

    /// Records of the given case instance.
    pub fn case_instance_id(mut self, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        require_non_empty("caseInstanceId", &id)?;
        self.params.case_instance_id = Some(id);
        Ok(self)
    }

    /// Records of the given plan item.
    pub fn plan_item_id(mut self, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        require_non_empty("planItemId", &id)?;
        self.params.plan_item_id = Some(id);
        Ok(self)
    }

    /// Only completed activities.
    pub fn completed(mut self) -> Self {
        self.params.states.push(LifecycleState::Completed);
        self
    }

    /// Only terminated activities.
    pub fn terminated(mut self) -> Self {
        self.params.states.push(LifecycleState::Terminated);
        self
    }

    /// Only failed activities.
    pub fn failed(mut self) -> Self {
        self.params.states.push(LifecycleState::Failed);
        self
    }

    /// Execute and return matching records.
    pub async fn list(&self) -> Result<Vec<HistoricCaseActivityInstance>> {
        self.persistence.query_historic_activities(&self.params).await
    }
}

/// Query over historic decision instances.
pub struct HistoricDecisionInstanceQuery {
    persistence: Arc<dyn Persistence>,
    params: DecisionInstanceQueryParams,
}

impl HistoricDecisionInstanceQuery {
    pub(crate) fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            params: DecisionInstanceQueryParams::default(),
        }
    }

    /// Records of decisions with the given definition key.
    pub fn decision_definition_key(mut self, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        require_non_empty("decisionDefinitionKey", &key)?;
        self.params.decision_definition_key = Some(key);
        Ok(self)
    }

    /// Records evaluated by the given process instance.
    pub fn process_instance_id(mut self, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        require_non_empty("processInstanceId", &id)?;
        self.params.process_instance_id = Some(id);
        Ok(self)
    }

    /// Execute and return matching records.
    pub async fn list(&self) -> Result<Vec<HistoricDecisionInstance>> {
        self.persistence.query_decision_instances(&self.params).await
    }

    /// Execute expecting at most one result.
    pub async fn single_result(&self) -> Result<Option<HistoricDecisionInstance>> {
        single(self.list().await?)
    }
}

// ======================================================================
// Filter query
// ======================================================================

/// Query over saved filters.
pub struct FilterQuery {
    persistence: Arc<dyn Persistence>,
    params: FilterQueryParams,
}

impl FilterQuery {
    pub(crate) fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            params: FilterQueryParams::default(),
        }
    }

    /// Select the filter with the given id.
    pub fn filter_id(mut self, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        require_non_empty("filterId", &id)?;
        self.params.filter_id = Some(id);
        Ok(self)
    }

    /// Select filters with the given name.
    pub fn filter_name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        require_non_empty("filterName", &name)?;
        self.params.name = Some(name);
        Ok(self)
    }

    /// Select filters whose name matches the pattern (`%` wildcards).
    pub fn filter_name_like(mut self, pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        require_non_empty("filterNameLike", &pattern)?;
        self.params.name_like = Some(pattern);
        Ok(self)
    }

    /// Select filters owned by the given user.
    pub fn filter_owner(mut self, owner: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        require_non_empty("filterOwner", &owner)?;
        self.params.owner = Some(owner);
        Ok(self)
    }

    /// Select filters for the given resource type.
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Result<Self> {
        let resource_type = resource_type.into();
        require_non_empty("resourceType", &resource_type)?;
        self.params.resource_type = Some(resource_type);
        Ok(self)
    }

    /// Execute and return matching filters.
    pub async fn list(&self) -> Result<Vec<Filter>> {
        self.persistence.query_filters(&self.params).await
    }

    /// Count matching filters.
    pub async fn count(&self) -> Result<i64> {
        Ok(self.list().await?.len() as i64)
    }

    /// Execute expecting at most one result.
    pub async fn single_result(&self) -> Result<Option<Filter>> {
        single(self.list().await?)
    }
}
