//! PostgreSQL-backed persistence implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::authorization::{
    ANY_RESOURCE, Authorization, AuthorizationContext, Permission, ResourceType,
};
use crate::error::{EngineError, Result};
use crate::execution::ExecutionNode;
use crate::filter::Filter;
use crate::history::{
    HistoricCaseActivityInstance, HistoricCaseInstance, HistoricDecisionInstance, HistoryEvent,
};
use crate::identity::{Group, Tenant, User};
use crate::variables::{VariableValue, Variables};

use super::{
    AuthScope, AuthorizationQueryParams, AuthorizationRow, CaseCommit, CaseInstanceQueryParams,
    CaseInstanceSummary, DecisionInstanceQueryParams, ExecutionRow, FilterQueryParams, FilterRow,
    HistoricActivityQueryParams, HistoricActivityRow, HistoricCaseInstanceRow, LoadedCase,
    Persistence, TenantQueryParams, VariableColumns, VariableFilter, VariableRow,
};

/// PostgreSQL-backed persistence provider.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new PostgreSQL persistence provider from an existing pool.
    ///
    /// The caller is responsible for running
    /// [`migrations::run_postgres`](crate::migrations::run_postgres) first.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const EXECUTION_COLUMNS: &str = "e.id, e.case_instance_id, e.case_definition_id, \
     e.case_definition_key, e.plan_item_id, e.parent_id, e.state, e.previous_state, \
     e.version, e.business_key, e.created_at";

fn push_variable_filter(
    qb: &mut QueryBuilder<'_, Postgres>,
    filter: &VariableFilter,
) -> Result<()> {
    qb.push(
        " AND EXISTS (SELECT 1 FROM case_variables v \
         WHERE v.execution_id = e.id AND v.name = ",
    );
    qb.push_bind(filter.name.clone());
    let op = filter.op;
    match &filter.value {
        VariableValue::String(s) => {
            qb.push(format!(" AND v.text_value {} ", op.sql_symbol()));
            qb.push_bind(s.clone());
        }
        VariableValue::Integer(i) if !op.is_ordering() => {
            qb.push(format!(" AND v.long_value {} ", op.sql_symbol()));
            qb.push_bind(*i);
        }
        VariableValue::Integer(i) => {
            qb.push(format!(
                " AND COALESCE(v.double_value, CAST(v.long_value AS DOUBLE PRECISION)) {} ",
                op.sql_symbol()
            ));
            qb.push_bind(*i as f64);
        }
        VariableValue::Double(d) => {
            qb.push(format!(
                " AND COALESCE(v.double_value, CAST(v.long_value AS DOUBLE PRECISION)) {} ",
                op.sql_symbol()
            ));
            qb.push_bind(*d);
        }
        VariableValue::Boolean(b) => {
            qb.push(format!(" AND v.long_value {} ", op.sql_symbol()));
            qb.push_bind(i64::from(*b));
        }
        VariableValue::Date(d) => {
            qb.push(format!(" AND v.timestamp_value {} ", op.sql_symbol()));
            qb.push_bind(*d);
        }
        VariableValue::Bytes(b) => {
            qb.push(format!(" AND v.bytes_value {} ", op.sql_symbol()));
            qb.push_bind(b.clone());
        }
        VariableValue::Json(j) => {
            qb.push(format!(" AND v.text_value {} ", op.sql_symbol()));
            qb.push_bind(serde_json::to_string(j)?);
        }
    }
    qb.push(")");
    Ok(())
}

fn push_auth_scope(
    qb: &mut QueryBuilder<'_, Postgres>,
    auth: &AuthScope,
    resource_type: ResourceType,
    resource_id_col: &str,
) {
    if auth.user_id.is_none() && auth.group_ids.is_empty() {
        qb.push(" AND 1 = 0");
        return;
    }
    qb.push(format!(
        " AND EXISTS (SELECT 1 FROM authorizations a \
         WHERE a.resource_type = '{}' \
         AND (a.resource_id = {} OR a.resource_id = '{}') \
         AND (a.permissions & {}) != 0 AND (",
        resource_type.as_str(),
        resource_id_col,
        ANY_RESOURCE,
        Permission::Read.bit()
    ));
    let mut first = true;
    if let Some(user_id) = &auth.user_id {
        qb.push("a.user_id = ");
        qb.push_bind(user_id.clone());
        first = false;
    }
    if !auth.group_ids.is_empty() {
        if !first {
            qb.push(" OR ");
        }
        qb.push("a.group_id IN (");
        {
            let mut sep = qb.separated(", ");
            for group_id in &auth.group_ids {
                sep.push_bind(group_id.clone());
            }
        }
        qb.push(")");
    }
    qb.push("))");
}

fn push_case_instance_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    params: &CaseInstanceQueryParams,
) -> Result<()> {
    if let Some(id) = &params.case_instance_id {
        qb.push(" AND e.id = ");
        qb.push_bind(id.clone());
    }
    if let Some(business_key) = &params.business_key {
        qb.push(" AND e.business_key = ");
        qb.push_bind(business_key.clone());
    }
    if let Some(definition_id) = &params.case_definition_id {
        qb.push(" AND e.case_definition_id = ");
        qb.push_bind(definition_id.clone());
    }
    if let Some(definition_key) = &params.case_definition_key {
        qb.push(" AND e.case_definition_key = ");
        qb.push_bind(definition_key.clone());
    }
    if !params.states.is_empty() {
        qb.push(" AND e.state IN (");
        {
            let mut sep = qb.separated(", ");
            for state in &params.states {
                sep.push_bind(state.as_str());
            }
        }
        qb.push(")");
    }
    for filter in &params.variables {
        push_variable_filter(qb, filter)?;
    }
    if let Some(auth) = &params.auth {
        push_auth_scope(qb, auth, ResourceType::CaseInstance, "e.id");
    }
    Ok(())
}

fn push_pagination(qb: &mut QueryBuilder<'_, Postgres>, max: Option<i64>, first: Option<i64>) {
    match (max, first) {
        (Some(limit), Some(offset)) => {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
            qb.push(" OFFSET ");
            qb.push_bind(offset);
        }
        (Some(limit), None) => {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
        }
        (None, Some(offset)) => {
            qb.push(" LIMIT ALL OFFSET ");
            qb.push_bind(offset);
        }
        (None, None) => {}
    }
}

fn push_authorization_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    params: &AuthorizationQueryParams,
) {
    if !params.user_ids.is_empty() {
        qb.push(" AND a.user_id IN (");
        {
            let mut sep = qb.separated(", ");
            for user_id in &params.user_ids {
                sep.push_bind(user_id.clone());
            }
        }
        qb.push(")");
    }
    if !params.group_ids.is_empty() {
        qb.push(" AND a.group_id IN (");
        {
            let mut sep = qb.separated(", ");
            for group_id in &params.group_ids {
                sep.push_bind(group_id.clone());
            }
        }
        qb.push(")");
    }
    if let Some(resource_type) = params.resource_type {
        qb.push(" AND a.resource_type = ");
        qb.push_bind(resource_type.as_str());
    }
    if let Some(resource_id) = &params.resource_id {
        qb.push(" AND a.resource_id = ");
        qb.push_bind(resource_id.clone());
    }
    if let Some(permission) = params.permission {
        qb.push(format!(" AND (a.permissions & {}) != 0", permission.bit()));
    }
}

fn push_tenant_filters(qb: &mut QueryBuilder<'_, Postgres>, params: &TenantQueryParams) {
    if let Some(id) = &params.tenant_id {
        qb.push(" AND t.id = ");
        qb.push_bind(id.clone());
    }
    if let Some(name) = &params.name {
        qb.push(" AND t.name = ");
        qb.push_bind(name.clone());
    }
    if let Some(pattern) = &params.name_like {
        qb.push(" AND t.name LIKE ");
        qb.push_bind(pattern.clone());
    }
    if let Some(auth) = &params.auth {
        push_auth_scope(qb, auth, ResourceType::Tenant, "t.id");
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    // ------------------------------------------------------------------
    // Case execution trees
    // ------------------------------------------------------------------

    async fn load_case_tree(&self, case_instance_id: &str) -> Result<Option<LoadedCase>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM case_executions e WHERE e.case_instance_id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(case_instance_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        let case_definition_id = rows[0].case_definition_id.clone();
        let case_definition_key = rows[0].case_definition_key.clone();
        let nodes = rows
            .into_iter()
            .map(ExecutionRow::into_node)
            .collect::<Result<Vec<ExecutionNode>>>()?;

        let variable_rows = sqlx::query_as::<_, VariableRow>(
            "SELECT execution_id, name, var_type, text_value, long_value, double_value, \
             timestamp_value, bytes_value \
             FROM case_variables WHERE case_instance_id = $1",
        )
        .bind(case_instance_id)
        .fetch_all(&self.pool)
        .await?;

        let mut variables: HashMap<String, Variables> = HashMap::new();
        for row in variable_rows {
            let value = row.decode()?;
            variables
                .entry(row.execution_id.clone())
                .or_default()
                .insert(row.name.clone(), value);
        }

        Ok(Some(LoadedCase {
            case_definition_id,
            case_definition_key,
            nodes,
            variables,
        }))
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionNode>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM case_executions e WHERE e.id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ExecutionRow::into_node).transpose()
    }

    async fn find_case_instance_id(&self, execution_id: &str) -> Result<Option<String>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT case_instance_id FROM case_executions WHERE id = $1")
                .bind(execution_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    async fn commit_case(&self, commit: &CaseCommit) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for node in &commit.tree.inserts {
            sqlx::query(
                "INSERT INTO case_executions \
                 (id, case_instance_id, case_definition_id, case_definition_key, plan_item_id, \
                  parent_id, state, previous_state, version, business_key, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10)",
            )
            .bind(&node.id)
            .bind(&node.case_instance_id)
            .bind(&commit.case_definition_id)
            .bind(&commit.case_definition_key)
            .bind(&node.plan_item_id)
            .bind(&node.parent_id)
            .bind(node.state.as_str())
            .bind(node.previous_state.map(|s| s.as_str()))
            .bind(&node.business_key)
            .bind(node.created_at)
            .execute(&mut *tx)
            .await?;
        }

        // Conditional updates: any version mismatch aborts the transaction.
        for node in &commit.tree.updates {
            let result = sqlx::query(
                "UPDATE case_executions \
                 SET state = $1, previous_state = $2, version = version + 1 \
                 WHERE id = $3 AND version = $4",
            )
            .bind(node.state.as_str())
            .bind(node.previous_state.map(|s| s.as_str()))
            .bind(&node.id)
            .bind(node.version)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(EngineError::Concurrency {
                    entity_id: node.id.clone(),
                });
            }
        }

        for node in &commit.tree.removes {
            let result =
                sqlx::query("DELETE FROM case_executions WHERE id = $1 AND version = $2")
                    .bind(&node.id)
                    .bind(node.version)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(EngineError::Concurrency {
                    entity_id: node.id.clone(),
                });
            }
            sqlx::query("DELETE FROM case_variables WHERE execution_id = $1")
                .bind(&node.id)
                .execute(&mut *tx)
                .await?;
        }

        for (execution_id, scope) in &commit.tree.variable_scopes {
            sqlx::query("DELETE FROM case_variables WHERE execution_id = $1")
                .bind(execution_id)
                .execute(&mut *tx)
                .await?;
            for (name, value) in scope {
                let cols = VariableColumns::encode(value)?;
                sqlx::query(
                    "INSERT INTO case_variables \
                     (case_instance_id, execution_id, name, var_type, text_value, long_value, \
                      double_value, timestamp_value, bytes_value) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                )
                .bind(&commit.case_instance_id)
                .bind(execution_id)
                .bind(name)
                .bind(cols.var_type)
                .bind(&cols.text_value)
                .bind(cols.long_value)
                .bind(cols.double_value)
                .bind(cols.timestamp_value)
                .bind(&cols.bytes_value)
                .execute(&mut *tx)
                .await?;
            }
        }

        for event in &commit.history {
            match event {
                HistoryEvent::CaseStarted(record) => {
                    sqlx::query(
                        "INSERT INTO historic_case_instances \
                         (id, case_definition_id, case_definition_key, case_definition_name, \
                          business_key, create_time, close_time, state) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                    )
                    .bind(&record.id)
                    .bind(&record.case_definition_id)
                    .bind(&record.case_definition_key)
                    .bind(&record.case_definition_name)
                    .bind(&record.business_key)
                    .bind(record.create_time)
                    .bind(record.close_time)
                    .bind(record.state.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
                HistoryEvent::CaseEnded {
                    case_instance_id,
                    state,
                    close_time,
                } => {
                    sqlx::query(
                        "UPDATE historic_case_instances SET close_time = $1, state = $2 \
                         WHERE id = $3",
                    )
                    .bind(close_time)
                    .bind(state.as_str())
                    .bind(case_instance_id)
                    .execute(&mut *tx)
                    .await?;
                }
                HistoryEvent::ActivityEnded(record) => {
                    sqlx::query(
                        "INSERT INTO historic_case_activity_instances \
                         (id, case_instance_id, case_definition_id, case_definition_key, \
                          plan_item_id, name, create_time, end_time, state) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                    )
                    .bind(&record.id)
                    .bind(&record.case_instance_id)
                    .bind(&record.case_definition_id)
                    .bind(&record.case_definition_key)
                    .bind(&record.plan_item_id)
                    .bind(&record.name)
                    .bind(record.create_time)
                    .bind(record.end_time)
                    .bind(record.state.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_case(&self, case_instance_id: &str, expected_root_version: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM case_executions WHERE id = $1 AND version = $2")
            .bind(case_instance_id)
            .bind(expected_root_version)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::Concurrency {
                entity_id: case_instance_id.to_string(),
            });
        }
        sqlx::query("DELETE FROM case_executions WHERE case_instance_id = $1")
            .bind(case_instance_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM case_variables WHERE case_instance_id = $1")
            .bind(case_instance_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn query_case_instances(
        &self,
        params: &CaseInstanceQueryParams,
    ) -> Result<Vec<CaseInstanceSummary>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM case_executions e WHERE e.parent_id IS NULL",
            EXECUTION_COLUMNS
        ));
        push_case_instance_filters(&mut qb, params)?;
        if !params.order.is_empty() {
            qb.push(" ORDER BY ");
            for (i, (field, direction)) in params.order.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(format!("e.{} {}", field.column(), direction.as_sql()));
            }
        }
        push_pagination(&mut qb, params.max_results, params.first_result);

        let rows: Vec<ExecutionRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(ExecutionRow::into_summary).collect()
    }

    async fn count_case_instances(&self, params: &CaseInstanceQueryParams) -> Result<i64> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM case_executions e WHERE e.parent_id IS NULL",
        );
        push_case_instance_filters(&mut qb, params)?;
        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    async fn get_historic_case_instance(
        &self,
        id: &str,
    ) -> Result<Option<HistoricCaseInstance>> {
        let row = sqlx::query_as::<_, HistoricCaseInstanceRow>(
            "SELECT id, case_definition_id, case_definition_key, case_definition_name, \
             business_key, create_time, close_time, state \
             FROM historic_case_instances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(HistoricCaseInstanceRow::into_record).transpose()
    }

    async fn query_historic_activities(
        &self,
        params: &HistoricActivityQueryParams,
    ) -> Result<Vec<HistoricCaseActivityInstance>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, case_instance_id, case_definition_id, case_definition_key, \
             plan_item_id, name, create_time, end_time, state \
             FROM historic_case_activity_instances WHERE 1 = 1",
        );
        if let Some(case_instance_id) = &params.case_instance_id {
            qb.push(" AND case_instance_id = ");
            qb.push_bind(case_instance_id.clone());
        }
        if let Some(plan_item_id) = &params.plan_item_id {
            qb.push(" AND plan_item_id = ");
            qb.push_bind(plan_item_id.clone());
        }
        if !params.states.is_empty() {
            qb.push(" AND state IN (");
            {
                let mut sep = qb.separated(", ");
                for state in &params.states {
                    sep.push_bind(state.as_str());
                }
            }
            qb.push(")");
        }
        qb.push(" ORDER BY end_time, id");

        let rows: Vec<HistoricActivityRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(HistoricActivityRow::into_record).collect()
    }

    async fn insert_decision_instance(&self, record: &HistoricDecisionInstance) -> Result<()> {
        sqlx::query(
            "INSERT INTO historic_decision_instances \
             (id, decision_definition_id, decision_definition_key, decision_definition_name, \
              evaluation_time, process_definition_id, process_definition_key, \
              process_instance_id, activity_id, activity_instance_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&record.id)
        .bind(&record.decision_definition_id)
        .bind(&record.decision_definition_key)
        .bind(&record.decision_definition_name)
        .bind(record.evaluation_time)
        .bind(&record.process_definition_id)
        .bind(&record.process_definition_key)
        .bind(&record.process_instance_id)
        .bind(&record.activity_id)
        .bind(&record.activity_instance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_decision_instance(&self, id: &str) -> Result<Option<HistoricDecisionInstance>> {
        let record = sqlx::query_as::<_, HistoricDecisionInstance>(
            "SELECT id, decision_definition_id, decision_definition_key, \
             decision_definition_name, evaluation_time, process_definition_id, \
             process_definition_key, process_instance_id, activity_id, activity_instance_id \
             FROM historic_decision_instances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_decision_instance(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM historic_decision_instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_decision_instances(
        &self,
        params: &DecisionInstanceQueryParams,
    ) -> Result<Vec<HistoricDecisionInstance>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, decision_definition_id, decision_definition_key, \
             decision_definition_name, evaluation_time, process_definition_id, \
             process_definition_key, process_instance_id, activity_id, activity_instance_id \
             FROM historic_decision_instances WHERE 1 = 1",
        );
        if let Some(key) = &params.decision_definition_key {
            qb.push(" AND decision_definition_key = ");
            qb.push_bind(key.clone());
        }
        if let Some(process_instance_id) = &params.process_instance_id {
            qb.push(" AND process_instance_id = ");
            qb.push_bind(process_instance_id.clone());
        }
        qb.push(" ORDER BY evaluation_time, id");

        let records = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(records)
    }

    // ------------------------------------------------------------------
    // Saved filters
    // ------------------------------------------------------------------

    async fn insert_filter(&self, filter: &Filter) -> Result<()> {
        sqlx::query(
            "INSERT INTO filters (id, resource_type, name, owner, query, properties) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&filter.id)
        .bind(&filter.resource_type)
        .bind(&filter.name)
        .bind(&filter.owner)
        .bind(serde_json::to_string(&filter.query)?)
        .bind(serde_json::to_string(&filter.properties)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_filter(&self, filter: &Filter) -> Result<()> {
        // The resource type is immutable; it is deliberately absent here.
        sqlx::query(
            "UPDATE filters SET name = $1, owner = $2, query = $3, properties = $4 WHERE id = $5",
        )
        .bind(&filter.name)
        .bind(&filter.owner)
        .bind(serde_json::to_string(&filter.query)?)
        .bind(serde_json::to_string(&filter.properties)?)
        .bind(&filter.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_filter(&self, id: &str) -> Result<Option<Filter>> {
        let row = sqlx::query_as::<_, FilterRow>(
            "SELECT id, resource_type, name, owner, query, properties FROM filters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(FilterRow::into_record).transpose()
    }

    async fn delete_filter(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM filters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_filters(&self, params: &FilterQueryParams) -> Result<Vec<Filter>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, resource_type, name, owner, query, properties FROM filters WHERE 1 = 1",
        );
        if let Some(id) = &params.filter_id {
            qb.push(" AND id = ");
            qb.push_bind(id.clone());
        }
        if let Some(name) = &params.name {
            qb.push(" AND name = ");
            qb.push_bind(name.clone());
        }
        if let Some(pattern) = &params.name_like {
            qb.push(" AND name LIKE ");
            qb.push_bind(pattern.clone());
        }
        if let Some(owner) = &params.owner {
            qb.push(" AND owner = ");
            qb.push_bind(owner.clone());
        }
        if let Some(resource_type) = &params.resource_type {
            qb.push(" AND resource_type = ");
            qb.push_bind(resource_type.clone());
        }
        qb.push(" ORDER BY name, id");

        let rows: Vec<FilterRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(FilterRow::into_record).collect()
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO identity_users (id, name) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name",
        )
        .bind(&user.id)
        .bind(&user.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT id, name FROM identity_users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn delete_user(&self, id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM tenant_memberships WHERE user_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM identity_users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_group(&self, group: &Group) -> Result<()> {
        sqlx::query(
            "INSERT INTO identity_groups (id, name) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name",
        )
        .bind(&group.id)
        .bind(&group.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>> {
        let group =
            sqlx::query_as::<_, Group>("SELECT id, name FROM identity_groups WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(group)
    }

    async fn delete_group(&self, id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM tenant_memberships WHERE group_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM identity_groups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_tenant(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            "INSERT INTO identity_tenants (id, name) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        let tenant =
            sqlx::query_as::<_, Tenant>("SELECT id, name FROM identity_tenants WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(tenant)
    }

    async fn delete_tenant(&self, id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM tenant_memberships WHERE tenant_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM identity_tenants WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_tenant_membership(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        group_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenant_memberships (tenant_id, user_id, group_id) VALUES ($1, $2, $3)",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_tenant_membership(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        group_id: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM tenant_memberships \
             WHERE tenant_id = $1 AND user_id IS NOT DISTINCT FROM $2 \
             AND group_id IS NOT DISTINCT FROM $3",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_tenants(&self, params: &TenantQueryParams) -> Result<Vec<Tenant>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT t.id, t.name FROM identity_tenants t WHERE 1 = 1");
        push_tenant_filters(&mut qb, params);
        match params.order_by_id {
            Some(direction) => {
                qb.push(format!(" ORDER BY t.id {}", direction.as_sql()));
            }
            None => {
                qb.push(" ORDER BY t.id");
            }
        }

        let tenants: Vec<Tenant> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(tenants)
    }

    async fn count_tenants(&self, params: &TenantQueryParams) -> Result<i64> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM identity_tenants t WHERE 1 = 1");
        push_tenant_filters(&mut qb, params);
        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Authorizations
    // ------------------------------------------------------------------

    async fn insert_authorization(&self, authorization: &Authorization) -> Result<()> {
        sqlx::query(
            "INSERT INTO authorizations \
             (id, user_id, group_id, resource_type, resource_id, permissions) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&authorization.id)
        .bind(&authorization.user_id)
        .bind(&authorization.group_id)
        .bind(authorization.resource_type.as_str())
        .bind(&authorization.resource_id)
        .bind(authorization.permissions.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_authorization(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM authorizations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_authorizations_for_subject(
        &self,
        user_id: Option<&str>,
        group_id: Option<&str>,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM authorizations \
             WHERE user_id IS NOT DISTINCT FROM $1 AND group_id IS NOT DISTINCT FROM $2 \
             AND resource_type = $3 AND resource_id = $4",
        )
        .bind(user_id)
        .bind(group_id)
        .bind(resource_type.as_str())
        .bind(resource_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn query_authorizations(
        &self,
        params: &AuthorizationQueryParams,
    ) -> Result<Vec<Authorization>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT a.id, a.user_id, a.group_id, a.resource_type, a.resource_id, a.permissions \
             FROM authorizations a WHERE 1 = 1",
        );
        push_authorization_filters(&mut qb, params);
        qb.push(" ORDER BY a.id");

        let rows: Vec<AuthorizationRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(AuthorizationRow::into_record).collect()
    }

    async fn count_authorizations(&self, params: &AuthorizationQueryParams) -> Result<i64> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM authorizations a WHERE 1 = 1");
        push_authorization_filters(&mut qb, params);
        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn has_permission(
        &self,
        ctx: &AuthorizationContext,
        permission: Permission,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool> {
        if ctx.user_id.is_none() && ctx.group_ids.is_empty() {
            return Ok(false);
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM authorizations a WHERE a.resource_type = ",
        );
        qb.push_bind(resource_type.as_str());
        qb.push(" AND (a.resource_id = ");
        qb.push_bind(resource_id.to_string());
        qb.push(format!(
            " OR a.resource_id = '{}') AND (a.permissions & {}) != 0 AND (",
            ANY_RESOURCE,
            permission.bit()
        ));
        let mut first = true;
        if let Some(user_id) = &ctx.user_id {
            qb.push("a.user_id = ");
            qb.push_bind(user_id.clone());
            first = false;
        }
        if !ctx.group_ids.is_empty() {
            if !first {
                qb.push(" OR ");
            }
            qb.push("a.group_id IN (");
            {
                let mut sep = qb.separated(", ");
                for group_id in &ctx.group_ids {
                    sep.push_bind(group_id.clone());
                }
            }
            qb.push(")");
        }
        qb.push(")");

        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    async fn health_check_db(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
