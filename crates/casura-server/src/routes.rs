// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP routes over the case engine.
//!
//! The server is thin plumbing: handlers resolve the caller's
//! [`AuthorizationContext`] from headers, delegate to `casura-core`, and map
//! engine errors to structured responses. No business logic lives here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use casura_core::authorization::AuthorizationContext;
use casura_core::commands::{CaseCommand, CommitSummary};
use casura_core::engine::CaseEngine;
use casura_core::error::EngineError;
use casura_core::history::{HistoricCaseInstance, HistoricDecisionInstance, NewDecisionInstance};
use casura_core::persistence::CaseInstanceSummary;
use casura_core::plan::PlanModel;
use casura_core::variables::Variables;

use crate::error::ApiError;

/// Build the API router over an engine.
pub fn router(engine: Arc<CaseEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/case-definition", post(deploy_definition))
        .route("/case-instance", post(create_case_instance))
        .route("/case-instance/{id}", get(get_case_instance))
        .route("/case-instance/{id}/close", post(close_case_instance))
        .route("/case-execution/{id}/variables", post(set_variables))
        .route("/case-execution/{id}/{transition}", post(apply_transition))
        .route("/history/case-instance/{id}", get(get_historic_case_instance))
        .route("/history/decision-instance", post(record_decision_instance))
        .route(
            "/history/decision-instance/{id}",
            get(get_decision_instance).delete(delete_decision_instance),
        )
        .with_state(engine)
}

/// The caller's subject, resolved from headers.
///
/// Authentication itself happens upstream (gateway); the server only
/// carries the asserted identity into the engine as an explicit context.
fn context_from_headers(headers: &HeaderMap) -> AuthorizationContext {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let group_ids: Vec<String> = headers
        .get("x-group-ids")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    AuthorizationContext { user_id, group_ids }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    healthy: bool,
    version: &'static str,
}

async fn health(State(engine): State<Arc<CaseEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: engine.health_check().await,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployedDefinitionResponse {
    id: String,
    key: String,
    version: i32,
}

/// Register a resolved plan model with the engine.
///
/// The payload comes from the (trusted) deployment layer; structural
/// validation happened at build time there.
async fn deploy_definition(
    State(engine): State<Arc<CaseEngine>>,
    Json(plan): Json<PlanModel>,
) -> Json<DeployedDefinitionResponse> {
    let plan = engine.deploy_plan(plan);
    Json(DeployedDefinitionResponse {
        id: plan.id.clone(),
        key: plan.key.clone(),
        version: plan.version,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCaseInstanceRequest {
    case_definition_key: String,
    business_key: Option<String>,
    #[serde(default)]
    variables: Variables,
}

async fn create_case_instance(
    State(engine): State<Arc<CaseEngine>>,
    headers: HeaderMap,
    Json(request): Json<CreateCaseInstanceRequest>,
) -> Result<Json<CaseInstanceSummary>, ApiError> {
    let ctx = context_from_headers(&headers);
    let summary = engine
        .create_case_instance(
            &request.case_definition_key,
            request.business_key,
            request.variables,
            &ctx,
        )
        .await?;
    Ok(Json(summary))
}

async fn get_case_instance(
    State(engine): State<Arc<CaseEngine>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CaseInstanceSummary>, ApiError> {
    let ctx = context_from_headers(&headers);
    let summary = engine
        .create_case_instance_query(&ctx)
        .case_instance_id(&id)?
        .single_result()
        .await?
        .ok_or_else(|| EngineError::not_found("case instance", &id))?;
    Ok(Json(summary))
}

async fn close_case_instance(
    State(engine): State<Arc<CaseEngine>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CommitSummary>, ApiError> {
    let ctx = context_from_headers(&headers);
    let summary = engine
        .submit(CaseCommand::Close { case_instance_id: id }, &ctx)
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct SetVariablesRequest {
    variables: Variables,
}

async fn set_variables(
    State(engine): State<Arc<CaseEngine>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<SetVariablesRequest>,
) -> Result<Json<CommitSummary>, ApiError> {
    let ctx = context_from_headers(&headers);
    let summary = engine
        .submit(
            CaseCommand::SetVariables {
                execution_id: id,
                variables: request.variables,
            },
            &ctx,
        )
        .await?;
    Ok(Json(summary))
}

async fn apply_transition(
    State(engine): State<Arc<CaseEngine>>,
    headers: HeaderMap,
    Path((id, transition)): Path<(String, String)>,
) -> Result<Json<CommitSummary>, ApiError> {
    let ctx = context_from_headers(&headers);
    let command = CaseCommand::from_transition_name(&transition, id).ok_or_else(|| {
        EngineError::validation(
            "transition",
            format!("unknown transition '{}'", transition),
        )
    })?;
    let summary = engine.submit(command, &ctx).await?;
    Ok(Json(summary))
}

async fn get_historic_case_instance(
    State(engine): State<Arc<CaseEngine>>,
    Path(id): Path<String>,
) -> Result<Json<HistoricCaseInstance>, ApiError> {
    let record = engine.history().case_instance(&id).await?;
    Ok(Json(record))
}

async fn record_decision_instance(
    State(engine): State<Arc<CaseEngine>>,
    Json(request): Json<NewDecisionInstance>,
) -> Result<Json<HistoricDecisionInstance>, ApiError> {
    let record = engine.history().record_decision_instance(request).await?;
    Ok(Json(record))
}

async fn get_decision_instance(
    State(engine): State<Arc<CaseEngine>>,
    Path(id): Path<String>,
) -> Result<Json<HistoricDecisionInstance>, ApiError> {
    let record = engine.history().decision_instance(&id).await?;
    Ok(Json(record))
}

async fn delete_decision_instance(
    State(engine): State<Arc<CaseEngine>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    engine.history().delete_decision_instance(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use casura_core::persistence::SqlitePersistence;
    use casura_core::plan::PlanItem;
    use tower::ServiceExt;

    async fn test_app() -> (Arc<CaseEngine>, Router) {
        let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let engine = Arc::new(
            CaseEngine::builder()
                .persistence(persistence)
                .build()
                .unwrap(),
        );
        let app = router(engine.clone());
        (engine, app)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, payload: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(payload).unwrap()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_single_historic_decision_instance() {
        let (engine, app) = test_app().await;
        let recorded = engine
            .history()
            .record_decision_instance(NewDecisionInstance {
                decision_definition_id: "credit:1:abc".to_string(),
                decision_definition_key: "credit".to_string(),
                decision_definition_name: "Credit decision".to_string(),
                process_definition_id: Some("invoice:2:def".to_string()),
                process_definition_key: Some("invoice".to_string()),
                process_instance_id: Some("pi-1".to_string()),
                activity_id: Some("assessCredit".to_string()),
                activity_instance_id: Some("assessCredit:ai-1".to_string()),
            })
            .await
            .unwrap();

        let uri = format!("/history/decision-instance/{}", recorded.id);
        let response = app.oneshot(get_request(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["id"], recorded.id);
        assert_eq!(body["decisionDefinitionId"], "credit:1:abc");
        assert_eq!(body["decisionDefinitionKey"], "credit");
        assert_eq!(body["decisionDefinitionName"], "Credit decision");
        assert!(body["evaluationTime"].is_string());
        assert_eq!(body["processDefinitionId"], "invoice:2:def");
        assert_eq!(body["processDefinitionKey"], "invoice");
        assert_eq!(body["processInstanceId"], "pi-1");
        assert_eq!(body["activityId"], "assessCredit");
        assert_eq!(body["activityInstanceId"], "assessCredit:ai-1");
    }

    #[tokio::test]
    async fn test_get_non_existing_historic_decision_instance() {
        let (_engine, app) = test_app().await;
        let response = app
            .oneshot(get_request("/history/decision-instance/aNonExistingId"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["type"], "InvalidRequestException");
        assert_eq!(
            body["message"],
            "Historic decision instance with id 'aNonExistingId' does not exist"
        );
    }

    #[tokio::test]
    async fn test_case_lifecycle_over_http() {
        let (engine, app) = test_app().await;

        // 1. Deploy a definition.
        let plan = PlanModel::builder("review", "Document review")
            .root("case1", ["task1"])
            .add(PlanItem::task("task1", "Review document").required())
            .build()
            .unwrap();
        let response = app
            .clone()
            .oneshot(post_json(
                "/case-definition",
                &serde_json::to_value(&plan).unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // 2. Create an instance.
        let response = app
            .clone()
            .oneshot(post_json(
                "/case-instance",
                &serde_json::json!({
                    "caseDefinitionKey": "review",
                    "businessKey": "order-11",
                    "variables": {"amount": {"type": "integer", "value": 250}}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        let case_id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["businessKey"], "order-11");
        assert_eq!(created["state"], "active");

        // 3. Complete the task through the transition endpoint.
        let loaded = engine
            .persistence()
            .load_case_tree(&case_id)
            .await
            .unwrap()
            .unwrap();
        let task = loaded
            .nodes
            .iter()
            .find(|n| n.plan_item_id == "task1")
            .unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/case-execution/{}/complete", task.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // 4. The instance reports completed.
        let response = app
            .clone()
            .oneshot(get_request(&format!("/case-instance/{}", case_id)))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["state"], "completed");
    }

    #[tokio::test]
    async fn test_unknown_case_instance_is_404() {
        let (_engine, app) = test_app().await;
        let response = app
            .oneshot(get_request("/case-instance/ghost"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["type"], "InvalidRequestException");
    }

    #[tokio::test]
    async fn test_unknown_transition_is_400() {
        let (_engine, app) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/case-execution/some-id/frobnicate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["type"], "InvalidRequestException");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_engine, app) = test_app().await;
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["healthy"], true);
    }
}
