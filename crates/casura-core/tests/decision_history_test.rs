// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Historic decision instance recording and retrieval.

mod common;

use casura_core::history::NewDecisionInstance;
use common::*;

fn sample_decision() -> NewDecisionInstance {
    NewDecisionInstance {
        decision_definition_id: "credit-check:1:abc".to_string(),
        decision_definition_key: "credit-check".to_string(),
        decision_definition_name: "Credit check".to_string(),
        process_definition_id: Some("invoice:2:def".to_string()),
        process_definition_key: Some("invoice".to_string()),
        process_instance_id: Some("pi-1".to_string()),
        activity_id: Some("assessCreditWorthiness".to_string()),
        activity_instance_id: Some("assessCreditWorthiness:ai-1".to_string()),
    }
}

#[tokio::test]
async fn test_record_and_load_decision_instance() {
    let engine = test_engine().await;
    let history = engine.history();

    let recorded = history
        .record_decision_instance(sample_decision())
        .await
        .unwrap();
    assert!(!recorded.id.is_empty());

    let loaded = history.decision_instance(&recorded.id).await.unwrap();
    assert_eq!(loaded, recorded);
    assert_eq!(loaded.decision_definition_key, "credit-check");
    assert_eq!(loaded.activity_id.as_deref(), Some("assessCreditWorthiness"));
}

#[tokio::test]
async fn test_unknown_decision_instance_message() {
    let engine = test_engine().await;
    let err = engine
        .history()
        .decision_instance("aNonExistingId")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
    // The REST layer surfaces this message verbatim in its 404 body.
    assert_eq!(
        err.to_string(),
        "Historic decision instance with id 'aNonExistingId' does not exist"
    );
}

#[tokio::test]
async fn test_record_validates_required_fields() {
    let engine = test_engine().await;
    let history = engine.history();

    let mut missing_id = sample_decision();
    missing_id.decision_definition_id = String::new();
    let err = history.record_decision_instance(missing_id).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    let mut missing_key = sample_decision();
    missing_key.decision_definition_key = String::new();
    let err = history.record_decision_instance(missing_key).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_query_and_delete_decision_instances() {
    let engine = test_engine().await;
    let history = engine.history();
    let first = history
        .record_decision_instance(sample_decision())
        .await
        .unwrap();
    let mut other = sample_decision();
    other.decision_definition_key = "discount".to_string();
    history.record_decision_instance(other).await.unwrap();

    let by_key = engine
        .create_decision_instance_query()
        .decision_definition_key("credit-check")
        .unwrap()
        .list()
        .await
        .unwrap();
    assert_eq!(by_key.len(), 1);
    assert_eq!(by_key[0].id, first.id);

    let by_process = engine
        .create_decision_instance_query()
        .process_instance_id("pi-1")
        .unwrap()
        .list()
        .await
        .unwrap();
    assert_eq!(by_process.len(), 2);

    // Explicit removal is the only way a record ever disappears.
    history.delete_decision_instance(&first.id).await.unwrap();
    let err = history.decision_instance(&first.id).await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
    let err = history.delete_decision_instance(&first.id).await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}
