// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durability tests: state survives reopening a file-backed database.

mod common;

use std::sync::Arc;

use casura_core::authorization::AuthorizationContext;
use casura_core::commands::CaseCommand;
use casura_core::engine::CaseEngine;
use casura_core::lifecycle::LifecycleState;
use casura_core::persistence::SqlitePersistence;
use casura_core::variables::{VariableValue, Variables};
use common::*;

async fn file_engine(path: &std::path::Path) -> CaseEngine {
    let persistence = Arc::new(
        SqlitePersistence::from_path(path)
            .await
            .expect("failed to open database file"),
    );
    CaseEngine::builder()
        .persistence(persistence)
        .build()
        .expect("failed to build engine")
}

#[tokio::test]
async fn test_tree_and_variables_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("casura.db");

    // 1. Create an instance and shut the engine down.
    let instance_id = {
        let engine = file_engine(&db_path).await;
        engine.deploy_plan(review_plan());
        let ctx = AuthorizationContext::anonymous();
        let variables = Variables::from([
            ("amount".to_string(), VariableValue::Integer(900)),
            (
                "channel".to_string(),
                VariableValue::String("branch".to_string()),
            ),
        ]);
        engine
            .create_case_instance("review", Some("bk-9".to_string()), variables, &ctx)
            .await
            .unwrap()
            .id
    };

    // 2. Reopen: the live tree, variables and versions are all there.
    let engine = file_engine(&db_path).await;
    engine.deploy_plan(review_plan());
    let ctx = AuthorizationContext::anonymous();

    let loaded = engine
        .persistence()
        .load_case_tree(&instance_id)
        .await
        .unwrap()
        .expect("tree should survive reopen");
    assert_eq!(loaded.nodes.len(), 3);
    assert_eq!(loaded.case_definition_key, "review");
    let root_scope = loaded
        .variables
        .get(&instance_id)
        .expect("root scope should survive");
    assert_eq!(
        root_scope.get("amount"),
        Some(&VariableValue::Integer(900))
    );

    // 3. The reopened engine drives the instance to completion.
    let task = execution_for(&engine, &instance_id, "task1").await;
    engine
        .submit(CaseCommand::Complete { execution_id: task.id }, &ctx)
        .await
        .unwrap();
    let root = engine.get_execution(&instance_id, &ctx).await.unwrap();
    assert_eq!(root.state, LifecycleState::Completed);

    // Note: the deployed plan is re-registered after restart by the
    // deployment layer; only execution state is durable here.
}
