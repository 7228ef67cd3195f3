// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Optimistic locking tests: racing commands against one stale snapshot.

mod common;

use casura_core::authorization::AuthorizationContext;
use casura_core::commands::CaseCommand;
use casura_core::execution::CaseTree;
use casura_core::lifecycle::LifecycleState;
use casura_core::persistence::CaseCommit;
use casura_core::variables::Variables;
use common::*;

/// Build a commit that moves the task to `state`, based on one snapshot.
async fn stale_commit(
    engine: &casura_core::engine::CaseEngine,
    case_instance_id: &str,
    state: LifecycleState,
) -> CaseCommit {
    let loaded = engine
        .persistence()
        .load_case_tree(case_instance_id)
        .await
        .unwrap()
        .unwrap();
    let case_definition_id = loaded.case_definition_id.clone();
    let case_definition_key = loaded.case_definition_key.clone();
    let mut tree = CaseTree::from_parts(case_instance_id, loaded.nodes, loaded.variables);
    let task_id = tree.node_for_plan_item("task1").unwrap().id.clone();
    tree.set_state(&task_id, state).unwrap();
    CaseCommit {
        case_instance_id: case_instance_id.to_string(),
        case_definition_id,
        case_definition_key,
        tree: tree.take_commit(),
        history: Vec::new(),
    }
}

#[tokio::test]
async fn test_exactly_one_of_two_stale_commits_wins() {
    let engine = test_engine().await;
    engine.deploy_plan(review_plan());
    let ctx = AuthorizationContext::anonymous();
    let instance = engine
        .create_case_instance("review", None, Variables::new(), &ctx)
        .await
        .unwrap();

    // Two commits computed from the same snapshot version.
    let first = stale_commit(&engine, &instance.id, LifecycleState::Suspended).await;
    let second = stale_commit(&engine, &instance.id, LifecycleState::Completed).await;

    engine.persistence().commit_case(&first).await.unwrap();

    // The second carries the stale version; exactly one command wins.
    let err = engine.persistence().commit_case(&second).await.unwrap_err();
    assert_eq!(err.error_code(), "CONCURRENT_MODIFICATION");
    assert!(err.is_concurrency());

    // The loser left no partial mutation: the task is suspended, not
    // completed, and no history snuck in.
    let task = execution_for(&engine, &instance.id, "task1").await;
    assert_eq!(task.state, LifecycleState::Suspended);
    let records = engine
        .create_historic_activity_query()
        .case_instance_id(&instance.id)
        .unwrap()
        .list()
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_command_reads_fresh_snapshot_after_external_commit() {
    let engine = test_engine().await;
    engine.deploy_plan(review_plan());
    let ctx = AuthorizationContext::anonymous();
    let instance = engine
        .create_case_instance("review", None, Variables::new(), &ctx)
        .await
        .unwrap();
    let task = execution_for(&engine, &instance.id, "task1").await;

    // Bump the task's version behind the engine's back; the submitted
    // command re-reads a fresh snapshot on retry and still succeeds.
    let bump = stale_commit(&engine, &instance.id, LifecycleState::Suspended).await;
    engine.persistence().commit_case(&bump).await.unwrap();
    engine
        .submit(
            CaseCommand::Resume {
                execution_id: task.id.clone(),
            },
            &ctx,
        )
        .await
        .unwrap();
    let task = execution_for(&engine, &instance.id, "task1").await;
    assert_eq!(task.state, LifecycleState::Active);
}

#[tokio::test]
async fn test_version_counter_increments_per_commit() {
    let engine = test_engine().await;
    engine.deploy_plan(review_plan());
    let ctx = AuthorizationContext::anonymous();
    let instance = engine
        .create_case_instance("review", None, Variables::new(), &ctx)
        .await
        .unwrap();

    let before = execution_for(&engine, &instance.id, "task1").await;
    assert_eq!(before.version, 0);

    engine
        .submit(
            CaseCommand::Suspend {
                execution_id: before.id.clone(),
            },
            &ctx,
        )
        .await
        .unwrap();
    let after = execution_for(&engine, &instance.id, "task1").await;
    assert_eq!(after.version, 1);
}
