// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for casura-core integration tests.
//!
//! Provides engine construction over an in-memory SQLite database plus the
//! sample plan models the tests drive.

#![allow(dead_code)]

use std::sync::Arc;

use casura_core::engine::CaseEngine;
use casura_core::execution::ExecutionNode;
use casura_core::persistence::SqlitePersistence;
use casura_core::plan::{PlanItem, PlanItemEvent, PlanModel, Sentry};

/// Engine over a fresh in-memory database, authorization off.
pub async fn test_engine() -> CaseEngine {
    let persistence = Arc::new(
        SqlitePersistence::in_memory()
            .await
            .expect("failed to open in-memory database"),
    );
    CaseEngine::builder()
        .persistence(persistence)
        .build()
        .expect("failed to build engine")
}

/// Engine over a fresh in-memory database with authorization enforced.
pub async fn test_engine_with_authorization() -> CaseEngine {
    let persistence = Arc::new(
        SqlitePersistence::in_memory()
            .await
            .expect("failed to open in-memory database"),
    );
    CaseEngine::builder()
        .persistence(persistence)
        .authorization_enabled(true)
        .build()
        .expect("failed to build engine")
}

/// A stage with one required task under the case root.
pub fn review_plan() -> PlanModel {
    PlanModel::builder("review", "Document review")
        .root("case1", ["stage1"])
        .add(PlanItem::stage("stage1", "Review", ["task1"]).required())
        .add(PlanItem::task("task1", "Review document").required())
        .build()
        .expect("plan must be valid")
}

/// Two tasks and a milestone that occurs when the first task completes.
pub fn milestone_plan() -> PlanModel {
    PlanModel::builder("intake", "Claim intake")
        .root("case1", ["task1", "task2", "ms1"])
        .add(PlanItem::task("task1", "Register claim").required())
        .add(PlanItem::task("task2", "Assess claim").required().manual())
        .add(
            PlanItem::milestone("ms1", "Claim registered").with_entry_criterion(
                Sentry::on_event("task1", PlanItemEvent::Complete),
            ),
        )
        .build()
        .expect("plan must be valid")
}

/// The live execution instantiating `plan_item_id` within a case instance.
pub async fn execution_for(
    engine: &CaseEngine,
    case_instance_id: &str,
    plan_item_id: &str,
) -> ExecutionNode {
    let loaded = engine
        .persistence()
        .load_case_tree(case_instance_id)
        .await
        .expect("tree load failed")
        .expect("case instance should exist");
    loaded
        .nodes
        .into_iter()
        .find(|n| n.plan_item_id == plan_item_id)
        .unwrap_or_else(|| panic!("no live execution for plan item '{}'", plan_item_id))
}
