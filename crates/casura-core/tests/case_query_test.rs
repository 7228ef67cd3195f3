// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Case instance query tests: variable operators, ordering, pagination,
//! authorization-accurate counts.

mod common;

use casura_core::authorization::{
    Authorization, AuthorizationContext, Permission, Permissions, ResourceType,
};
use casura_core::variables::{VariableValue, Variables};
use common::*;

async fn create_instance(
    engine: &casura_core::engine::CaseEngine,
    business_key: &str,
    amount: i64,
) -> String {
    let ctx = AuthorizationContext::anonymous();
    let variables = Variables::from([
        ("amount".to_string(), VariableValue::Integer(amount)),
        (
            "channel".to_string(),
            VariableValue::String(format!("web-{}", business_key)),
        ),
    ]);
    engine
        .create_case_instance("review", Some(business_key.to_string()), variables, &ctx)
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_variable_comparison_operators() {
    let engine = test_engine().await;
    engine.deploy_plan(review_plan());
    let ctx = AuthorizationContext::anonymous();
    create_instance(&engine, "small", 100).await;
    create_instance(&engine, "large", 5000).await;

    let large = engine
        .create_case_instance_query(&ctx)
        .variable_value_greater_than("amount", VariableValue::Integer(1000))
        .unwrap()
        .list()
        .await
        .unwrap();
    assert_eq!(large.len(), 1);
    assert_eq!(large[0].business_key.as_deref(), Some("large"));

    let le = engine
        .create_case_instance_query(&ctx)
        .variable_value_less_than_or_equal("amount", VariableValue::Integer(100))
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(le, 1);

    let exact = engine
        .create_case_instance_query(&ctx)
        .variable_value_equals("amount", VariableValue::Integer(5000))
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(exact, 1);

    let neq = engine
        .create_case_instance_query(&ctx)
        .variable_value_not_equals("amount", VariableValue::Integer(5000))
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(neq, 1);

    // Integers compare against double constants numerically.
    let cross = engine
        .create_case_instance_query(&ctx)
        .variable_value_greater_than("amount", VariableValue::Double(99.5))
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(cross, 2);
}

#[tokio::test]
async fn test_variable_like_operator() {
    let engine = test_engine().await;
    engine.deploy_plan(review_plan());
    let ctx = AuthorizationContext::anonymous();
    create_instance(&engine, "alpha", 1).await;
    create_instance(&engine, "beta", 2).await;

    let starts_with = engine
        .create_case_instance_query(&ctx)
        .variable_value_like("channel", "web-%")
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(starts_with, 2);

    let contains = engine
        .create_case_instance_query(&ctx)
        .variable_value_like("channel", "%alph%")
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(contains, 1);
}

#[tokio::test]
async fn test_invalid_operator_combinations_rejected_at_build_time() {
    let engine = test_engine().await;
    let ctx = AuthorizationContext::anonymous();

    // Ordering comparison on a boolean.
    let err = engine
        .create_case_instance_query(&ctx)
        .variable_value_greater_than("approved", VariableValue::Boolean(true))
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    // Ordering comparison on bytes.
    let err = engine
        .create_case_instance_query(&ctx)
        .variable_value_less_than("payload", VariableValue::Bytes(vec![1]))
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    // Empty variable name.
    let err = engine
        .create_case_instance_query(&ctx)
        .variable_value_equals("", VariableValue::Integer(1))
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    // Equality on booleans stays legal.
    assert!(
        engine
            .create_case_instance_query(&ctx)
            .variable_value_equals("approved", VariableValue::Boolean(true))
            .is_ok()
    );
}

#[tokio::test]
async fn test_ordering_and_pagination() {
    let engine = test_engine().await;
    engine.deploy_plan(review_plan());
    let ctx = AuthorizationContext::anonymous();
    for key in ["c", "a", "b"] {
        create_instance(&engine, key, 1).await;
    }

    // Every order request carries an explicit direction (typestate).
    let ordered = engine
        .create_case_instance_query(&ctx)
        .order_by_case_instance_id()
        .asc()
        .list()
        .await
        .unwrap();
    let mut ids: Vec<String> = ordered.iter().map(|s| s.id.clone()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let descending = engine
        .create_case_instance_query(&ctx)
        .order_by_case_instance_id()
        .desc()
        .list()
        .await
        .unwrap();
    ids.reverse();
    let desc_ids: Vec<String> = descending.iter().map(|s| s.id.clone()).collect();
    assert_eq!(desc_ids, ids);

    let page = engine
        .create_case_instance_query(&ctx)
        .order_by_case_instance_id()
        .asc()
        .list_page(1, 1)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, sorted[1]);
}

#[tokio::test]
async fn test_query_by_identity_filters() {
    let engine = test_engine().await;
    let plan = engine.deploy_plan(review_plan());
    let ctx = AuthorizationContext::anonymous();
    let id = create_instance(&engine, "bk-1", 1).await;

    let by_key = engine
        .create_case_instance_query(&ctx)
        .business_key("bk-1")
        .unwrap()
        .single_result()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_key.id, id);

    let by_definition = engine
        .create_case_instance_query(&ctx)
        .case_definition_id(&plan.id)
        .unwrap()
        .case_definition_key("review")
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(by_definition, 1);

    let missing = engine
        .create_case_instance_query(&ctx)
        .business_key("ghost")
        .unwrap()
        .single_result()
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_authorization_scoped_counts_are_exclusion_accurate() {
    let engine = test_engine_with_authorization().await;
    engine.deploy_plan(review_plan());
    let admin = engine.authorizations();

    // Grant CREATE so instances can be started at all.
    admin
        .save(&Authorization::for_user(
            "starter",
            ResourceType::CaseInstance,
            casura_core::authorization::ANY_RESOURCE,
            Permissions::of(Permission::Create),
        ))
        .await
        .unwrap();
    let starter = AuthorizationContext::user("starter");
    let visible_id = engine
        .create_case_instance("review", Some("visible".to_string()), Variables::new(), &starter)
        .await
        .unwrap()
        .id;
    engine
        .create_case_instance("review", Some("hidden".to_string()), Variables::new(), &starter)
        .await
        .unwrap();

    // The reader holds READ on exactly one instance.
    admin
        .save(&Authorization::for_user(
            "reader",
            ResourceType::CaseInstance,
            &visible_id,
            Permissions::of(Permission::Read),
        ))
        .await
        .unwrap();

    let reader = AuthorizationContext::user("reader");
    let listed = engine
        .create_case_instance_query(&reader)
        .list()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].business_key.as_deref(), Some("visible"));

    // Counts are scoped before pagination, never post-filtered.
    assert_eq!(
        engine
            .create_case_instance_query(&reader)
            .count()
            .await
            .unwrap(),
        1
    );

    // A group-inherited grant widens visibility identically.
    admin
        .save(&Authorization::for_group(
            "auditors",
            ResourceType::CaseInstance,
            casura_core::authorization::ANY_RESOURCE,
            Permissions::of(Permission::Read),
        ))
        .await
        .unwrap();
    let auditor = AuthorizationContext::user_in_groups("reader", ["auditors"]);
    assert_eq!(
        engine
            .create_case_instance_query(&auditor)
            .count()
            .await
            .unwrap(),
        2
    );
}
