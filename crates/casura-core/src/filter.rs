// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Saved filters: named, persisted query payloads.
//!
//! A filter stores a query as an opaque JSON object plus display properties.
//! The resource type is fixed at creation; attempts to change it fail
//! validation and leave the stored row untouched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::persistence::{FilterQueryParams, Persistence};

/// A saved filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Filter id; assigned on first save.
    pub id: String,
    /// The resource type the stored query targets. Immutable after create.
    pub resource_type: String,
    /// Display name; never empty.
    pub name: String,
    /// Owning user id.
    pub owner: Option<String>,
    /// The stored query, an opaque JSON object.
    pub query: serde_json::Value,
    /// Display properties, an opaque JSON object.
    pub properties: serde_json::Value,
}

impl Filter {
    /// Create an unsaved filter (empty id) for the given resource type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            resource_type: resource_type.into(),
            name: String::new(),
            owner: None,
            query: serde_json::json!({}),
            properties: serde_json::json!({}),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the stored query.
    pub fn with_query(mut self, query: serde_json::Value) -> Self {
        self.query = query;
        self
    }

    /// Set the display properties.
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Filter CRUD with validation.
#[derive(Clone)]
pub struct FilterService {
    persistence: Arc<dyn Persistence>,
}

impl FilterService {
    /// Create a filter service over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Save a filter: insert when the id is empty, update otherwise.
    ///
    /// # Errors
    ///
    /// `Validation` when the name is empty, the query or properties are not
    /// JSON objects, or an update attempts to change the resource type. A
    /// failed update leaves the stored filter untouched.
    pub async fn save(&self, filter: &Filter) -> Result<Filter> {
        validate_filter(filter)?;

        if filter.id.is_empty() {
            let mut stored = filter.clone();
            stored.id = Uuid::new_v4().to_string();
            self.persistence.insert_filter(&stored).await?;
            return Ok(stored);
        }

        let existing = self
            .persistence
            .get_filter(&filter.id)
            .await?
            .ok_or_else(|| EngineError::not_found("filter", &filter.id))?;
        if existing.resource_type != filter.resource_type {
            return Err(EngineError::validation(
                "resourceType",
                "cannot be changed after creation",
            ));
        }
        self.persistence.update_filter(filter).await?;
        Ok(filter.clone())
    }

    /// Fetch a filter by id.
    pub async fn get(&self, id: &str) -> Result<Option<Filter>> {
        self.persistence.get_filter(id).await
    }

    /// Delete a filter by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when no filter with the id exists.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !self.persistence.delete_filter(id).await? {
            return Err(EngineError::not_found("filter", id));
        }
        Ok(())
    }

    /// List filters matching the given filter parameters.
    pub async fn query(&self, params: &FilterQueryParams) -> Result<Vec<Filter>> {
        self.persistence.query_filters(params).await
    }
}

fn validate_filter(filter: &Filter) -> Result<()> {
    if filter.resource_type.is_empty() {
        return Err(EngineError::validation("resourceType", "must not be empty"));
    }
    if filter.name.is_empty() {
        return Err(EngineError::validation("name", "must not be empty"));
    }
    if !filter.query.is_object() {
        return Err(EngineError::validation("query", "must be a JSON object"));
    }
    if !filter.properties.is_object() {
        return Err(EngineError::validation(
            "properties",
            "must be a JSON object",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_name() {
        let filter = Filter::new("task");
        let err = validate_filter(&filter).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_validate_rejects_non_object_query() {
        let filter = Filter::new("task")
            .with_name("my filter")
            .with_query(serde_json::json!("not an object"));
        assert!(validate_filter(&filter).is_err());

        let filter = Filter::new("task")
            .with_name("my filter")
            .with_query(serde_json::json!({"name": "test"}));
        assert!(validate_filter(&filter).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_resource_type() {
        let filter = Filter::new("").with_name("my filter");
        let err = validate_filter(&filter).unwrap_err();
        assert!(err.to_string().contains("resourceType"));
    }
}
