// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authorization: permissions, grants, and the per-call subject context.
//!
//! There is no ambient authenticated subject. Every command and query call
//! receives an explicit [`AuthorizationContext`]; commands that fail a
//! permission check error out, while queries fold the subject's grants into
//! their SQL so unauthorized rows are excluded before ordering and
//! pagination (counts stay authorization-accurate).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::persistence::{AuthorizationQueryParams, Persistence};

/// A single permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Read the resource (grants query visibility).
    Read,
    /// Mutate the resource.
    Update,
    /// Create resources of the type.
    Create,
    /// Delete the resource.
    Delete,
}

impl Permission {
    /// The bit this permission occupies in a [`Permissions`] set.
    pub fn bit(&self) -> i64 {
        match self {
            Self::Read => 1,
            Self::Update => 2,
            Self::Create => 4,
            Self::Delete => 8,
        }
    }

    /// Stable uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
        }
    }
}

/// A set of permissions, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(pub i64);

impl Permissions {
    /// The empty set.
    pub fn none() -> Self {
        Self(0)
    }

    /// A set with a single permission.
    pub fn of(permission: Permission) -> Self {
        Self(permission.bit())
    }

    /// Add a permission.
    pub fn with(mut self, permission: Permission) -> Self {
        self.0 |= permission.bit();
        self
    }

    /// Whether the set contains a permission.
    pub fn contains(&self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }
}

/// The resource types permissions attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    /// A running case instance.
    CaseInstance,
    /// A deployed case definition.
    CaseDefinition,
    /// A tenant.
    Tenant,
    /// A saved filter.
    Filter,
    /// Historic records.
    History,
}

impl ResourceType {
    /// Stable lowercase name used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaseInstance => "case_instance",
            Self::CaseDefinition => "case_definition",
            Self::Tenant => "tenant",
            Self::Filter => "filter",
            Self::History => "history",
        }
    }

    /// Parse a resource type from its persisted name.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "case_instance" => Self::CaseInstance,
            "case_definition" => Self::CaseDefinition,
            "tenant" => Self::Tenant,
            "filter" => Self::Filter,
            "history" => Self::History,
            _ => return None,
        })
    }
}

/// Resource id wildcard: the grant applies to every resource of the type.
pub const ANY_RESOURCE: &str = "*";

/// A stored grant: one subject (user or group), one resource, a permission
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// Grant id.
    pub id: String,
    /// Granted user; mutually exclusive with `group_id`.
    pub user_id: Option<String>,
    /// Granted group; mutually exclusive with `user_id`.
    pub group_id: Option<String>,
    /// The resource type.
    pub resource_type: ResourceType,
    /// The resource id, or [`ANY_RESOURCE`].
    pub resource_id: String,
    /// The granted permission set.
    pub permissions: Permissions,
}

impl Authorization {
    /// A grant for a user.
    pub fn for_user(
        user_id: impl Into<String>,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        permissions: Permissions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: Some(user_id.into()),
            group_id: None,
            resource_type,
            resource_id: resource_id.into(),
            permissions,
        }
    }

    /// A grant for a group.
    pub fn for_group(
        group_id: impl Into<String>,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        permissions: Permissions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: None,
            group_id: Some(group_id.into()),
            resource_type,
            resource_id: resource_id.into(),
            permissions,
        }
    }
}

/// The subject of one command or query call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizationContext {
    /// Authenticated user id, if any.
    pub user_id: Option<String>,
    /// Groups the user belongs to.
    pub group_ids: Vec<String>,
}

impl AuthorizationContext {
    /// An unauthenticated context.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A context for a user with no groups.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            group_ids: Vec::new(),
        }
    }

    /// A context for a user with group memberships.
    pub fn user_in_groups<I, G>(user_id: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<String>,
    {
        Self {
            user_id: Some(user_id.into()),
            group_ids: groups.into_iter().map(Into::into).collect(),
        }
    }
}

/// Grant CRUD plus the permission checks commands run before mutating.
#[derive(Clone)]
pub struct AuthorizationService {
    persistence: Arc<dyn Persistence>,
    enabled: bool,
}

impl AuthorizationService {
    /// Create a service; `enabled = false` turns every check into a pass,
    /// matching an engine without authorization configured.
    pub fn new(persistence: Arc<dyn Persistence>, enabled: bool) -> Self {
        Self {
            persistence,
            enabled,
        }
    }

    /// Whether permission checks are enforced.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Store a grant after validating its subject.
    pub async fn save(&self, authorization: &Authorization) -> Result<()> {
        match (&authorization.user_id, &authorization.group_id) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(EngineError::validation(
                    "authorization",
                    "exactly one of user id and group id is required",
                ));
            }
            _ => {}
        }
        if authorization.resource_id.is_empty() {
            return Err(EngineError::validation("resourceId", "must not be empty"));
        }
        self.persistence.insert_authorization(authorization).await
    }

    /// Delete a grant by id.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !self.persistence.delete_authorization(id).await? {
            return Err(EngineError::not_found("authorization", id));
        }
        Ok(())
    }

    /// List grants matching the given filter.
    pub async fn query(&self, params: &AuthorizationQueryParams) -> Result<Vec<Authorization>> {
        self.persistence.query_authorizations(params).await
    }

    /// Count grants matching the given filter.
    pub async fn count(&self, params: &AuthorizationQueryParams) -> Result<i64> {
        self.persistence.count_authorizations(params).await
    }

    /// Whether the subject holds `permission` on the resource, directly or
    /// through one of its groups, for the specific id or the ANY wildcard.
    pub async fn is_authorized(
        &self,
        ctx: &AuthorizationContext,
        permission: Permission,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool> {
        if !self.enabled {
            return Ok(true);
        }
        self.persistence
            .has_permission(ctx, permission, resource_type, resource_id)
            .await
    }

    /// Fail with `Authorization` unless the subject holds the permission.
    ///
    /// Commands call this before mutating; a denial performs no mutation and
    /// is never downgraded to an empty result.
    pub async fn require(
        &self,
        ctx: &AuthorizationContext,
        permission: Permission,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<()> {
        if self
            .is_authorized(ctx, permission, resource_type, resource_id)
            .await?
        {
            Ok(())
        } else {
            Err(EngineError::Authorization {
                user_id: ctx.user_id.clone(),
                permission: permission.as_str().to_string(),
                resource: format!("{} '{}'", resource_type.as_str(), resource_id),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_bits_are_distinct() {
        let all = [
            Permission::Read,
            Permission::Update,
            Permission::Create,
            Permission::Delete,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.bit(), b.bit());
                assert_eq!(a.bit() & b.bit(), 0);
            }
        }
    }

    #[test]
    fn test_permissions_set_operations() {
        let set = Permissions::of(Permission::Read).with(Permission::Update);
        assert!(set.contains(Permission::Read));
        assert!(set.contains(Permission::Update));
        assert!(!set.contains(Permission::Delete));
        assert!(!Permissions::none().contains(Permission::Read));
    }

    #[test]
    fn test_resource_type_round_trip() {
        for rt in [
            ResourceType::CaseInstance,
            ResourceType::CaseDefinition,
            ResourceType::Tenant,
            ResourceType::Filter,
            ResourceType::History,
        ] {
            assert_eq!(ResourceType::parse(rt.as_str()), Some(rt));
        }
        assert_eq!(ResourceType::parse("bogus"), None);
    }

    #[test]
    fn test_context_constructors() {
        assert_eq!(AuthorizationContext::anonymous().user_id, None);
        let ctx = AuthorizationContext::user_in_groups("kermit", ["accounting"]);
        assert_eq!(ctx.user_id.as_deref(), Some("kermit"));
        assert_eq!(ctx.group_ids, ["accounting"]);
    }
}
