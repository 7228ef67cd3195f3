// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity management: users, groups, tenants and tenant memberships.
//!
//! Creating a tenant membership grants the member READ on the tenant
//! (directly for a user, via the group for a group membership) so the tenant
//! becomes visible in authorization-scoped tenant queries; deleting the
//! membership removes the grant again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::authorization::{
    Authorization, AuthorizationContext, Permission, Permissions, ResourceType,
};
use crate::error::{EngineError, Result};
use crate::persistence::Persistence;
use crate::query::TenantQuery;

/// A user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// A group of users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    /// Group id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// A tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    /// Tenant id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// CRUD over identities plus membership management.
#[derive(Clone)]
pub struct IdentityService {
    persistence: Arc<dyn Persistence>,
    authorization_enabled: bool,
}

impl IdentityService {
    /// Create an identity service over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>, authorization_enabled: bool) -> Self {
        Self {
            persistence,
            authorization_enabled,
        }
    }

    /// Insert or update a user.
    pub async fn save_user(&self, user: &User) -> Result<()> {
        require_id("user id", &user.id)?;
        self.persistence.save_user(user).await
    }

    /// Delete a user.
    pub async fn delete_user(&self, id: &str) -> Result<()> {
        if !self.persistence.delete_user(id).await? {
            return Err(EngineError::not_found("user", id));
        }
        Ok(())
    }

    /// Insert or update a group.
    pub async fn save_group(&self, group: &Group) -> Result<()> {
        require_id("group id", &group.id)?;
        self.persistence.save_group(group).await
    }

    /// Delete a group.
    pub async fn delete_group(&self, id: &str) -> Result<()> {
        if !self.persistence.delete_group(id).await? {
            return Err(EngineError::not_found("group", id));
        }
        Ok(())
    }

    /// Insert or update a tenant.
    pub async fn save_tenant(&self, tenant: &Tenant) -> Result<()> {
        require_id("tenant id", &tenant.id)?;
        self.persistence.save_tenant(tenant).await
    }

    /// Delete a tenant.
    pub async fn delete_tenant(&self, id: &str) -> Result<()> {
        if !self.persistence.delete_tenant(id).await? {
            return Err(EngineError::not_found("tenant", id));
        }
        Ok(())
    }

    /// Fetch a tenant without authorization scoping (administrative read).
    pub async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        self.persistence.get_tenant(id).await
    }

    /// Make a user member of a tenant and grant READ on the tenant.
    pub async fn create_tenant_user_membership(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<()> {
        self.require_tenant(tenant_id).await?;
        if self.persistence.get_user(user_id).await?.is_none() {
            return Err(EngineError::not_found("user", user_id));
        }
        self.persistence
            .insert_tenant_membership(tenant_id, Some(user_id), None)
            .await?;
        self.persistence
            .insert_authorization(&Authorization::for_user(
                user_id,
                ResourceType::Tenant,
                tenant_id,
                Permissions::of(Permission::Read),
            ))
            .await
    }

    /// Remove a user's tenant membership and its auto-created grant.
    pub async fn delete_tenant_user_membership(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<()> {
        if !self
            .persistence
            .delete_tenant_membership(tenant_id, Some(user_id), None)
            .await?
        {
            return Err(EngineError::not_found("tenant membership", tenant_id));
        }
        self.persistence
            .delete_authorizations_for_subject(
                Some(user_id),
                None,
                ResourceType::Tenant,
                tenant_id,
            )
            .await?;
        Ok(())
    }

    /// Make a group member of a tenant and grant READ on the tenant.
    pub async fn create_tenant_group_membership(
        &self,
        tenant_id: &str,
        group_id: &str,
    ) -> Result<()> {
        self.require_tenant(tenant_id).await?;
        if self.persistence.get_group(group_id).await?.is_none() {
            return Err(EngineError::not_found("group", group_id));
        }
        self.persistence
            .insert_tenant_membership(tenant_id, None, Some(group_id))
            .await?;
        self.persistence
            .insert_authorization(&Authorization::for_group(
                group_id,
                ResourceType::Tenant,
                tenant_id,
                Permissions::of(Permission::Read),
            ))
            .await
    }

    /// Remove a group's tenant membership and its auto-created grant.
    pub async fn delete_tenant_group_membership(
        &self,
        tenant_id: &str,
        group_id: &str,
    ) -> Result<()> {
        if !self
            .persistence
            .delete_tenant_membership(tenant_id, None, Some(group_id))
            .await?
        {
            return Err(EngineError::not_found("tenant membership", tenant_id));
        }
        self.persistence
            .delete_authorizations_for_subject(
                None,
                Some(group_id),
                ResourceType::Tenant,
                tenant_id,
            )
            .await?;
        Ok(())
    }

    /// Start an authorization-scoped tenant query.
    pub fn create_tenant_query(&self, ctx: &AuthorizationContext) -> TenantQuery {
        TenantQuery::new(
            self.persistence.clone(),
            ctx.clone(),
            self.authorization_enabled,
        )
    }

    async fn require_tenant(&self, tenant_id: &str) -> Result<()> {
        if self.persistence.get_tenant(tenant_id).await?.is_none() {
            return Err(EngineError::not_found("tenant", tenant_id));
        }
        Ok(())
    }
}

fn require_id(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(EngineError::validation(field, "must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entities_serialize_plainly() {
        let tenant = Tenant {
            id: "tenant1".to_string(),
            name: "Tenant One".to_string(),
        };
        let encoded = serde_json::to_value(&tenant).unwrap();
        assert_eq!(encoded["id"], "tenant1");
        assert_eq!(encoded["name"], "Tenant One");
    }
}
