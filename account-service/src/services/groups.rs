//! Group and permission administration. Every operation here requires
//! staff capability.

use std::sync::Arc;
use uuid::Uuid;

use crate::dtos::group::{
    GroupIdRequest, GroupRequest, GroupResponse, PermissionIdsRequest, PermissionResponse,
};
use crate::models::{Group, Permission};
use crate::services::authz::{Action, Actor, AuthorizationPolicy, Target};
use crate::services::error::{not_found_message, ServiceError};
use crate::services::metrics::record_event;
use crate::services::store::{distinct_ids, AccountStore};

#[derive(Clone)]
pub struct GroupService {
    store: Arc<dyn AccountStore>,
    authz: AuthorizationPolicy,
}

impl GroupService {
    pub fn new(store: Arc<dyn AccountStore>, authz: AuthorizationPolicy) -> Self {
        Self { store, authz }
    }

    pub async fn list_groups(&self, actor: &Actor) -> Result<Vec<GroupResponse>, ServiceError> {
        self.authz.authorize(actor, Action::ListGroups, &Target::None)?;

        let groups = self.store.list_groups().await?;
        let mut out = Vec::with_capacity(groups.len());
        for group in &groups {
            out.push(self.group_response(group).await?);
        }
        Ok(out)
    }

    pub async fn get_group(&self, actor: &Actor, group_id: Uuid) -> Result<GroupResponse, ServiceError> {
        self.authz
            .authorize(actor, Action::ViewGroup, &Target::Group(group_id))?;
        let group = self.require_group(group_id).await?;
        self.group_response(&group).await
    }

    pub async fn create_group(
        &self,
        actor: &Actor,
        req: GroupRequest,
    ) -> Result<GroupResponse, ServiceError> {
        self.authz.authorize(actor, Action::CreateGroup, &Target::None)?;

        let group = Group::new(group_name(&req)?);
        self.store.insert_group(&group).await?;

        record_event("group_created", "success");
        tracing::info!(group_id = %group.group_id, name = %group.group_name, "Group created");
        Ok(GroupResponse::new(&group, &[]))
    }

    pub async fn update_group(
        &self,
        actor: &Actor,
        group_id: Uuid,
        req: GroupRequest,
    ) -> Result<GroupResponse, ServiceError> {
        self.authz
            .authorize(actor, Action::UpdateGroup, &Target::Group(group_id))?;

        let mut group = self.require_group(group_id).await?;
        group.group_name = group_name(&req)?;
        self.store.rename_group(group_id, &group.group_name).await?;

        tracing::info!(group_id = %group_id, name = %group.group_name, "Group renamed");
        self.group_response(&group).await
    }

    pub async fn delete_group(&self, actor: &Actor, group_id: Uuid) -> Result<(), ServiceError> {
        self.authz
            .authorize(actor, Action::DeleteGroup, &Target::Group(group_id))?;

        if !self.store.delete_group(group_id).await? {
            return Err(ServiceError::NotFound(not_found_message("group")));
        }

        record_event("group_deleted", "success");
        tracing::info!(group_id = %group_id, "Group deleted");
        Ok(())
    }

    /// Replaces the group's permission set with exactly `permission_ids`.
    pub async fn assign_permissions(
        &self,
        actor: &Actor,
        group_id: Uuid,
        req: PermissionIdsRequest,
    ) -> Result<GroupResponse, ServiceError> {
        self.authz.authorize(
            actor,
            Action::AssignGroupPermissions,
            &Target::Group(group_id),
        )?;

        let ids = permission_ids(req)?;
        let group = self.require_group(group_id).await?;
        self.store.replace_group_permissions(group_id, &ids).await?;

        record_event("permissions_assigned", "success");
        tracing::info!(group_id = %group_id, permissions = ids.len(), "Group permissions replaced");
        self.group_response(&group).await
    }

    /// Subtracts `permission_ids` from the group's set. Ids that exist but
    /// are not granted are ignored.
    pub async fn remove_permissions(
        &self,
        actor: &Actor,
        group_id: Uuid,
        req: PermissionIdsRequest,
    ) -> Result<GroupResponse, ServiceError> {
        self.authz.authorize(
            actor,
            Action::RemoveGroupPermissions,
            &Target::Group(group_id),
        )?;

        let ids = permission_ids(req)?;
        let group = self.require_group(group_id).await?;
        for id in &ids {
            self.require_permission(*id).await?;
        }
        self.store.remove_group_permissions(group_id, &ids).await?;

        record_event("permissions_removed", "success");
        tracing::info!(group_id = %group_id, permissions = ids.len(), "Group permissions removed");
        self.group_response(&group).await
    }

    pub async fn list_permissions(
        &self,
        actor: &Actor,
    ) -> Result<Vec<PermissionResponse>, ServiceError> {
        self.authz
            .authorize(actor, Action::ListPermissions, &Target::None)?;
        Ok(self
            .store
            .list_permissions()
            .await?
            .iter()
            .map(PermissionResponse::from)
            .collect())
    }

    pub async fn get_permission(
        &self,
        actor: &Actor,
        permission_id: Uuid,
    ) -> Result<PermissionResponse, ServiceError> {
        self.authz.authorize(
            actor,
            Action::ViewPermission,
            &Target::Permission(permission_id),
        )?;
        let permission = self.require_permission(permission_id).await?;
        Ok(PermissionResponse::from(&permission))
    }

    /// Grants one permission to one group; an existing grant is kept.
    pub async fn assign_permission_to_group(
        &self,
        actor: &Actor,
        permission_id: Uuid,
        req: GroupIdRequest,
    ) -> Result<GroupResponse, ServiceError> {
        self.authz.authorize(
            actor,
            Action::AssignPermissionToGroup,
            &Target::Permission(permission_id),
        )?;

        let group_id = required_group_id(req)?;
        self.require_permission(permission_id).await?;
        let group = self.require_group(group_id).await?;
        self.store
            .add_group_permission(group_id, permission_id)
            .await?;

        tracing::info!(group_id = %group_id, permission_id = %permission_id, "Permission granted");
        self.group_response(&group).await
    }

    /// Revokes one permission from one group; revoking a missing grant is a
    /// no-op.
    pub async fn remove_permission_from_group(
        &self,
        actor: &Actor,
        permission_id: Uuid,
        req: GroupIdRequest,
    ) -> Result<GroupResponse, ServiceError> {
        self.authz.authorize(
            actor,
            Action::RemovePermissionFromGroup,
            &Target::Permission(permission_id),
        )?;

        let group_id = required_group_id(req)?;
        self.require_permission(permission_id).await?;
        let group = self.require_group(group_id).await?;
        self.store
            .remove_group_permissions(group_id, &[permission_id])
            .await?;

        tracing::info!(group_id = %group_id, permission_id = %permission_id, "Permission revoked");
        self.group_response(&group).await
    }

    async fn require_group(&self, group_id: Uuid) -> Result<Group, ServiceError> {
        self.store
            .find_group(group_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(not_found_message("group")))
    }

    async fn require_permission(&self, permission_id: Uuid) -> Result<Permission, ServiceError> {
        self.store
            .find_permission(permission_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(not_found_message("permission")))
    }

    async fn group_response(&self, group: &Group) -> Result<GroupResponse, ServiceError> {
        let permissions = self.store.permissions_for_group(group.group_id).await?;
        Ok(GroupResponse::new(group, &permissions))
    }
}

fn group_name(req: &GroupRequest) -> Result<String, ServiceError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServiceError::field(
            "name",
            "blank",
            "This field may not be blank.",
        ));
    }
    Ok(name.to_string())
}

fn permission_ids(req: PermissionIdsRequest) -> Result<Vec<Uuid>, ServiceError> {
    let ids = distinct_ids(req.permission_ids.as_deref().unwrap_or_default());
    if ids.is_empty() {
        return Err(ServiceError::field(
            "permission_ids",
            "required",
            "permission_ids is required",
        ));
    }
    Ok(ids)
}

fn required_group_id(req: GroupIdRequest) -> Result<Uuid, ServiceError> {
    req.group_id
        .ok_or_else(|| ServiceError::field("group_id", "required", "group_id is required"))
}
