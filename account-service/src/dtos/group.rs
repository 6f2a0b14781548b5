use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Group, Permission};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GroupRequest {
    #[serde(default)]
    #[validate(length(
        min = 1,
        max = 150,
        message = "Ensure this field has between 1 and 150 characters."
    ))]
    #[schema(example = "Manager")]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PermissionIdsRequest {
    pub permission_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GroupIdRequest {
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionResponse {
    pub id: Uuid,
    #[schema(example = "Can change account")]
    pub name: String,
    #[schema(example = "change_account")]
    pub codename: String,
    #[schema(example = "account")]
    pub resource_type: String,
}

impl From<&Permission> for PermissionResponse {
    fn from(p: &Permission) -> Self {
        Self {
            id: p.permission_id,
            name: p.permission_name.clone(),
            codename: p.codename.clone(),
            resource_type: p.resource_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupResponse {
    pub id: Uuid,
    #[schema(example = "Manager")]
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub permissions: Vec<PermissionResponse>,
}

impl GroupResponse {
    pub fn new(group: &Group, permissions: &[Permission]) -> Self {
        Self {
            id: group.group_id,
            name: group.group_name.clone(),
            created_at: group.created_utc,
            permissions: permissions.iter().map(PermissionResponse::from).collect(),
        }
    }
}
