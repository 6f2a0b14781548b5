use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        group::{GroupIdRequest, GroupResponse, PermissionResponse},
        ErrorResponse,
    },
    services::Actor,
    utils::ValidatedJson,
    AppState,
};

/// List the permission catalogue
#[utoipa::path(
    get,
    path = "/permissions",
    responses(
        (status = 200, description = "Permissions", body = [PermissionResponse]),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Staff only", body = ErrorResponse)
    ),
    tag = "Permissions",
    security(("bearer_auth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.groups.list_permissions(&actor).await?))
}

#[utoipa::path(
    get,
    path = "/permissions/{id}",
    params(("id" = Uuid, Path, description = "Permission id")),
    responses(
        (status = 200, description = "Permission", body = PermissionResponse),
        (status = 403, description = "Staff only", body = ErrorResponse),
        (status = 404, description = "No such permission", body = ErrorResponse)
    ),
    tag = "Permissions",
    security(("bearer_auth" = []))
)]
pub async fn get_permission(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.groups.get_permission(&actor, id).await?))
}

/// Grant this permission to a group
#[utoipa::path(
    post,
    path = "/permissions/{id}/assign_to_group",
    params(("id" = Uuid, Path, description = "Permission id")),
    request_body = GroupIdRequest,
    responses(
        (status = 200, description = "Group after the grant", body = GroupResponse),
        (status = 400, description = "group_id missing", body = ErrorResponse),
        (status = 403, description = "Staff only", body = ErrorResponse),
        (status = 404, description = "Unknown group or permission", body = ErrorResponse)
    ),
    tag = "Permissions",
    security(("bearer_auth" = []))
)]
pub async fn assign_to_group(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        state
            .groups
            .assign_permission_to_group(&actor, id, req)
            .await?,
    ))
}

/// Revoke this permission from a group
#[utoipa::path(
    post,
    path = "/permissions/{id}/remove_from_group",
    params(("id" = Uuid, Path, description = "Permission id")),
    request_body = GroupIdRequest,
    responses(
        (status = 200, description = "Group after the revocation", body = GroupResponse),
        (status = 400, description = "group_id missing", body = ErrorResponse),
        (status = 403, description = "Staff only", body = ErrorResponse),
        (status = 404, description = "Unknown group or permission", body = ErrorResponse)
    ),
    tag = "Permissions",
    security(("bearer_auth" = []))
)]
pub async fn remove_from_group(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        state
            .groups
            .remove_permission_from_group(&actor, id, req)
            .await?,
    ))
}
