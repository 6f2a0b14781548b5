use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        group::{GroupRequest, GroupResponse, PermissionIdsRequest},
        ErrorResponse,
    },
    services::Actor,
    utils::ValidatedJson,
    AppState,
};

/// List groups
#[utoipa::path(
    get,
    path = "/groups",
    responses(
        (status = 200, description = "Groups ordered by name", body = [GroupResponse]),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Staff only", body = ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn list_groups(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.groups.list_groups(&actor).await?))
}

/// Create a group
#[utoipa::path(
    post,
    path = "/groups",
    request_body = GroupRequest,
    responses(
        (status = 201, description = "Group created", body = GroupResponse),
        (status = 400, description = "Blank or duplicate name", body = ErrorResponse),
        (status = 403, description = "Staff only", body = ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn create_group(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<GroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let group = state.groups.create_group(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// Retrieve a group with its permissions
#[utoipa::path(
    get,
    path = "/groups/{id}",
    params(("id" = Uuid, Path, description = "Group id")),
    responses(
        (status = 200, description = "Group", body = GroupResponse),
        (status = 403, description = "Staff only", body = ErrorResponse),
        (status = 404, description = "No such group", body = ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn get_group(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.groups.get_group(&actor, id).await?))
}

/// Rename a group
#[utoipa::path(
    patch,
    path = "/groups/{id}",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = GroupRequest,
    responses(
        (status = 200, description = "Group renamed", body = GroupResponse),
        (status = 400, description = "Blank or duplicate name", body = ErrorResponse),
        (status = 403, description = "Staff only", body = ErrorResponse),
        (status = 404, description = "No such group", body = ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn update_group(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<GroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.groups.update_group(&actor, id, req).await?))
}

/// Delete a group; memberships and grants go with it
#[utoipa::path(
    delete,
    path = "/groups/{id}",
    params(("id" = Uuid, Path, description = "Group id")),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 403, description = "Staff only", body = ErrorResponse),
        (status = 404, description = "No such group", body = ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn delete_group(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.groups.delete_group(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the group's permissions
#[utoipa::path(
    post,
    path = "/groups/{id}/assign_permissions",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = PermissionIdsRequest,
    responses(
        (status = 200, description = "Group with new permissions", body = GroupResponse),
        (status = 400, description = "permission_ids missing", body = ErrorResponse),
        (status = 403, description = "Staff only", body = ErrorResponse),
        (status = 404, description = "Unknown group or permission", body = ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn assign_permissions(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PermissionIdsRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.groups.assign_permissions(&actor, id, req).await?))
}

/// Remove permissions from the group
#[utoipa::path(
    post,
    path = "/groups/{id}/remove_permissions",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = PermissionIdsRequest,
    responses(
        (status = 200, description = "Group after removal", body = GroupResponse),
        (status = 400, description = "permission_ids missing", body = ErrorResponse),
        (status = 403, description = "Staff only", body = ErrorResponse),
        (status = 404, description = "Unknown group or permission", body = ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn remove_permissions(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PermissionIdsRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.groups.remove_permissions(&actor, id, req).await?))
}
