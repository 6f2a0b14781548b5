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
        account::{
            AccountResponse, AssignGroupsRequest, ChangePasswordRequest, ForgotPasswordRequest,
            RegisterRequest, ResetPasswordRequest, UpdateAccountRequest,
        },
        ErrorResponse, MessageResponse,
    },
    services::{credentials::RESET_LINK_SENT, Actor},
    utils::ValidatedJson,
    AppState,
};

/// Register a new account
#[utoipa::path(
    post,
    path = "/users/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AccountResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Users"
)]
pub async fn register(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state.credentials.register(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// List accounts visible to the caller
#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "Accounts ordered by creation time", body = [AccountResponse]),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.list(&actor).await?))
}

/// Current account
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Current account", body = AccountResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn get_me(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.me(&actor).await?))
}

/// Update the current account
#[utoipa::path(
    patch,
    path = "/users/me",
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "Updated account", body = AccountResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Group changes need staff", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn update_me(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<UpdateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.update_me(&actor, req).await?))
}

/// Retrieve an account
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account", body = AccountResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "No such account", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.view(&actor, id).await?))
}

/// Partially update an account
#[utoipa::path(
    patch,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "Account id")),
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "Updated account", body = AccountResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "No such account", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.update(&actor, id, req).await?))
}

/// Replace an account's group memberships
#[utoipa::path(
    post,
    path = "/users/{id}/assign_groups",
    params(("id" = Uuid, Path, description = "Account id")),
    request_body = AssignGroupsRequest,
    responses(
        (status = 200, description = "Account with new groups", body = AccountResponse),
        (status = 400, description = "group_ids missing", body = ErrorResponse),
        (status = 403, description = "Staff only", body = ErrorResponse),
        (status = 404, description = "Unknown account or group", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn assign_groups(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AssignGroupsRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.assign_groups(&actor, id, req).await?))
}

/// Change the caller's password
#[utoipa::path(
    post,
    path = "/users/change_password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Wrong password or not authenticated", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.change_password(&actor, req).await?;
    Ok(Json(MessageResponse::new("Password updated successfully.")))
}

/// Request a password reset link
#[utoipa::path(
    post,
    path = "/users/forgot_password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Accepted; same answer for unknown addresses", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Email delivery failed", body = ErrorResponse)
    ),
    tag = "Users"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.forgot_password(&actor, req).await?;
    Ok(Json(MessageResponse::new(RESET_LINK_SENT)))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/users/reset_password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid token or validation error", body = ErrorResponse)
    ),
    tag = "Users"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.reset_password(&actor, req).await?;
    Ok(Json(MessageResponse::new("Password has been reset successfully.")))
}
