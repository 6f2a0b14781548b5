use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{GoogleCallbackQuery, GoogleRedirectResponse, SocialLoginResponse},
        ErrorResponse,
    },
    services::Actor,
    AppState,
};

/// Start Google sign-in; returns the consent URL
#[utoipa::path(
    get,
    path = "/auth/google/redirect",
    responses(
        (status = 200, description = "Authorization URL", body = GoogleRedirectResponse),
        (status = 500, description = "Google OAuth not configured", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn google_redirect(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reconciler.redirect(&actor).await?))
}

/// Complete Google sign-in and issue local tokens
#[utoipa::path(
    get,
    path = "/auth/google/callback",
    params(GoogleCallbackQuery),
    responses(
        (status = 200, description = "Signed in", body = SocialLoginResponse),
        (status = 400, description = "Missing code or bad state", body = ErrorResponse),
        (status = 502, description = "Google request failed", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn google_callback(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<GoogleCallbackQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reconciler.callback(&actor, query).await?))
}
