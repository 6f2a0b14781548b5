use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use std::convert::Infallible;
use uuid::Uuid;

use crate::{services::Actor, AppState};

fn unauthorized(message: &str) -> AppError {
    AppError::Unauthorized(anyhow::anyhow!(message.to_string()))
}

/// Resolves the caller into an [`Actor`] stored in request extensions.
///
/// No `Authorization` header means anonymous. A bearer token that is
/// malformed, expired, revoked, or names an unknown or inactive account is
/// rejected outright.
pub async fn actor_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        req.extensions_mut().insert(Actor::Anonymous);
        return Ok(next.run(req).await);
    };

    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| unauthorized("Missing or invalid Authorization header"))?;

    let claims = state.jwt.validate_access_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        unauthorized("Invalid or expired token")
    })?;

    let revoked = state.blacklist.is_blacklisted(&claims.jti).await.map_err(|e| {
        tracing::error!(error = %e, "Blacklist lookup failed");
        AppError::InternalError(e)
    })?;
    if revoked {
        return Err(unauthorized("Token has been revoked"));
    }

    let account_id =
        Uuid::parse_str(&claims.sub).map_err(|_| unauthorized("Invalid or expired token"))?;

    let principal = state
        .accounts
        .load_principal(account_id)
        .await?
        .ok_or_else(|| unauthorized("User not found or inactive"))?;

    tracing::Span::current().record("account_id", tracing::field::display(account_id));
    req.extensions_mut().insert(Actor::Authenticated(principal));

    Ok(next.run(req).await)
}

/// Anonymous unless `actor_middleware` resolved someone.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Actor>().cloned().unwrap_or_default())
    }
}
