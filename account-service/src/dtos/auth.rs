use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::dtos::account::AccountResponse;
use crate::services::TokenPair;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    #[schema(example = "alice")]
    pub username: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    #[schema(example = "Secret123!")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    pub refresh: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LogoutRequest {
    pub refresh: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GoogleRedirectResponse {
    #[schema(example = "https://accounts.google.com/o/oauth2/v2/auth?client_id=...")]
    pub auth_url: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct GoogleCallbackQuery {
    /// Authorization code issued by Google
    pub code: Option<String>,
    /// Value returned by the redirect endpoint
    pub state: Option<String>,
    /// Set by Google when the user declined consent
    pub error: Option<String>,
}

/// Token pair plus the reconciled account.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SocialLoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: AccountResponse,
    /// Whether the callback created a new local account
    pub created: bool,
}
