//! Google as an external identity provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::GoogleOAuthConfig;
use crate::services::error::ServiceError;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

const SCOPES: &str = "openid email profile";

/// Identity assertion returned by the provider's userinfo endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Stable provider-side subject id.
    pub sub: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Consent URL carrying `state`; requests an offline, refresh-capable grant.
    fn authorization_url(&self, state: &str) -> Result<String, ServiceError>;

    /// Trades an authorization code for a provider access token.
    async fn exchange_code(&self, code: &str) -> Result<String, ServiceError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ServiceError>;
}

#[derive(Debug, Serialize)]
struct AuthorizationParams<'a> {
    client_id: &'a str,
    redirect_uri: &'a str,
    response_type: &'a str,
    scope: &'a str,
    access_type: &'a str,
    prompt: &'a str,
    state: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Clone)]
pub struct GoogleOAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    token_url: String,
    userinfo_url: String,
}

impl GoogleOAuthClient {
    pub fn new(config: &GoogleOAuthConfig) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
        })
    }

    /// Points the token and userinfo calls somewhere else.
    pub fn with_endpoints(
        mut self,
        token_url: impl Into<String>,
        userinfo_url: impl Into<String>,
    ) -> Self {
        self.token_url = token_url.into();
        self.userinfo_url = userinfo_url.into();
        self
    }
}

fn upstream(stage: &str, err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        tracing::warn!(stage = %stage, "Google request timed out");
        ServiceError::Upstream(format!("Google {} request timed out", stage))
    } else {
        tracing::warn!(stage = %stage, error = %err, "Google request failed");
        ServiceError::Upstream(format!("Google {} request failed", stage))
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuthClient {
    fn authorization_url(&self, state: &str) -> Result<String, ServiceError> {
        let query = serde_urlencoded::to_string(AuthorizationParams {
            client_id: &self.client_id,
            redirect_uri: &self.redirect_uri,
            response_type: "code",
            scope: SCOPES,
            access_type: "offline",
            prompt: "consent",
            state,
        })
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode auth URL: {}", e)))?;

        Ok(format!("{}?{}", GOOGLE_AUTH_URL, query))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ServiceError> {
        let res = self
            .http
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| upstream("token", e))?;

        if !res.status().is_success() {
            tracing::warn!(status = %res.status(), "Google token exchange rejected");
            return Err(ServiceError::Upstream(
                "Failed to exchange authorization code".to_string(),
            ));
        }

        let body: TokenResponse = res.json().await.map_err(|e| upstream("token", e))?;

        body.access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::Upstream("No access token returned by Google".to_string()))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ServiceError> {
        let res = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| upstream("userinfo", e))?;

        if !res.status().is_success() {
            tracing::warn!(status = %res.status(), "Google userinfo rejected");
            return Err(ServiceError::Upstream(
                "Failed to fetch user info from Google".to_string(),
            ));
        }

        res.json().await.map_err(|e| upstream("userinfo", e))
    }
}

enum MockOutcome<T> {
    Ok(T),
    Fail(String),
}

/// Scriptable provider for tests.
pub struct MockOAuthProvider {
    access_token: Mutex<MockOutcome<String>>,
    profile: Mutex<MockOutcome<ProviderProfile>>,
}

impl MockOAuthProvider {
    pub fn new(profile: ProviderProfile) -> Self {
        Self {
            access_token: Mutex::new(MockOutcome::Ok("mock-google-access-token".to_string())),
            profile: Mutex::new(MockOutcome::Ok(profile)),
        }
    }

    pub fn set_profile(&self, profile: ProviderProfile) {
        if let Ok(mut p) = self.profile.lock() {
            *p = MockOutcome::Ok(profile);
        }
    }

    pub fn fail_exchange(&self, message: &str) {
        if let Ok(mut t) = self.access_token.lock() {
            *t = MockOutcome::Fail(message.to_string());
        }
    }

    pub fn fail_profile(&self, message: &str) {
        if let Ok(mut p) = self.profile.lock() {
            *p = MockOutcome::Fail(message.to_string());
        }
    }
}

#[async_trait]
impl OAuthProvider for MockOAuthProvider {
    fn authorization_url(&self, state: &str) -> Result<String, ServiceError> {
        Ok(format!(
            "{}?client_id=mock&response_type=code&state={}",
            GOOGLE_AUTH_URL, state
        ))
    }

    async fn exchange_code(&self, _code: &str) -> Result<String, ServiceError> {
        let guard = self
            .access_token
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Mock poisoned: {}", e)))?;
        match &*guard {
            MockOutcome::Ok(token) => Ok(token.clone()),
            MockOutcome::Fail(msg) => Err(ServiceError::Upstream(msg.clone())),
        }
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<ProviderProfile, ServiceError> {
        let guard = self
            .profile
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Mock poisoned: {}", e)))?;
        match &*guard {
            MockOutcome::Ok(profile) => Ok(profile.clone()),
            MockOutcome::Fail(msg) => Err(ServiceError::Upstream(msg.clone())),
        }
    }
}
