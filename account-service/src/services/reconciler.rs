//! Maps a Google identity onto a local account, creating one when needed.

use std::sync::Arc;
use uuid::Uuid;

use crate::dtos::account::AccountResponse;
use crate::dtos::auth::{GoogleCallbackQuery, GoogleRedirectResponse, SocialLoginResponse};
use crate::models::Account;
use crate::services::accounts::account_response;
use crate::services::authz::{Action, Actor, AuthorizationPolicy, Target};
use crate::services::credentials::normalize_email;
use crate::services::error::ServiceError;
use crate::services::jwt::JwtService;
use crate::services::metrics::record_event;
use crate::services::oauth::{OAuthProvider, ProviderProfile};
use crate::services::redis::TokenBlacklist;
use crate::services::store::{AccountStore, StoreError};

const STATE_TTL_SECONDS: i64 = 300;
const MAX_USERNAME_ATTEMPTS: usize = 50;

fn state_key(state: &str) -> String {
    format!("oauth_state:{}", state)
}

/// Local part of the email reduced to the username alphabet.
fn username_base(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let base: String = local
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
        .take(140)
        .collect();
    if base.is_empty() {
        "user".to_string()
    } else {
        base
    }
}

#[derive(Clone)]
pub struct IdentityReconciler {
    store: Arc<dyn AccountStore>,
    jwt: JwtService,
    cache: Arc<dyn TokenBlacklist>,
    provider: Option<Arc<dyn OAuthProvider>>,
    authz: AuthorizationPolicy,
}

impl IdentityReconciler {
    pub fn new(
        store: Arc<dyn AccountStore>,
        jwt: JwtService,
        cache: Arc<dyn TokenBlacklist>,
        provider: Option<Arc<dyn OAuthProvider>>,
        authz: AuthorizationPolicy,
    ) -> Self {
        Self {
            store,
            jwt,
            cache,
            provider,
            authz,
        }
    }

    fn provider(&self) -> Result<&Arc<dyn OAuthProvider>, ServiceError> {
        self.provider.as_ref().ok_or_else(|| {
            ServiceError::Configuration("Google OAuth is not configured".to_string())
        })
    }

    pub async fn redirect(&self, actor: &Actor) -> Result<GoogleRedirectResponse, ServiceError> {
        self.authz
            .authorize(actor, Action::OAuthRedirect, &Target::None)?;
        let provider = self.provider()?;

        let state = Uuid::new_v4().simple().to_string();
        self.cache
            .set_cache(&state_key(&state), "1", STATE_TTL_SECONDS)
            .await?;

        Ok(GoogleRedirectResponse {
            auth_url: provider.authorization_url(&state)?,
        })
    }

    pub async fn callback(
        &self,
        actor: &Actor,
        query: GoogleCallbackQuery,
    ) -> Result<SocialLoginResponse, ServiceError> {
        self.authz
            .authorize(actor, Action::OAuthCallback, &Target::None)?;
        let provider = self.provider()?;

        if let Some(error) = query.error {
            record_event("oauth_login", "provider_error");
            return Err(ServiceError::Upstream(format!(
                "Google returned an error: {}",
                error
            )));
        }

        let code = query
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ServiceError::field("code", "required", "Authorization code is required.")
            })?;

        let state = query.state.filter(|s| !s.is_empty()).ok_or_else(|| {
            ServiceError::field("state", "required", "OAuth state is required.")
        })?;
        if self.cache.take_cache(&state_key(&state)).await?.is_none() {
            record_event("oauth_login", "bad_state");
            return Err(ServiceError::field(
                "state",
                "invalid",
                "Invalid or expired OAuth state.",
            ));
        }

        let access_token = provider.exchange_code(&code).await?;
        let profile = provider.fetch_profile(&access_token).await?;

        let (account, created) = self.reconcile(&profile).await?;

        record_event("oauth_login", if created { "created" } else { "existing" });
        tracing::info!(
            account_id = %account.account_id,
            created,
            "User signed in with Google"
        );

        let tokens = self
            .jwt
            .generate_token_pair(account.account_id, &account.username)?;
        let user: AccountResponse = account_response(self.store.as_ref(), &account).await?;

        Ok(SocialLoginResponse {
            tokens,
            user,
            created,
        })
    }

    /// Returns the matching or newly created account and whether it was created.
    pub async fn reconcile(&self, profile: &ProviderProfile) -> Result<(Account, bool), ServiceError> {
        let email = profile
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                ServiceError::Upstream("Google did not provide an email address".to_string())
            })?;

        if let Some(account) = self.store.find_account_by_email(&email).await? {
            return Ok((self.link(account, profile).await?, false));
        }

        // The Google email may have changed since the identity was linked.
        if let Some(account) = self.store.find_account_by_google_id(&profile.sub).await? {
            return Ok((self.link(account, profile).await?, false));
        }

        let base = username_base(&email);
        let mut candidate = base.clone();
        for attempt in 1..=MAX_USERNAME_ATTEMPTS {
            if self
                .store
                .find_account_by_username(&candidate)
                .await?
                .is_some()
            {
                candidate = format!("{}{}", base, attempt);
                continue;
            }

            let mut account = Account::new(candidate.clone(), email.clone());
            account.google_id = Some(profile.sub.clone());
            account.is_verified = profile.email_verified.unwrap_or(false);
            account.first_name = profile.given_name.clone().unwrap_or_default();
            account.last_name = profile.family_name.clone().unwrap_or_default();

            match self.store.insert_account(&account, &[]).await {
                Ok(()) => return Ok((account, true)),
                // Another request created the account first; use theirs.
                Err(StoreError::Conflict { field: "email" }) => {
                    let existing = self
                        .store
                        .find_account_by_email(&email)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::Internal(anyhow::anyhow!(
                                "Account vanished after email conflict"
                            ))
                        })?;
                    return Ok((self.link(existing, profile).await?, false));
                }
                Err(StoreError::Conflict { field: "google_id" }) => {
                    let existing = self
                        .store
                        .find_account_by_google_id(&profile.sub)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::Internal(anyhow::anyhow!(
                                "Account vanished after google_id conflict"
                            ))
                        })?;
                    return Ok((self.link(existing, profile).await?, false));
                }
                Err(StoreError::Conflict { field: "username" }) => {
                    candidate = format!("{}{}", base, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let fallback = format!("{}{}", base, &Uuid::new_v4().simple().to_string()[..8]);
        let mut account = Account::new(fallback, email);
        account.google_id = Some(profile.sub.clone());
        account.is_verified = profile.email_verified.unwrap_or(false);
        self.store.insert_account(&account, &[]).await?;
        Ok((account, true))
    }

    async fn link(&self, account: Account, profile: &ProviderProfile) -> Result<Account, ServiceError> {
        if !account.is_active {
            return Err(ServiceError::Authentication(
                "User account is disabled.".to_string(),
            ));
        }

        if account.google_id.is_none() {
            let mut linked = account.clone();
            linked.google_id = Some(profile.sub.clone());
            if profile.email_verified == Some(true) {
                linked.is_verified = true;
            }
            match self.store.update_profile(&linked).await {
                Ok(()) => {
                    tracing::info!(account_id = %linked.account_id, "Google identity linked");
                    return Ok(linked);
                }
                // The identity already belongs to another account; sign in
                // without relinking.
                Err(StoreError::Conflict { field: "google_id" }) => {
                    tracing::warn!(
                        account_id = %account.account_id,
                        "Google identity is linked to a different account"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::authz::AccountScope;
    use crate::services::memory_store::InMemoryStore;
    use crate::services::oauth::MockOAuthProvider;
    use crate::services::redis::MockBlacklist;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/jwt_private.pem");
    const PUBLIC_KEY: &str = include_str!("../../tests/fixtures/jwt_public.pem");

    fn profile(email: Option<&str>) -> ProviderProfile {
        ProviderProfile {
            sub: "google-123".to_string(),
            email: email.map(str::to_string),
            email_verified: Some(true),
            given_name: Some("Bob".to_string()),
            family_name: Some("Builder".to_string()),
        }
    }

    fn reconciler(
        store: Arc<InMemoryStore>,
        provider: Option<Arc<MockOAuthProvider>>,
    ) -> IdentityReconciler {
        let jwt = JwtService::from_pem(PRIVATE_KEY.as_bytes(), PUBLIC_KEY.as_bytes(), 15, 7)
            .unwrap();
        IdentityReconciler::new(
            store,
            jwt,
            Arc::new(MockBlacklist::new()),
            provider.map(|p| p as Arc<dyn OAuthProvider>),
            AuthorizationPolicy::new("Manager"),
        )
    }

    fn callback(state: &str) -> GoogleCallbackQuery {
        GoogleCallbackQuery {
            code: Some("code".to_string()),
            state: Some(state.to_string()),
            error: None,
        }
    }

    fn state_from(url: &str) -> String {
        url.split("state=").nth(1).unwrap().split('&').next().unwrap().to_string()
    }

    #[test]
    fn usernames_come_from_the_local_part() {
        assert_eq!(username_base("bob.smith@gmail.com"), "bob.smith");
        assert_eq!(username_base("b o b@x.com"), "bob");
        assert_eq!(username_base("@x.com"), "user");
    }

    #[tokio::test]
    async fn missing_configuration_is_reported() {
        let r = reconciler(Arc::new(InMemoryStore::new()), None);
        let err = r.redirect(&Actor::Anonymous).await.unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(_)));
    }

    #[tokio::test]
    async fn new_identities_become_passwordless_accounts() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_account(&Account::new("bob", "someone@else.com"), &[])
            .await
            .unwrap();
        let provider = Arc::new(MockOAuthProvider::new(profile(Some("bob@gmail.com"))));
        let r = reconciler(store.clone(), Some(provider));

        let url = r.redirect(&Actor::Anonymous).await.unwrap().auth_url;
        let res = r
            .callback(&Actor::Anonymous, callback(&state_from(&url)))
            .await
            .unwrap();

        assert!(res.created);
        assert_eq!(res.user.username, "bob1");
        assert!(res.user.is_verified);
        assert_eq!(res.user.first_name, "Bob");

        let stored = store.find_account(res.user.id).await.unwrap().unwrap();
        assert!(!stored.has_usable_password());
        assert_eq!(stored.google_id.as_deref(), Some("google-123"));
    }

    #[tokio::test]
    async fn existing_accounts_are_linked_by_email() {
        let store = Arc::new(InMemoryStore::new());
        let existing = Account::new("robert", "Bob@gmail.com").with_password_hash("$argon2id$x");
        store.insert_account(&existing, &[]).await.unwrap();
        let provider = Arc::new(MockOAuthProvider::new(profile(Some("bob@GMAIL.com"))));
        let r = reconciler(store.clone(), Some(provider));

        let url = r.redirect(&Actor::Anonymous).await.unwrap().auth_url;
        let res = r
            .callback(&Actor::Anonymous, callback(&state_from(&url)))
            .await
            .unwrap();

        assert!(!res.created);
        assert_eq!(res.user.id, existing.account_id);
        let stored = store.find_account(existing.account_id).await.unwrap().unwrap();
        assert_eq!(stored.google_id.as_deref(), Some("google-123"));
        assert!(stored.has_usable_password());
    }

    #[tokio::test]
    async fn changed_google_email_reuses_the_linked_account() {
        let store = Arc::new(InMemoryStore::new());
        let mut existing = Account::new("bob", "old@gmail.com");
        existing.google_id = Some("google-123".to_string());
        store.insert_account(&existing, &[]).await.unwrap();
        let r = reconciler(store.clone(), None);

        let (account, created) = r.reconcile(&profile(Some("new@gmail.com"))).await.unwrap();

        assert!(!created);
        assert_eq!(account.account_id, existing.account_id);
        assert_eq!(store.list_accounts(AccountScope::All).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identity_linked_elsewhere_does_not_block_email_match() {
        let store = Arc::new(InMemoryStore::new());
        let mut linked = Account::new("bob", "old@gmail.com");
        linked.google_id = Some("google-123".to_string());
        store.insert_account(&linked, &[]).await.unwrap();
        let other = Account::new("robert", "bob@gmail.com");
        store.insert_account(&other, &[]).await.unwrap();
        let r = reconciler(store.clone(), None);

        let (account, created) = r.reconcile(&profile(Some("bob@gmail.com"))).await.unwrap();

        assert!(!created);
        assert_eq!(account.account_id, other.account_id);
        let stored = store.find_account(other.account_id).await.unwrap().unwrap();
        assert_eq!(stored.google_id, None);
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let provider = Arc::new(MockOAuthProvider::new(profile(Some("bob@gmail.com"))));
        let r = reconciler(Arc::new(InMemoryStore::new()), Some(provider));

        let state = state_from(&r.redirect(&Actor::Anonymous).await.unwrap().auth_url);
        r.callback(&Actor::Anonymous, callback(&state)).await.unwrap();

        let err = r.callback(&Actor::Anonymous, callback(&state)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = r
            .callback(&Actor::Anonymous, callback("forged"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn provider_failures_are_upstream_errors() {
        let provider = Arc::new(MockOAuthProvider::new(profile(None)));
        let r = reconciler(Arc::new(InMemoryStore::new()), Some(provider.clone()));

        let state = state_from(&r.redirect(&Actor::Anonymous).await.unwrap().auth_url);
        let err = r.callback(&Actor::Anonymous, callback(&state)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Upstream(_)));

        provider.fail_exchange("Failed to exchange authorization code");
        let state = state_from(&r.redirect(&Actor::Anonymous).await.unwrap().auth_url);
        let err = r.callback(&Actor::Anonymous, callback(&state)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Upstream(_)));
    }
}
