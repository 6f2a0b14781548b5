//! Registration, sign-in sessions and the password lifecycle.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::config::BootstrapAdminConfig;
use crate::dtos::account::{
    AccountResponse, ChangePasswordRequest, ForgotPasswordRequest, RegisterRequest,
    ResetPasswordRequest,
};
use crate::dtos::auth::{LoginRequest, LogoutRequest, RefreshRequest};
use crate::models::Account;
use crate::services::accounts::account_response;
use crate::services::authz::{Action, Actor, AuthorizationPolicy, Target};
use crate::services::email::EmailProvider;
use crate::services::error::ServiceError;
use crate::services::jwt::{JwtService, TokenPair};
use crate::services::metrics::record_event;
use crate::services::policy::{PasswordContext, PasswordPolicy};
use crate::services::redis::TokenBlacklist;
use crate::services::store::{distinct_ids, AccountStore};
use crate::utils::{
    field_error, generate_reset_token, hash_password, hash_token, verify_against_dummy,
    verify_password, Password, PasswordHashString,
};

pub const PASSWORD_MISMATCH: &str = "Password fields didn't match.";
pub const WRONG_PASSWORD: &str = "Wrong password.";
pub const RESET_LINK_SENT: &str =
    "If an account with that email exists, a password reset link has been sent.";

/// Trims surrounding whitespace and lowercases the domain part.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

fn policy_errors(
    errors: &mut ValidationErrors,
    field: &'static str,
    violations: Vec<String>,
) {
    for message in violations {
        field_error(errors, field, "password_policy", message);
    }
}

fn required(field: &'static str) -> ServiceError {
    ServiceError::field(field, "required", "This field is required.")
}

#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn AccountStore>,
    jwt: JwtService,
    blacklist: Arc<dyn TokenBlacklist>,
    email: Arc<dyn EmailProvider>,
    authz: AuthorizationPolicy,
    passwords: PasswordPolicy,
    frontend_url: String,
    reset_token_ttl: Duration,
}

impl CredentialService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AccountStore>,
        jwt: JwtService,
        blacklist: Arc<dyn TokenBlacklist>,
        email: Arc<dyn EmailProvider>,
        authz: AuthorizationPolicy,
        passwords: PasswordPolicy,
        frontend_url: impl Into<String>,
        reset_token_ttl_minutes: i64,
    ) -> Self {
        Self {
            store,
            jwt,
            blacklist,
            email,
            authz,
            passwords,
            frontend_url: frontend_url.into(),
            reset_token_ttl: Duration::minutes(reset_token_ttl_minutes),
        }
    }

    pub async fn register(
        &self,
        actor: &Actor,
        req: RegisterRequest,
    ) -> Result<AccountResponse, ServiceError> {
        self.authz.authorize(actor, Action::Register, &Target::None)?;

        let email = normalize_email(&req.email);
        let first_name = req.first_name.unwrap_or_default();
        let last_name = req.last_name.unwrap_or_default();
        let group_ids = distinct_ids(req.group_ids.as_deref().unwrap_or_default());

        let mut errors = ValidationErrors::new();

        if req.password != req.password2 {
            field_error(&mut errors, "password", "mismatch", PASSWORD_MISMATCH);
        }

        let context = PasswordContext {
            username: &req.username,
            email: &email,
            first_name: &first_name,
            last_name: &last_name,
        };
        if let Err(violations) = self.passwords.validate(&req.password, &context) {
            policy_errors(&mut errors, "password", violations);
        }

        if self
            .store
            .find_account_by_username(&req.username)
            .await?
            .is_some()
        {
            field_error(
                &mut errors,
                "username",
                "unique",
                "A user with that username already exists.",
            );
        }

        if self.store.find_account_by_email(&email).await?.is_some() {
            field_error(
                &mut errors,
                "email",
                "unique",
                "A user with that email already exists.",
            );
        }

        if !group_ids.is_empty() {
            let found = self.store.find_groups(&group_ids).await?;
            for id in group_ids
                .iter()
                .filter(|id| !found.iter().any(|g| g.group_id == **id))
            {
                field_error(
                    &mut errors,
                    "group_ids",
                    "does_not_exist",
                    format!("Invalid pk \"{}\" - object does not exist.", id),
                );
            }
        }

        if !errors.is_empty() {
            record_event("register", "rejected");
            return Err(ServiceError::Validation(errors));
        }

        let password_hash = hash_password(&Password::new(req.password))?;

        let mut account =
            Account::new(req.username, email).with_password_hash(password_hash.into_string());
        account.first_name = first_name;
        account.last_name = last_name;
        account.phone_number = req.phone_number.filter(|p| !p.trim().is_empty());
        account.bio = req.bio.filter(|b| !b.trim().is_empty());

        // Uniqueness is re-checked by the store; a concurrent registration
        // surfaces here as a field error.
        self.store.insert_account(&account, &group_ids).await?;

        record_event("register", "success");
        tracing::info!(
            account_id = %account.account_id,
            groups = group_ids.len(),
            "Account registered"
        );

        account_response(self.store.as_ref(), &account).await
    }

    pub async fn login(&self, actor: &Actor, req: LoginRequest) -> Result<TokenPair, ServiceError> {
        self.authz.authorize(actor, Action::Login, &Target::None)?;

        let password = Password::new(req.password);

        // Every rejection below pays for one Argon2 verification.
        let account = match self.store.find_account_by_username(&req.username).await? {
            Some(account) if account.is_active => account,
            _ => {
                verify_against_dummy(&password);
                record_event("login", "failure");
                tracing::info!("Login rejected: unknown or inactive account");
                return Err(ServiceError::invalid_credentials());
            }
        };

        let Some(hash) = account.password_hash.as_deref().filter(|h| !h.is_empty()) else {
            verify_against_dummy(&password);
            record_event("login", "failure");
            tracing::info!(account_id = %account.account_id, "Login rejected: no usable password");
            return Err(ServiceError::invalid_credentials());
        };

        let matches = verify_password(&password, &PasswordHashString::new(hash))?;

        if !matches {
            record_event("login", "failure");
            tracing::info!(account_id = %account.account_id, "Login rejected: wrong password");
            return Err(ServiceError::invalid_credentials());
        }

        record_event("login", "success");
        tracing::info!(account_id = %account.account_id, "User logged in");
        self.issue_tokens(&account)
    }

    /// Rotates a refresh token: the presented one is revoked and a new pair
    /// is issued.
    pub async fn refresh(
        &self,
        actor: &Actor,
        req: RefreshRequest,
    ) -> Result<TokenPair, ServiceError> {
        self.authz
            .authorize(actor, Action::RefreshSession, &Target::None)?;

        let token = req.refresh.filter(|t| !t.is_empty()).ok_or_else(|| required("refresh"))?;

        let claims = self.jwt.validate_refresh_token(&token).map_err(|e| {
            tracing::debug!(error = %e, "Refresh token rejected");
            ServiceError::Authentication("Token is invalid or expired".to_string())
        })?;

        if self.blacklist.is_blacklisted(&claims.jti).await? {
            record_event("refresh", "revoked");
            tracing::warn!(account_id = %claims.sub, "Revoked refresh token presented");
            return Err(ServiceError::TokenRevoked);
        }

        let account_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Authentication("Token is invalid or expired".to_string()))?;

        let account = self
            .store
            .find_account(account_id)
            .await?
            .filter(|a| a.is_active)
            .ok_or_else(ServiceError::invalid_credentials)?;

        // Only one caller may redeem a given refresh token.
        let claimed = self
            .blacklist
            .revoke_if_new(&claims.jti, claims.remaining_lifetime_seconds())
            .await?;
        if !claimed {
            record_event("refresh", "revoked");
            tracing::warn!(account_id = %account.account_id, "Refresh token redeemed concurrently");
            return Err(ServiceError::TokenRevoked);
        }

        record_event("refresh", "success");
        tracing::info!(account_id = %account.account_id, "Session refreshed");
        self.issue_tokens(&account)
    }

    /// Revokes a refresh token. Revoking an already revoked token succeeds.
    pub async fn logout(&self, actor: &Actor, req: LogoutRequest) -> Result<(), ServiceError> {
        self.authz.authorize(actor, Action::Logout, &Target::None)?;

        let token = req.refresh.filter(|t| !t.is_empty()).ok_or_else(|| required("refresh"))?;

        let claims = self.jwt.validate_refresh_token(&token).map_err(|e| {
            tracing::debug!(error = %e, "Logout with unusable refresh token");
            ServiceError::field("refresh", "invalid", "Token is invalid or expired")
        })?;

        self.blacklist
            .blacklist_token(&claims.jti, claims.remaining_lifetime_seconds())
            .await?;

        record_event("logout", "success");
        tracing::info!(account_id = %claims.sub, "User logged out");
        Ok(())
    }

    pub async fn change_password(
        &self,
        actor: &Actor,
        req: ChangePasswordRequest,
    ) -> Result<(), ServiceError> {
        let principal = actor.principal().ok_or(ServiceError::Unauthenticated)?;

        let account = self
            .store
            .find_account(principal.account_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        self.authz.authorize(
            actor,
            Action::ChangePassword,
            &Target::Account {
                id: account.account_id,
                is_superuser: account.is_superuser,
            },
        )?;

        let mut errors = ValidationErrors::new();
        if req.new_password != req.new_password2 {
            field_error(&mut errors, "new_password", "mismatch", PASSWORD_MISMATCH);
        }
        if let Err(violations) = self
            .passwords
            .validate(&req.new_password, &password_context(&account))
        {
            policy_errors(&mut errors, "new_password", violations);
        }
        if !errors.is_empty() {
            return Err(ServiceError::Validation(errors));
        }

        let old_matches = match account.password_hash.as_deref().filter(|h| !h.is_empty()) {
            Some(hash) => verify_password(
                &Password::new(req.old_password),
                &PasswordHashString::new(hash),
            )?,
            None => false,
        };
        if !old_matches {
            record_event("change_password", "failure");
            tracing::info!(account_id = %account.account_id, "Password change rejected: wrong password");
            return Err(ServiceError::Authentication(WRONG_PASSWORD.to_string()));
        }

        let new_hash = hash_password(&Password::new(req.new_password))?;
        self.store
            .set_password_hash(account.account_id, new_hash.as_str())
            .await?;

        record_event("change_password", "success");
        tracing::info!(account_id = %account.account_id, "Password changed");
        Ok(())
    }

    /// Issues a reset token and mails the link. Unknown or inactive
    /// addresses get the same answer and no mail.
    pub async fn forgot_password(
        &self,
        actor: &Actor,
        req: ForgotPasswordRequest,
    ) -> Result<(), ServiceError> {
        self.authz
            .authorize(actor, Action::ForgotPassword, &Target::None)?;

        let email = normalize_email(&req.email);
        let account = match self.store.find_account_by_email(&email).await? {
            Some(account) if account.is_active => account,
            _ => {
                record_event("password_reset_requested", "unknown");
                tracing::info!("Password reset requested for unknown or inactive email");
                return Ok(());
            }
        };

        let token = generate_reset_token();
        let expires = Utc::now() + self.reset_token_ttl;
        self.store
            .set_reset_token(account.account_id, &hash_token(&token), expires)
            .await?;

        let link = format!(
            "{}/reset-password/{}",
            self.frontend_url.trim_end_matches('/'),
            token
        );

        self.email
            .send_password_reset_email(&account.email, &link)
            .await
            .map_err(|e| {
                record_event("password_reset_requested", "delivery_failure");
                ServiceError::Delivery(e.to_string())
            })?;

        record_event("password_reset_requested", "success");
        tracing::info!(account_id = %account.account_id, "Password reset token issued");
        Ok(())
    }

    pub async fn reset_password(
        &self,
        actor: &Actor,
        req: ResetPasswordRequest,
    ) -> Result<(), ServiceError> {
        self.authz
            .authorize(actor, Action::ResetPassword, &Target::None)?;

        let token_hash = hash_token(req.token.trim());
        let now = Utc::now();

        let account = self
            .store
            .find_account_by_reset_token(&token_hash)
            .await?
            .filter(|a| a.reset_token_expires_utc.is_some_and(|exp| exp > now))
            .ok_or_else(invalid_reset_token)?;

        let mut errors = ValidationErrors::new();
        if req.new_password != req.new_password2 {
            field_error(&mut errors, "new_password", "mismatch", PASSWORD_MISMATCH);
        }
        if let Err(violations) = self
            .passwords
            .validate(&req.new_password, &password_context(&account))
        {
            policy_errors(&mut errors, "new_password", violations);
        }
        if !errors.is_empty() {
            return Err(ServiceError::Validation(errors));
        }

        let new_hash = hash_password(&Password::new(req.new_password))?;

        // The lookup above only feeds validation; the swap itself is the
        // single atomic consume.
        let consumed = self
            .store
            .consume_reset_token(&token_hash, new_hash.as_str(), now)
            .await?
            .ok_or_else(invalid_reset_token)?;

        record_event("password_reset", "success");
        tracing::info!(account_id = %consumed, "Password reset completed");
        Ok(())
    }

    pub fn issue_tokens(&self, account: &Account) -> Result<TokenPair, ServiceError> {
        Ok(self
            .jwt
            .generate_token_pair(account.account_id, &account.username)?)
    }

    /// Creates the configured administrator unless the username is taken.
    /// Returns whether an account was created.
    pub async fn ensure_admin(&self, admin: &BootstrapAdminConfig) -> Result<bool, ServiceError> {
        if self
            .store
            .find_account_by_username(&admin.username)
            .await?
            .is_some()
        {
            tracing::debug!(username = %admin.username, "Bootstrap administrator already exists");
            return Ok(false);
        }

        let hash = hash_password(&Password::new(admin.password.clone()))?;
        let mut account = Account::new(admin.username.clone(), normalize_email(&admin.email))
            .with_password_hash(hash.into_string());
        account.is_staff = true;
        account.is_superuser = true;
        account.is_verified = true;

        self.store.insert_account(&account, &[]).await?;
        tracing::info!(account_id = %account.account_id, "Bootstrap administrator created");
        Ok(true)
    }
}

fn invalid_reset_token() -> ServiceError {
    ServiceError::InvalidToken("Invalid or expired token.".to_string())
}

fn password_context(account: &Account) -> PasswordContext<'_> {
    PasswordContext {
        username: &account.username,
        email: &account.email,
        first_name: &account.first_name,
        last_name: &account.last_name,
    }
}
