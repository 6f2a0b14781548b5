use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A user account with its credential material and profile fields.
///
/// `password_hash` is `None` for accounts created through an external
/// identity provider; such accounts cannot use password login until a
/// password is set through the reset flow.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Account {
    pub account_id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    pub google_id: Option<String>,
    pub is_verified: bool,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    /// SHA-256 hex digest of the outstanding reset token, if any.
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Account {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            account_id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            password_hash: None,
            first_name: String::new(),
            last_name: String::new(),
            phone_number: None,
            bio: None,
            google_id: None,
            is_verified: false,
            is_active: true,
            is_staff: false,
            is_superuser: false,
            reset_token_hash: None,
            reset_token_expires_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    pub fn has_usable_password(&self) -> bool {
        self.password_hash.as_deref().is_some_and(|h| !h.is_empty())
    }
}
