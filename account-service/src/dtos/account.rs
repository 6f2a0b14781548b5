use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{Account, Group};

const USERNAME_RULE: &str =
    "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.";

/// Letters, digits and `@.+-_`, at most 150 characters.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("This field may not be blank.".into());
        return Err(err);
    }
    if username.chars().count() > 150 {
        let mut err = ValidationError::new("max_length");
        err.message = Some("Ensure this field has no more than 150 characters.".into());
        return Err(err);
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        let mut err = ValidationError::new("invalid");
        err.message = Some(USERNAME_RULE.into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(custom(function = "validate_username"))]
    #[schema(example = "alice")]
    pub username: String,

    #[serde(default)]
    #[validate(email(message = "Enter a valid email address."))]
    #[schema(example = "a@x.com")]
    pub email: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    #[schema(example = "Secret123!")]
    pub password: String,

    /// Confirmation, must equal `password`
    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    #[schema(example = "Secret123!")]
    pub password2: String,

    #[validate(length(max = 150))]
    pub first_name: Option<String>,
    #[validate(length(max = 150))]
    pub last_name: Option<String>,
    #[validate(length(max = 20, message = "Ensure this field has no more than 20 characters."))]
    pub phone_number: Option<String>,
    #[validate(length(max = 500, message = "Ensure this field has no more than 500 characters."))]
    pub bio: Option<String>,

    /// Initial group memberships
    pub group_ids: Option<Vec<Uuid>>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateAccountRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: Option<String>,
    #[validate(email(message = "Enter a valid email address."))]
    pub email: Option<String>,
    #[validate(length(max = 150))]
    pub first_name: Option<String>,
    #[validate(length(max = 150))]
    pub last_name: Option<String>,
    #[validate(length(max = 20, message = "Ensure this field has no more than 20 characters."))]
    pub phone_number: Option<String>,
    #[validate(length(max = 500, message = "Ensure this field has no more than 500 characters."))]
    pub bio: Option<String>,
    /// Replaces memberships; staff only
    pub group_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub old_password: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub new_password: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub new_password2: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    #[validate(email(message = "Enter a valid email address."))]
    #[schema(example = "a@x.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[serde(default, alias = "reset_token")]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub token: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub new_password: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub new_password2: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AssignGroupsRequest {
    pub group_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupSummary {
    pub id: Uuid,
    #[schema(example = "Manager")]
    pub name: String,
}

impl From<&Group> for GroupSummary {
    fn from(group: &Group) -> Self {
        Self {
            id: group.group_id,
            name: group.group_name.clone(),
        }
    }
}

/// Public account representation. Credential material never appears here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    pub id: Uuid,
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "a@x.com")]
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    pub is_verified: bool,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered by name; the first entry is the primary role
    pub groups: Vec<GroupSummary>,
}

impl AccountResponse {
    pub fn new(account: &Account, groups: &[Group]) -> Self {
        Self {
            id: account.account_id,
            username: account.username.clone(),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            phone_number: account.phone_number.clone(),
            bio: account.bio.clone(),
            is_verified: account.is_verified,
            is_staff: account.is_staff,
            created_at: account.created_utc,
            updated_at: account.updated_utc,
            groups: groups.iter().map(GroupSummary::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_charset() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a.l+i-c_e@home").is_ok());
        assert!(validate_username("élodie").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("semi;colon").is_err());
        assert!(validate_username(&"a".repeat(151)).is_err());
        assert!(validate_username(&"a".repeat(150)).is_ok());
    }

    #[test]
    fn missing_fields_are_reported_per_field() {
        let req: RegisterRequest = serde_json::from_str(r#"{"username": "alice"}"#).unwrap();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("password2"));
        assert!(!fields.contains_key("username"));
    }

    #[test]
    fn representation_hides_credentials() {
        let account = Account::new("alice", "a@x.com").with_password_hash("$argon2id$...");
        let json = serde_json::to_value(AccountResponse::new(&account, &[])).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("reset_token_hash").is_none());
        assert_eq!(json["is_verified"], false);
        assert_eq!(json["groups"], serde_json::json!([]));
    }
}
