use service_core::error::AppError;
use std::borrow::Cow;
use thiserror::Error;
use validator::ValidationErrors;

use crate::services::authz::AccessDenied;
use crate::services::store::StoreError;
use crate::utils::field_error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Authentication credentials were not provided")]
    Unauthenticated,

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Single field-scoped validation failure.
    pub fn field(
        field: &'static str,
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        let mut errors = ValidationErrors::new();
        field_error(&mut errors, field, code, message);
        ServiceError::Validation(errors)
    }

    pub fn invalid_credentials() -> Self {
        ServiceError::Authentication(
            "No active account found with the given credentials".to_string(),
        )
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        ServiceError::Validation(errors)
    }
}

impl From<AccessDenied> for ServiceError {
    fn from(denied: AccessDenied) -> Self {
        match denied {
            AccessDenied::Unauthenticated => ServiceError::Unauthenticated,
            AccessDenied::Forbidden => ServiceError::Forbidden(denied.to_string()),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { field } => {
                let message = match field {
                    "username" => "A user with that username already exists.",
                    "email" => "A user with that email already exists.",
                    "google_id" => "This Google account is already linked to another user.",
                    "name" => "A group with that name already exists.",
                    "codename" => "A permission with that codename already exists.",
                    _ => "A record with that identifier already exists.",
                };
                ServiceError::field(field, "unique", message)
            }
            StoreError::NotFound(entity) => ServiceError::NotFound(not_found_message(entity)),
            StoreError::Backend(e) => ServiceError::Internal(e),
        }
    }
}

pub(crate) fn not_found_message(entity: &str) -> String {
    match entity {
        "account" => "User not found".to_string(),
        "group" => "Group not found".to_string(),
        "permission" => "Permission not found".to_string(),
        other => format!("{} not found", other),
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => AppError::ValidationError(e),
            ServiceError::Authentication(msg) => AppError::AuthError(anyhow::anyhow!(msg)),
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            ServiceError::Unauthenticated => AppError::Unauthorized(anyhow::anyhow!(
                "Authentication credentials were not provided"
            )),
            ServiceError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            ServiceError::InvalidToken(msg) => AppError::InvalidToken(msg),
            ServiceError::TokenRevoked => {
                AppError::Unauthorized(anyhow::anyhow!("Token has been revoked"))
            }
            ServiceError::Upstream(msg) => AppError::BadGateway(msg),
            ServiceError::Configuration(msg) => AppError::ConfigError(anyhow::anyhow!(msg)),
            ServiceError::Delivery(msg) => AppError::EmailError(msg),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_become_field_errors() {
        let err = ServiceError::from(StoreError::Conflict { field: "username" });
        let ServiceError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        let fields = service_core::error::field_messages(&errors);
        assert_eq!(
            fields["username"],
            vec!["A user with that username already exists."]
        );
    }

    #[test]
    fn missing_entities_are_named() {
        let err = ServiceError::from(StoreError::NotFound("group"));
        assert_eq!(err.to_string(), "Group not found");
    }

    #[test]
    fn access_denials_keep_their_kind() {
        assert!(matches!(
            ServiceError::from(AccessDenied::Unauthenticated),
            ServiceError::Unauthenticated
        ));
        assert!(matches!(
            ServiceError::from(AccessDenied::Forbidden),
            ServiceError::Forbidden(_)
        ));
    }

    #[test]
    fn boundary_mapping() {
        assert!(matches!(
            AppError::from(ServiceError::TokenRevoked),
            AppError::Unauthorized(_)
        ));
        assert!(matches!(
            AppError::from(ServiceError::Upstream("timeout".into())),
            AppError::BadGateway(_)
        ));
        assert!(matches!(
            AppError::from(ServiceError::Delivery("smtp".into())),
            AppError::EmailError(_)
        ));
        assert!(matches!(
            AppError::from(ServiceError::Configuration("no provider".into())),
            AppError::ConfigError(_)
        ));
    }
}
