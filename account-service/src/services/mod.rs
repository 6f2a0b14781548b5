//! Business logic for account-service.

pub mod accounts;
pub mod authz;
pub mod credentials;
mod database;
pub mod email;
pub mod error;
pub mod groups;
pub mod jwt;
pub mod memory_store;
pub mod metrics;
pub mod oauth;
pub mod policy;
pub mod reconciler;
pub mod redis;
pub mod store;

pub use accounts::AccountService;
pub use authz::{AccessDenied, AccountScope, Action, Actor, AuthorizationPolicy, Principal, Target};
pub use credentials::CredentialService;
pub use database::PgStore;
pub use email::{EmailProvider, EmailService, MockEmailService};
pub use error::ServiceError;
pub use groups::GroupService;
pub use jwt::{AccessTokenClaims, JwtService, RefreshTokenClaims, TokenPair};
pub use memory_store::InMemoryStore;
pub use oauth::{GoogleOAuthClient, MockOAuthProvider, OAuthProvider, ProviderProfile};
pub use policy::{PasswordPolicy, PasswordRule};
pub use reconciler::IdentityReconciler;
pub use redis::{MockBlacklist, RedisService, TokenBlacklist};
pub use store::{AccountStore, StoreError};
