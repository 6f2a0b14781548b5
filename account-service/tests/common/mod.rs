//! Shared setup for account-service integration tests.
//!
//! Builds the full router over an in-memory store and mock backends so the
//! HTTP surface can be driven with `oneshot`.

#![allow(dead_code)]

use account_service::{
    build_router,
    config::{
        AccountConfig, AuthzConfig, DatabaseConfig, Environment, JwtConfig, PasswordConfig,
        RateLimitConfig, RedisConfig, SecurityConfig, SmtpConfig, SwaggerConfig, SwaggerMode,
    },
    models::{Account, Group, Permission},
    services::{
        AccountService, AccountStore, AuthorizationPolicy, CredentialService, GroupService,
        IdentityReconciler, InMemoryStore, JwtService, MockBlacklist, MockEmailService,
        MockOAuthProvider, OAuthProvider, PasswordPolicy, ProviderProfile,
    },
    utils::{hash_password, Password},
    AppState,
};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower::ServiceExt;
use uuid::Uuid;

const TEST_PRIVATE_KEY: &str = include_str!("../fixtures/jwt_private.pem");
const TEST_PUBLIC_KEY: &str = include_str!("../fixtures/jwt_public.pem");

pub const PASSWORD: &str = "Str0ng!Passw0rd";
pub const FRONTEND_URL: &str = "http://frontend.test";
pub const CLIENT_IP: &str = "203.0.113.7";

fn key_file(pem: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create key file");
    file.write_all(pem.as_bytes())
        .expect("Failed to write key file");
    file
}

pub fn test_config(private_key_path: &str, public_key_path: &str) -> AccountConfig {
    AccountConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "account-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        jwt: JwtConfig {
            private_key_path: private_key_path.to_string(),
            public_key_path: public_key_path.to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        google: None,
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            username: String::new(),
            password: String::new(),
            from: "noreply@example.com".to_string(),
        },
        frontend_url: FRONTEND_URL.to_string(),
        password: PasswordConfig {
            min_length: 8,
            reset_token_ttl_minutes: 60,
        },
        authz: AuthzConfig {
            manager_group: "Manager".to_string(),
        },
        bootstrap_admin: None,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            register_attempts: 1000,
            register_window_seconds: 60,
            password_reset_attempts: 1000,
            password_reset_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
    }
}

pub fn google_profile() -> ProviderProfile {
    ProviderProfile {
        sub: "google-sub-1".to_string(),
        email: Some("gina@gmail.com".to_string()),
        email_verified: Some(true),
        given_name: Some("Gina".to_string()),
        family_name: Some("Lee".to_string()),
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub blacklist: Arc<MockBlacklist>,
    pub email: Arc<MockEmailService>,
    pub oauth: Arc<MockOAuthProvider>,
    _key_files: (NamedTempFile, NamedTempFile),
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Like [`TestApp::spawn`], with a hook to adjust configuration first.
    pub async fn spawn_with(configure: impl FnOnce(&mut AccountConfig)) -> Self {
        Self::build(configure, true).await
    }

    /// An app with no Google provider configured.
    pub async fn spawn_without_google() -> Self {
        Self::build(|_| {}, false).await
    }

    async fn build(configure: impl FnOnce(&mut AccountConfig), with_google: bool) -> Self {
        let private_key = key_file(TEST_PRIVATE_KEY);
        let public_key = key_file(TEST_PUBLIC_KEY);

        let mut config = test_config(
            private_key.path().to_str().expect("temp path"),
            public_key.path().to_str().expect("temp path"),
        );
        configure(&mut config);

        let jwt = JwtService::new(&config.jwt).expect("Failed to load JWT keys");
        let store = Arc::new(InMemoryStore::new());
        let blacklist = Arc::new(MockBlacklist::new());
        let email = Arc::new(MockEmailService::new());
        let oauth = Arc::new(MockOAuthProvider::new(google_profile()));
        let authz = AuthorizationPolicy::new(config.authz.manager_group.clone());

        let credentials = CredentialService::new(
            store.clone(),
            jwt.clone(),
            blacklist.clone(),
            email.clone(),
            authz.clone(),
            PasswordPolicy::standard(config.password.min_length),
            config.frontend_url.clone(),
            config.password.reset_token_ttl_minutes,
        );
        let accounts = AccountService::new(store.clone(), authz.clone());
        let groups = GroupService::new(store.clone(), authz.clone());
        let reconciler = IdentityReconciler::new(
            store.clone(),
            jwt.clone(),
            blacklist.clone(),
            with_google.then(|| oauth.clone() as Arc<dyn OAuthProvider>),
            authz,
        );

        let state = AppState {
            store: store.clone(),
            jwt,
            blacklist: blacklist.clone(),
            credentials,
            accounts,
            groups,
            reconciler,
            login_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.login_attempts,
                config.rate_limit.login_window_seconds,
            ),
            register_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.register_attempts,
                config.rate_limit.register_window_seconds,
            ),
            password_reset_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.password_reset_attempts,
                config.rate_limit.password_reset_window_seconds,
            ),
            ip_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.global_ip_limit,
                config.rate_limit.global_ip_window_seconds,
            ),
            config,
        };

        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self {
            router,
            state,
            store,
            blacklist,
            email,
            oauth,
            _key_files: (private_key, public_key),
        }
    }

    /// Sends one request and returns the status and the JSON body
    /// (`Value::Null` when the body is empty or not JSON).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", CLIENT_IP);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Sends a bodiless request and returns the raw response.
    pub async fn raw(&self, method: Method, uri: &str, headers: &[(&str, &str)]) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, token, None).await
    }

    /// Inserts an active account with [`PASSWORD`].
    pub async fn create_account(&self, username: &str, is_staff: bool, is_superuser: bool) -> Account {
        let hash = hash_password(&Password::new(PASSWORD)).unwrap();
        let mut account = Account::new(username, format!("{}@example.com", username))
            .with_password_hash(hash.into_string());
        account.is_staff = is_staff;
        account.is_superuser = is_superuser;
        self.store.insert_account(&account, &[]).await.unwrap();
        account
    }

    /// Inserts a deactivated account with [`PASSWORD`].
    pub async fn create_inactive_account(&self, username: &str) -> Account {
        let hash = hash_password(&Password::new(PASSWORD)).unwrap();
        let mut account = Account::new(username, format!("{}@example.com", username))
            .with_password_hash(hash.into_string());
        account.is_active = false;
        self.store.insert_account(&account, &[]).await.unwrap();
        account
    }

    pub async fn create_group(&self, name: &str) -> Group {
        let group = Group::new(name);
        self.store.insert_group(&group).await.unwrap();
        group
    }

    pub async fn create_permission(&self, codename: &str, resource_type: &str) -> Permission {
        let permission = Permission::new(format!("Can {}", codename), codename, resource_type);
        self.store.insert_permission(&permission).await.unwrap();
        permission
    }

    pub async fn join_group(&self, account_id: Uuid, group_id: Uuid) {
        let mut ids: Vec<Uuid> = self
            .store
            .groups_for_account(account_id)
            .await
            .unwrap()
            .iter()
            .map(|g| g.group_id)
            .collect();
        ids.push(group_id);
        self.store
            .replace_account_groups(account_id, &ids)
            .await
            .unwrap();
    }

    /// Logs in and returns the full token pair body.
    pub async fn login(&self, username: &str, password: &str) -> Value {
        let (status, body) = self
            .post(
                "/auth/login",
                None,
                serde_json::json!({ "username": username, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body
    }

    pub async fn access_token(&self, username: &str) -> String {
        self.login(username, PASSWORD).await["access"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// Staff account plus its access token.
    pub async fn staff(&self, username: &str) -> (Account, String) {
        let account = self.create_account(username, true, false).await;
        let token = self.access_token(username).await;
        (account, token)
    }

    /// Ordinary account plus its access token.
    pub async fn user(&self, username: &str) -> (Account, String) {
        let account = self.create_account(username, false, false).await;
        let token = self.access_token(username).await;
        (account, token)
    }
}
