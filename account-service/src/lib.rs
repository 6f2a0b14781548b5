pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    request_id::{request_id_middleware, REQUEST_ID_HEADER},
    security_headers::security_headers_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AccountConfig;
use crate::middleware::{actor_middleware, metrics_middleware};
use crate::services::{
    AccountService, AccountStore, CredentialService, GroupService, IdentityReconciler,
    JwtService, ServiceError, TokenBlacklist,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::metrics::metrics,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::social::google_redirect,
        handlers::social::google_callback,
        handlers::user::register,
        handlers::user::list_users,
        handlers::user::get_me,
        handlers::user::update_me,
        handlers::user::get_user,
        handlers::user::update_user,
        handlers::user::assign_groups,
        handlers::user::change_password,
        handlers::user::forgot_password,
        handlers::user::reset_password,
        handlers::group::list_groups,
        handlers::group::create_group,
        handlers::group::get_group,
        handlers::group::update_group,
        handlers::group::delete_group,
        handlers::group::assign_permissions,
        handlers::group::remove_permissions,
        handlers::permission::list_permissions,
        handlers::permission::get_permission,
        handlers::permission::assign_to_group,
        handlers::permission::remove_from_group,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::LoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::GoogleRedirectResponse,
            dtos::auth::SocialLoginResponse,
            dtos::account::RegisterRequest,
            dtos::account::UpdateAccountRequest,
            dtos::account::ChangePasswordRequest,
            dtos::account::ForgotPasswordRequest,
            dtos::account::ResetPasswordRequest,
            dtos::account::AssignGroupsRequest,
            dtos::account::AccountResponse,
            dtos::account::GroupSummary,
            dtos::group::GroupRequest,
            dtos::group::GroupResponse,
            dtos::group::PermissionIdsRequest,
            dtos::group::GroupIdRequest,
            dtos::group::PermissionResponse,
            services::TokenPair,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Sessions and Google sign-in"),
        (name = "Users", description = "Registration, account directory and passwords"),
        (name = "Groups", description = "Role groups and their permissions"),
        (name = "Permissions", description = "Permission catalogue"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AccountConfig,
    pub store: Arc<dyn AccountStore>,
    pub jwt: JwtService,
    pub blacklist: Arc<dyn TokenBlacklist>,
    pub credentials: CredentialService,
    pub accounts: AccountService,
    pub groups: GroupService,
    pub reconciler: IdentityReconciler,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
    pub password_reset_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

fn cors_layer(config: &AccountConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Skipping invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/users/register", post(handlers::user::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    // Forgot and reset share one budget per IP.
    let password_reset_routes = Router::new()
        .route(
            "/users/forgot_password",
            post(handlers::user::forgot_password),
        )
        .route("/users/reset_password", post(handlers::user::reset_password))
        .layer(from_fn_with_state(
            state.password_reset_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    if state.config.swagger_enabled() {
        app = app.merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));
    }

    let app = app
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/google/redirect", get(handlers::social::google_redirect))
        .route("/auth/google/callback", get(handlers::social::google_callback))
        .merge(login_route)
        .merge(register_route)
        .merge(password_reset_routes)
        .route("/users", get(handlers::user::list_users))
        .route(
            "/users/me",
            get(handlers::user::get_me).patch(handlers::user::update_me),
        )
        .route(
            "/users/change_password",
            post(handlers::user::change_password),
        )
        .route(
            "/users/:id",
            get(handlers::user::get_user).patch(handlers::user::update_user),
        )
        .route(
            "/users/:id/assign_groups",
            post(handlers::user::assign_groups),
        )
        .route(
            "/groups",
            get(handlers::group::list_groups).post(handlers::group::create_group),
        )
        .route(
            "/groups/:id",
            get(handlers::group::get_group)
                .patch(handlers::group::update_group)
                .delete(handlers::group::delete_group),
        )
        .route(
            "/groups/:id/assign_permissions",
            post(handlers::group::assign_permissions),
        )
        .route(
            "/groups/:id/remove_permissions",
            post(handlers::group::remove_permissions),
        )
        .route("/permissions", get(handlers::permission::list_permissions))
        .route("/permissions/:id", get(handlers::permission::get_permission))
        .route(
            "/permissions/:id/assign_to_group",
            post(handlers::permission::assign_to_group),
        )
        .route(
            "/permissions/:id/remove_from_group",
            post(handlers::permission::remove_from_group),
        )
        // Resolves the caller for every route; handlers decide what it may do.
        .layer(from_fn_with_state(state.clone(), actor_middleware))
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    account_id = tracing::field::Empty,
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config));

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "A backend is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        ServiceError::from(e)
    })?;

    state.blacklist.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Redis health check failed");
        AppError::InternalError(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up",
            "redis": "up"
        }
    })))
}
