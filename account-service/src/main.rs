use account_service::{
    build_router,
    config::AccountConfig,
    db,
    services::{
        AccountService, AccountStore, AuthorizationPolicy, CredentialService, EmailProvider,
        EmailService, GoogleOAuthClient, GroupService, IdentityReconciler, JwtService,
        OAuthProvider, PasswordPolicy, PgStore, RedisService, TokenBlacklist,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = AccountConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    account_service::services::metrics::init_metrics()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Metrics init failed: {}", e)))?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting account service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    let store: Arc<dyn AccountStore> = Arc::new(PgStore::new(pool));

    let blacklist: Arc<dyn TokenBlacklist> = Arc::new(RedisService::new(&config.redis).await?);
    tracing::info!("Redis service initialized");

    let email: Arc<dyn EmailProvider> = Arc::new(EmailService::new(&config.smtp)?);
    tracing::info!("Email service initialized");

    let jwt = JwtService::new(&config.jwt)?;
    tracing::info!("JWT service initialized");

    let provider: Option<Arc<dyn OAuthProvider>> = match &config.google {
        Some(google) => Some(Arc::new(GoogleOAuthClient::new(google)?)),
        None => {
            tracing::warn!("GOOGLE_CLIENT_ID not set; Google sign-in disabled");
            None
        }
    };

    let authz = AuthorizationPolicy::new(config.authz.manager_group.clone());

    let credentials = CredentialService::new(
        store.clone(),
        jwt.clone(),
        blacklist.clone(),
        email,
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
        provider,
        authz,
    );

    if let Some(admin) = &config.bootstrap_admin {
        credentials.ensure_admin(admin).await?;
    }

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let register_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.register_attempts,
        config.rate_limit.register_window_seconds,
    );
    let password_reset_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.password_reset_attempts,
        config.rate_limit.password_reset_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let addr = config.common.socket_addr()?;

    let state = AppState {
        config: config.clone(),
        store,
        jwt,
        blacklist,
        credentials,
        accounts,
        groups,
        reconciler,
        login_rate_limiter,
        register_rate_limiter,
        password_reset_rate_limiter,
        ip_rate_limiter,
    };
    let app = build_router(state).await?;

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
