use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use telepresence_backend::{
    config::Config,
    db::connection::create_pool,
    docs::ApiDoc,
    handlers,
    middleware::{self, create_ip_rate_limiter},
    ratelimit::RateLimiter,
    repositories::{NotificationRepository, ProfileRepository, SessionRepository},
    services::{audit_log::AuditLogService, presence::PresenceService},
    state::AppState,
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.cors_allow_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .cors_allow_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(24 * 60 * 60))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telepresence_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        database_url = %config.database_url,
        jwt_secret = %mask_secret(&config.jwt_secret),
        time_zone = %config.time_zone,
        heartbeat_ceiling = config.heartbeat_max_increment_seconds,
        "Loaded configuration from environment/.env"
    );

    // Initialize database
    let pool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // Wire the presence service onto its collaborators
    let presence = Arc::new(PresenceService::new(
        Arc::new(SessionRepository::new()),
        Arc::new(ProfileRepository::new()),
        Arc::new(NotificationRepository::new()),
        Arc::new(AuditLogService::new()),
        config.time_zone,
        config.heartbeat_max_increment_seconds,
    ));
    let rate_limiter = Arc::new(RateLimiter::new());
    let state = AppState::new(pool, config.clone(), rate_limiter, presence);

    // Presence routes, all behind bearer authentication
    let presence_routes = Router::new()
        .route("/api/presence/check-in", post(handlers::presence::check_in))
        .route("/api/presence/heartbeat", post(handlers::presence::heartbeat))
        .route("/api/presence/status", put(handlers::presence::update_status))
        .route("/api/presence/check-out", post(handlers::presence::check_out))
        .route(
            "/api/presence/force-check-out",
            post(handlers::presence::force_check_out),
        )
        .route("/api/presence/me", get(handlers::presence::current_session))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    // Compose app with shared layers and shared state
    let app = Router::new()
        .merge(presence_routes)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(middleware::request_id))
                .layer(cors_layer(&config)),
        )
        .layer(create_ip_rate_limiter(&config))
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
