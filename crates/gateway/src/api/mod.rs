//! The HTTP planes: the edge plane (proxy + self-service issuance) and the
//! admin plane (credential management), built over one shared `App`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get, post, put};

use crate::emails::EmailSender;
use crate::rate_limiter::RateLimiter;
use crate::upstream::UpstreamClient;

mod admin;
mod auth;
mod error;
mod health;
mod issuance;
mod proxy;

pub use auth::ApiKeyInfo;
pub use error::ApiError;

/// Process-wide state shared by every handler.
pub struct App {
    pub(crate) pool: sqlx::SqlitePool,
    pub(crate) limiter: RateLimiter,
    pub(crate) upstream: UpstreamClient,
    pub(crate) emails: Arc<dyn EmailSender>,
    pub(crate) jwt_encoder: jsonwebtoken::EncodingKey,
    pub(crate) jwt_decoder: jsonwebtoken::DecodingKey,
    pub(crate) token_ttl_minutes: i64,
    pub(crate) allowed_email_domains: Vec<String>,
    pub(crate) code_ttl_minutes: i64,
    pub(crate) admin_health_url: String,
}

impl App {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: sqlx::SqlitePool,
        limiter: RateLimiter,
        upstream: UpstreamClient,
        emails: Arc<dyn EmailSender>,
        admin_secret: &str,
        token_ttl_minutes: i64,
        allowed_email_domains: Vec<String>,
        code_ttl_minutes: i64,
        admin_health_url: String,
    ) -> Self {
        Self {
            pool,
            limiter,
            upstream,
            emails,
            jwt_encoder: jsonwebtoken::EncodingKey::from_secret(admin_secret.as_bytes()),
            jwt_decoder: jsonwebtoken::DecodingKey::from_secret(admin_secret.as_bytes()),
            token_ttl_minutes,
            allowed_email_domains,
            code_ttl_minutes,
            admin_health_url,
        }
    }
}

/// Build the edge and admin routers. The admin API is served on its own
/// listener and also mounted under `/admin/` on the edge, which stands in for
/// the separate-origin reverse proxy hop.
pub fn build_routers(
    app: Arc<App>,
    allow_origin: &[String],
) -> anyhow::Result<(axum::Router, axum::Router)> {
    let cors = cors_layer(allow_origin)?;

    let auth_routes = axum::Router::new()
        .route("/request-code", post(issuance::request_code))
        .route("/verify-code", post(issuance::verify_code))
        .route("/my-keys", get(issuance::my_keys));

    let admin_api = axum::Router::new()
        .route("/keys", get(admin::list_keys).post(admin::create_key))
        .route("/keys/:id", put(admin::update_key).delete(admin::delete_key))
        .route("/usage", get(admin::usage))
        .route_layer(axum::middleware::from_fn_with_state(
            app.clone(),
            admin::authorize,
        ))
        .route("/login", post(admin::login));

    let admin_plane = axum::Router::new()
        .route("/health", get(health::admin_health))
        .nest("/api", admin_api)
        .nest("/auth", auth_routes.clone());

    let edge = axum::Router::new()
        .route("/", get(root))
        .route("/health", get(health::health))
        .route(
            "/v1/*path",
            any(proxy::forward_v1).route_layer(axum::middleware::from_fn_with_state(
                app.clone(),
                auth::authenticate,
            )),
        )
        .nest("/auth", auth_routes)
        .nest("/admin", admin_plane.clone());

    let edge = edge
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors.clone())
        .layer(axum::middleware::from_fn(process_time))
        .with_state(app.clone());

    let admin_plane = admin_plane
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(process_time))
        .with_state(app);

    Ok((edge, admin_plane))
}

fn cors_layer(allow_origin: &[String]) -> anyhow::Result<tower_http::cors::CorsLayer> {
    let allow_headers = ["Authorization", "Content-Type"]
        .into_iter()
        .map(|h| h.parse().unwrap())
        .collect::<Vec<_>>();

    let cors = tower_http::cors::CorsLayer::new()
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(allow_headers);

    if allow_origin.iter().any(|origin| origin == "*") {
        Ok(cors.allow_origin(tower_http::cors::AllowOrigin::any()))
    } else {
        let allow_origin = allow_origin
            .iter()
            .map(|origin| origin.parse())
            .collect::<Result<Vec<_>, _>>()
            .context("failed to parse allowed origins")?;
        Ok(cors.allow_origin(tower_http::cors::AllowOrigin::list(allow_origin)))
    }
}

/// Stamp `X-Process-Time` (milliseconds, two decimals) on every response.
async fn process_time(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let started = std::time::Instant::now();
    let mut response = next.run(req).await;

    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
    if let Ok(value) = format!("{elapsed_ms:.2}").parse() {
        response.headers_mut().insert("x-process-time", value);
    }
    response
}

async fn root() -> axum::response::Response {
    axum::Json(serde_json::json!({
        "service": "LLM API Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "llm_api": "/v1/*",
            "self_service_auth": "/auth/*",
            "admin_api": "/admin/api/*",
        },
    }))
    .into_response()
}

// Render a handler future's output through the error funnel.
async fn wrap<F, T>(fut: F) -> axum::response::Response
where
    T: serde::Serialize,
    F: std::future::Future<Output = Result<T, ApiError>>,
{
    match fut.await {
        Ok(inner) => (StatusCode::OK, axum::Json(inner)).into_response(),
        Err(err) => err.into_response(),
    }
}
