//! The operator surface: login with short-lived signed tokens, credential
//! CRUD, and usage reporting.

use std::sync::Arc;

use chrono::{Duration, Utc};

use super::{wrap, ApiError, App};
use gateway_sql::{admin_users, api_keys, request_logs, Tier};

/// Claims encoded within admin access tokens.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct AccessTokenClaims {
    sub: String,
    iat: u64,
    exp: u64,
}

/// The authenticated operator, attached by the `authorize` middleware.
#[derive(Debug, Clone)]
pub(crate) struct AdminContext {
    pub username: String,
}

// Middleware which validates admin tokens before proceeding. The principal
// must still exist and be active: revoking an admin revokes their tokens.
pub(crate) async fn authorize(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    bearer: Option<
        axum_extra::TypedHeader<
            axum_extra::headers::Authorization<axum_extra::headers::authorization::Bearer>,
        >,
    >,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    let Some(axum_extra::TypedHeader(bearer)) = bearer else {
        return Err(ApiError::AdminAuth("Not authenticated."));
    };

    let token = jsonwebtoken::decode::<AccessTokenClaims>(
        bearer.token(),
        &app.jwt_decoder,
        &jsonwebtoken::Validation::default(),
    )
    .map_err(|_| ApiError::AdminAuth("Invalid authentication credentials."))?;

    let Some(admin) = admin_users::fetch_active(&token.claims.sub, &app.pool).await? else {
        return Err(ApiError::AdminAuth("Invalid authentication credentials."));
    };

    req.extensions_mut().insert(AdminContext {
        username: admin.username,
    });
    Ok(next.run(req).await)
}

#[derive(Debug, serde::Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, serde::Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

pub(crate) async fn login(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Json(request): axum::Json<LoginRequest>,
) -> axum::response::Response {
    wrap(do_login(&app, request)).await
}

#[tracing::instrument(
    skip(app, request),
    fields(username = %request.username),
    err(level = tracing::Level::WARN)
)]
async fn do_login(app: &App, request: LoginRequest) -> Result<TokenResponse, ApiError> {
    let Some(admin) = admin_users::fetch_active(&request.username, &app.pool).await? else {
        return Err(ApiError::AdminAuth("Incorrect username or password."));
    };

    // bcrypt verification is CPU-bound; keep it off the request workers.
    let password = request.password;
    let hashed = admin.hashed_password.clone();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(&password, &hashed))
        .await
        .map_err(anyhow::Error::from)?
        .map_err(anyhow::Error::from)?;
    if !verified {
        return Err(ApiError::AdminAuth("Incorrect username or password."));
    }

    admin_users::update_last_login(admin.id, &app.pool).await?;

    let issued_at = jsonwebtoken::get_current_timestamp();
    let claims = AccessTokenClaims {
        sub: admin.username,
        iat: issued_at,
        exp: issued_at + app.token_ttl_minutes as u64 * 60,
    };
    let access_token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &app.jwt_encoder,
    )
    .map_err(anyhow::Error::from)?;

    Ok(TokenResponse {
        access_token,
        token_type: "bearer",
    })
}

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub(crate) async fn list_keys(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Query(query): axum::extract::Query<ListQuery>,
) -> axum::response::Response {
    wrap(async move { Ok(api_keys::list(query.skip, query.limit, &app.pool).await?) }).await
}

#[derive(Debug, serde::Deserialize)]
pub struct CreateKeyRequest {
    pub user_id: String,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

fn default_tier() -> Tier {
    Tier::Standard
}

pub(crate) async fn create_key(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(admin): axum::Extension<AdminContext>,
    axum::Json(request): axum::Json<CreateKeyRequest>,
) -> axum::response::Response {
    wrap(async move {
        let secret = super::issuance::generate_secret();
        let expires_at = request
            .expires_in_days
            .map(|days| Utc::now() + Duration::days(days));
        Ok(api_keys::create(
            &secret,
            &request.user_id,
            request.tier,
            request.description.as_deref(),
            Some(&admin.username),
            expires_at,
            &app.pool,
        )
        .await?)
    })
    .await
}

#[derive(Debug, serde::Deserialize)]
pub struct UpdateKeyRequest {
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
}

pub(crate) async fn update_key(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Path(id): axum::extract::Path<i64>,
    axum::Json(request): axum::Json<UpdateKeyRequest>,
) -> axum::response::Response {
    wrap(async move {
        api_keys::update(
            id,
            request.tier,
            request.is_active,
            request.description.as_deref(),
            &app.pool,
        )
        .await?
        .ok_or(ApiError::NotFound("API key"))
    })
    .await
}

pub(crate) async fn delete_key(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Path(id): axum::extract::Path<i64>,
) -> axum::response::Response {
    wrap(async move {
        if api_keys::soft_delete(id, &app.pool).await? {
            Ok(serde_json::json!({ "message": "API key deleted successfully" }))
        } else {
            Err(ApiError::NotFound("API key"))
        }
    })
    .await
}

#[derive(Debug, serde::Deserialize)]
pub struct UsageQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    7
}

pub(crate) async fn usage(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Query(query): axum::extract::Query<UsageQuery>,
) -> axum::response::Response {
    wrap(async move {
        Ok(request_logs::usage_stats(query.user_id.as_deref(), query.days, &app.pool).await?)
    })
    .await
}

#[cfg(test)]
mod test {
    use super::AccessTokenClaims;

    #[test]
    fn access_tokens_round_trip_and_expire() {
        let encoder = jsonwebtoken::EncodingKey::from_secret(b"test-secret");
        let decoder = jsonwebtoken::DecodingKey::from_secret(b"test-secret");
        let now = jsonwebtoken::get_current_timestamp();

        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &AccessTokenClaims { sub: "admin".to_string(), iat: now, exp: now + 3600 },
            &encoder,
        )
        .unwrap();
        let decoded = jsonwebtoken::decode::<AccessTokenClaims>(
            &token,
            &decoder,
            &jsonwebtoken::Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, "admin");

        // Stale beyond the default leeway: rejected.
        let stale = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &AccessTokenClaims { sub: "admin".to_string(), iat: now - 7200, exp: now - 3600 },
            &encoder,
        )
        .unwrap();
        jsonwebtoken::decode::<AccessTokenClaims>(
            &stale,
            &decoder,
            &jsonwebtoken::Validation::default(),
        )
        .unwrap_err();

        // A token signed under a different secret is rejected outright.
        let forged = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &AccessTokenClaims { sub: "admin".to_string(), iat: now, exp: now + 3600 },
            &jsonwebtoken::EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();
        jsonwebtoken::decode::<AccessTokenClaims>(
            &forged,
            &decoder,
            &jsonwebtoken::Validation::default(),
        )
        .unwrap_err();
    }
}
