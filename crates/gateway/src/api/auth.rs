//! Bearer-credential authentication for the proxied `/v1/*` surface.

use std::sync::Arc;

use super::{ApiError, App};
use gateway_sql::Tier;

/// The authenticated credential, carried through the pipeline stages as a
/// request extension.
#[derive(Debug, Clone)]
pub struct ApiKeyInfo {
    pub key_id: i64,
    pub key: String,
    pub user_id: String,
    pub tier: Tier,
}

// Middleware which resolves the bearer credential before proceeding, and
// attaches the verified ApiKeyInfo. An unknown, deactivated, or expired
// credential never reaches the limiter or the upstream.
pub(crate) async fn authenticate(
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
        return Err(ApiError::AuthMissing);
    };

    let Some(key) = gateway_sql::api_keys::fetch_by_secret(bearer.token(), &app.pool).await?
    else {
        return Err(ApiError::AuthInvalid(
            "Invalid API key. Please check your credentials.",
        ));
    };

    if !key.is_active {
        return Err(ApiError::AuthInvalid("API key has been deactivated."));
    }
    if key.expires_at.is_some_and(|expires| expires <= chrono::Utc::now()) {
        return Err(ApiError::AuthInvalid("API key has expired."));
    }

    req.extensions_mut().insert(ApiKeyInfo {
        key_id: key.id,
        key: key.key,
        user_id: key.user_id,
        tier: key.tier,
    });
    Ok(next.run(req).await)
}
