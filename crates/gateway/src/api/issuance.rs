//! Self-service credential issuance: email in, one-time code out, code back
//! in, credential out. Codes reach the user only through the email seam, and
//! the flow never reveals whether an email is already registered.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use super::{wrap, ApiError, App};
use gateway_sql::{api_keys, verification_codes, Tier};

#[derive(Debug, serde::Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, serde::Serialize)]
pub struct IssuedKeyResponse {
    pub api_key: String,
    pub message: String,
}

pub(crate) async fn request_code(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    peer: Option<axum::extract::ConnectInfo<std::net::SocketAddr>>,
    axum::Json(request): axum::Json<EmailRequest>,
) -> axum::response::Response {
    let peer = peer.map(|axum::extract::ConnectInfo(addr)| addr.ip().to_string());
    wrap(do_request_code(&app, &request.email, peer)).await
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
async fn do_request_code(
    app: &App,
    email: &str,
    peer: Option<String>,
) -> Result<serde_json::Value, ApiError> {
    let email = normalize_email(email);
    check_domain(&app.allowed_email_domains, &email)?;

    let code = generate_code();
    let expires_at = Utc::now() + Duration::minutes(app.code_ttl_minutes);
    verification_codes::create(&email, &code, expires_at, peer.as_deref(), &app.pool).await?;

    if let Err(error) = app.emails.send_verification_code(&email, &code).await {
        // The code stays persisted: a later verify still works if the user
        // already saw it through some other channel.
        tracing::error!(?error, "failed to dispatch verification code");
        return Err(ApiError::EmailSendFailed);
    }

    // Shed expired codes opportunistically, off the request path.
    let pool = app.pool.clone();
    tokio::spawn(async move {
        match verification_codes::purge_expired(&pool).await {
            Ok(0) => (),
            Ok(purged) => tracing::debug!(purged, "purged expired verification codes"),
            Err(error) => tracing::warn!(?error, "failed to purge expired verification codes"),
        }
    });

    Ok(serde_json::json!({
        "message": "Verification code sent.",
        "expires_in_minutes": app.code_ttl_minutes,
    }))
}

pub(crate) async fn verify_code(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Json(request): axum::Json<VerifyCodeRequest>,
) -> axum::response::Response {
    wrap(do_verify_code(&app, &request.email, &request.code)).await
}

#[tracing::instrument(skip(app, code), err(level = tracing::Level::WARN))]
async fn do_verify_code(app: &App, email: &str, code: &str) -> Result<IssuedKeyResponse, ApiError> {
    let email = normalize_email(email);
    let code = code.trim();

    let Some(row) = verification_codes::fetch_redeemable(&email, code, &app.pool).await? else {
        return Err(ApiError::InvalidOrExpiredCode);
    };
    // Consume the code before minting, so an interrupted mint can't be
    // redriven with the same code.
    verification_codes::mark_used(row.id, &app.pool).await?;

    let existing = api_keys::fetch_by_user(&email, &app.pool).await?;
    if let Some(active) = existing.into_iter().find(|key| key.is_active) {
        return Ok(IssuedKeyResponse {
            api_key: active.key,
            message: "You already have an active API key.".to_string(),
        });
    }

    let secret = generate_secret();
    let minted = api_keys::create(
        &secret,
        &email,
        Tier::Standard,
        Some("self-service"),
        Some("self-service"),
        None,
        &app.pool,
    )
    .await?;

    Ok(IssuedKeyResponse {
        api_key: minted.key,
        message: "API key created successfully.".to_string(),
    })
}

#[derive(Debug, serde::Deserialize)]
pub struct MyKeysQuery {
    pub email: String,
}

/// One credential as shown to its (unverified) owner: the secret is masked,
/// since this listing is gated only by the domain allow-list.
#[derive(Debug, serde::Serialize)]
pub struct OwnedKey {
    pub id: i64,
    pub key: String,
    pub tier: Tier,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

pub(crate) async fn my_keys(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Query(query): axum::extract::Query<MyKeysQuery>,
) -> axum::response::Response {
    wrap(do_my_keys(&app, &query.email)).await
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
async fn do_my_keys(app: &App, email: &str) -> Result<Vec<OwnedKey>, ApiError> {
    let email = normalize_email(email);
    check_domain(&app.allowed_email_domains, &email)?;

    let keys = api_keys::fetch_by_user(&email, &app.pool).await?;
    Ok(keys
        .into_iter()
        .map(|key| OwnedKey {
            id: key.id,
            key: mask_secret(&key.key),
            tier: key.tier,
            is_active: key.is_active,
            created_at: key.created_at,
            expires_at: key.expires_at,
            description: key.description,
        })
        .collect())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Enforce the domain allow-list: an exact domain, or a dot-boundary
/// subdomain of one. An address without `@` is invalid outright.
fn check_domain(allowed: &[String], email: &str) -> Result<(), ApiError> {
    let Some((_, domain)) = email.rsplit_once('@') else {
        return Err(ApiError::InvalidEmail);
    };
    if allowed
        .iter()
        .any(|suffix| domain == suffix || domain.ends_with(&format!(".{suffix}")))
    {
        Ok(())
    } else {
        Err(ApiError::DomainNotAllowed)
    }
}

/// A uniformly random six-decimal-digit code, leading zeros preserved.
fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// A fresh credential secret: the well-known prefix plus 32 random bytes,
/// URL-safe base64 without padding.
pub(crate) fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes[..]);
    format!(
        "sk-internal-{}",
        base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
    )
}

fn mask_secret(secret: &str) -> String {
    match secret.char_indices().nth(16) {
        Some((boundary, _)) => format!("{}...", &secret[..boundary]),
        None => secret.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn emails_normalize_and_validate() {
        assert_eq!(normalize_email("  Alice@Company.COM "), "alice@company.com");

        let allowed = vec!["company.com".to_string(), "company.co.kr".to_string()];
        assert!(check_domain(&allowed, "alice@company.com").is_ok());
        assert!(check_domain(&allowed, "alice@mail.company.com").is_ok());
        assert!(check_domain(&allowed, "bob@company.co.kr").is_ok());

        assert!(matches!(
            check_domain(&allowed, "not-an-email"),
            Err(ApiError::InvalidEmail)
        ));
        assert!(matches!(
            check_domain(&allowed, "mallory@gmail.com"),
            Err(ApiError::DomainNotAllowed)
        ));
        // A suffix match must sit on a dot boundary.
        assert!(matches!(
            check_domain(&allowed, "mallory@evilcompany.com"),
            Err(ApiError::DomainNotAllowed)
        ));
    }

    #[test]
    fn codes_are_six_decimal_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn secrets_carry_the_prefix_and_entropy() {
        let secret = generate_secret();
        assert!(secret.starts_with("sk-internal-"));
        // 32 bytes of URL-safe base64 without padding is 43 characters.
        assert_eq!(secret.len(), "sk-internal-".len() + 43);
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn masked_secrets_keep_only_a_recognizable_prefix() {
        let masked = mask_secret("sk-internal-abcdefghijklmnop");
        assert_eq!(masked, "sk-internal-abcd...");
        assert_eq!(mask_secret("short"), "short");
    }
}
