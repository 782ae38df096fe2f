//! The edge error taxonomy and its single HTTP funnel. Handlers return
//! `Result<T, ApiError>`; every failure renders as a status plus a JSON
//! `{"detail": ...}` body. Upstream and database failures are mapped here,
//! never surfaced as stack traces.

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;

use crate::rate_limiter::{Rejection, Window};
use crate::upstream::ForwardError;
use gateway_sql::Tier;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing API key. Please provide a valid API key in the Authorization header.")]
    AuthMissing,
    /// Unknown, deactivated, or expired credential; the detail says which.
    #[error("{0}")]
    AuthInvalid(&'static str),
    #[error("{0}")]
    AdminAuth(&'static str),
    #[error("Invalid email address.")]
    InvalidEmail,
    #[error("Email domain is not allowed.")]
    DomainNotAllowed,
    #[error("Invalid or expired verification code.")]
    InvalidOrExpiredCode,
    #[error("Rate limit exceeded. Maximum {limit} requests per {window} allowed for tier '{tier}'.")]
    RateLimitExceeded {
        tier: Tier,
        window: Window,
        limit: usize,
        retry_after: u64,
    },
    #[error("Request timeout.")]
    UpstreamTimeout,
    #[error("Upstream request failed.")]
    UpstreamError,
    #[error("Failed to send verification email.")]
    EmailSendFailed,
    #[error("{0} not found.")]
    NotFound(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthMissing | ApiError::AuthInvalid(_) | ApiError::AdminAuth(_) => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::InvalidEmail
            | ApiError::DomainNotAllowed
            | ApiError::InvalidOrExpiredCode => StatusCode::BAD_REQUEST,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::UpstreamError | ApiError::EmailSendFailed | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        let Rejection { tier, window, limit, retry_after } = rejection;
        ApiError::RateLimitExceeded { tier, window, limit, retry_after }
    }
}

impl From<ForwardError> for ApiError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::Timeout => ApiError::UpstreamTimeout,
            ForwardError::Transport(detail) => {
                tracing::warn!(%detail, "upstream transport failure");
                ApiError::UpstreamError
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        tracing::error!(?error, "API responding with database error");
        ApiError::Internal(anyhow::anyhow!("database error, please retry the request"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();

        // 500-class details stay short and human: sources are for the log.
        let detail = match &self {
            ApiError::Internal(error) => {
                tracing::error!(?error, "API responding with internal error");
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        };

        let body = axum::Json(serde_json::json!({ "detail": detail }));
        let mut response = (status, body).into_response();

        match &self {
            ApiError::AuthMissing | ApiError::AuthInvalid(_) => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, "Bearer".parse().unwrap());
            }
            ApiError::RateLimitExceeded { retry_after, .. } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, retry_after.to_string().parse().unwrap());
            }
            _ => (),
        }
        response
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(ApiError::AuthMissing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::AuthInvalid("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::DomainNotAllowed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::UpstreamTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ApiError::UpstreamError.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::NotFound("API key").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    }

    #[test]
    fn rate_limit_response_carries_retry_after() {
        let err = ApiError::RateLimitExceeded {
            tier: Tier::Standard,
            window: Window::Minute,
            limit: 30,
            retry_after: 31,
        };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded. Maximum 30 requests per minute allowed for tier 'standard'.",
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "31");
    }
}
