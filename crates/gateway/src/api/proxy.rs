//! The proxied `/v1/*` pipeline: admit under tier limits, forward to the
//! upstream, account token usage, and respond verbatim with rate-limit
//! headers. Authentication already ran as route middleware.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;

use super::{ApiError, ApiKeyInfo, App};
use crate::rate_limiter::RateLimitStatus;
use crate::upstream::UpstreamResponse;
use gateway_sql::request_logs::NewRequestLog;

/// Error snippets in request logs are capped at 500 bytes.
const ERROR_SNIPPET_MAX: usize = 500;

pub(crate) async fn forward_v1(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Path(path): axum::extract::Path<String>,
    axum::Extension(key): axum::Extension<ApiKeyInfo>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let started = Instant::now();
    let endpoint = format!("v1/{path}");

    // Admit under tier limits. A refusal never reaches the upstream, and is
    // not recorded as an arrival.
    let admitted = match app.limiter.admit(&key.user_id, key.tier) {
        Ok(status) => status,
        Err(rejection) => {
            let err = ApiError::from(rejection);
            write_log(&app, &key, &endpoint, &method, 429, started, (0, 0), None, Some(err.to_string()));

            let status = app.limiter.status(&key.user_id, key.tier);
            let mut response = err.into_response();
            apply_rate_limit_headers(response.headers_mut(), status);
            return response;
        }
    };

    // Forward the method, raw body, and Content-Type; nothing else.
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let forwarded = app
        .upstream
        .forward(&method, &endpoint, content_type, body)
        .await;

    let upstream = match forwarded {
        Ok(upstream) if upstream.status >= 400 && is_models_listing(&method, &path) => {
            synthesized_listing(&app)
        }
        Ok(upstream) => upstream,
        Err(_) if is_models_listing(&method, &path) => synthesized_listing(&app),
        Err(err) => {
            let snippet = snip(&err.to_string());
            let err = ApiError::from(err);
            let status_code = err.status().as_u16();
            write_log(&app, &key, &endpoint, &method, status_code, started, (0, 0), None, Some(snippet));

            let mut response = err.into_response();
            apply_rate_limit_headers(response.headers_mut(), admitted);
            return response;
        }
    };

    // Account token usage from a successful JSON body; anything else counts
    // as zeros and never fails the request.
    let (prompt_tokens, completion_tokens, model) = if upstream.status == 200 {
        parse_usage(&upstream.body)
    } else {
        (0, 0, None)
    };
    let error = (upstream.status != 200).then(|| snip(&String::from_utf8_lossy(&upstream.body)));

    write_log(
        &app,
        &key,
        &endpoint,
        &method,
        upstream.status,
        started,
        (prompt_tokens, completion_tokens),
        model,
        error,
    );

    // Body, status, and Content-Type pass through verbatim.
    let mut builder = axum::http::Response::builder()
        .status(StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY));
    if let Some(content_type) = &upstream.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type.as_str());
    }
    let mut response = match builder.body(axum::body::Body::from(upstream.body)) {
        Ok(response) => response,
        Err(error) => return ApiError::Internal(anyhow::anyhow!(error)).into_response(),
    };
    apply_rate_limit_headers(response.headers_mut(), admitted);
    response
}

fn is_models_listing(method: &Method, path: &str) -> bool {
    *method == Method::GET && path == "models"
}

/// The model listing served in place of an unreachable or failing upstream.
fn synthesized_listing(app: &App) -> UpstreamResponse {
    UpstreamResponse {
        status: 200,
        content_type: Some("application/json".to_string()),
        body: Bytes::from(app.upstream.synthesized_models().to_string()),
    }
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, status: RateLimitStatus) {
    for (name, value) in [
        ("x-ratelimit-limit-minute", status.minute_limit),
        ("x-ratelimit-remaining-minute", status.minute_remaining),
        ("x-ratelimit-limit-hour", status.hour_limit),
        ("x-ratelimit-remaining-hour", status.hour_remaining),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(name, value);
        }
    }
}

/// Extract `usage` token counts and the model identifier from an upstream
/// body. Missing fields default to zero; an unparseable body accounts as
/// zeros.
fn parse_usage(body: &[u8]) -> (i64, i64, Option<String>) {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return (0, 0, None);
    };
    let model = value
        .get("model")
        .and_then(|model| model.as_str())
        .map(str::to_string);

    let Some(usage) = value.get("usage") else {
        return (0, 0, model);
    };
    let prompt = usage
        .get("prompt_tokens")
        .and_then(|tokens| tokens.as_i64())
        .unwrap_or(0);
    let completion = usage
        .get("completion_tokens")
        .and_then(|tokens| tokens.as_i64())
        .unwrap_or(0);
    (prompt, completion, model)
}

/// Issue the request-log row. The write runs concurrently with the response
/// flush: the response is authoritative for the client whether or not the
/// row lands.
#[allow(clippy::too_many_arguments)]
fn write_log(
    app: &Arc<App>,
    key: &ApiKeyInfo,
    endpoint: &str,
    method: &Method,
    status_code: u16,
    started: Instant,
    (prompt_tokens, completion_tokens): (i64, i64),
    model: Option<String>,
    error: Option<String>,
) {
    let pool = app.pool.clone();
    let user_id = key.user_id.clone();
    let api_key_id = key.key_id;
    let endpoint = endpoint.to_string();
    let method = method.as_str().to_string();
    let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;

    tokio::spawn(async move {
        let log = NewRequestLog {
            user_id: &user_id,
            api_key_id: Some(api_key_id),
            endpoint: &endpoint,
            method: &method,
            status_code,
            duration_ms,
            prompt_tokens,
            completion_tokens,
            model: model.as_deref(),
            error: error.as_deref(),
        };
        if let Err(error) = gateway_sql::request_logs::create(log, &pool).await {
            tracing::error!(?error, "failed to write request log");
        }
    });
}

fn snip(detail: &str) -> String {
    if detail.len() <= ERROR_SNIPPET_MAX {
        return detail.to_string();
    }
    let mut end = ERROR_SNIPPET_MAX;
    while !detail.is_char_boundary(end) {
        end -= 1;
    }
    detail[..end].to_string()
}
