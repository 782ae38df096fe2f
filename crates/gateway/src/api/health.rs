use std::sync::Arc;

use super::App;

/// Edge health: the gateway itself, the upstream inference server, and the
/// admin plane. Degrades (but stays 200) when either downstream probe fails.
pub(crate) async fn health(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> axum::Json<serde_json::Value> {
    let (upstream_ok, admin_ok) = tokio::join!(
        app.upstream.probe_upstream(),
        app.upstream.probe_url(&app.admin_health_url),
    );

    axum::Json(serde_json::json!({
        "status": if upstream_ok && admin_ok { "healthy" } else { "degraded" },
        "services": {
            "gateway": "healthy",
            "upstream": if upstream_ok { "healthy" } else { "unhealthy" },
            "admin": if admin_ok { "healthy" } else { "unhealthy" },
        },
    }))
}

pub(crate) async fn admin_health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "healthy", "service": "admin" }))
}
