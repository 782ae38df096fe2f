//! Shared HTTP client for the upstream OpenAI-compatible inference server.

use bytes::Bytes;

/// Upstream round-trips get a generous deadline: inference is slow.
const FORWARD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);
/// Health probes get a short one.
const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream request failed: {0}")]
    Transport(String),
}

/// What came back from the upstream, reduced to the parts we forward.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub struct UpstreamClient {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl UpstreamClient {
    pub fn new(base_url: &url::Url, default_model: String) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(FORWARD_TIMEOUT).build()?,
            probe_client: reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            default_model,
        })
    }

    /// Forward a request verbatim: method, raw body bytes, and Content-Type
    /// only. In particular the caller's Authorization header never crosses
    /// this boundary.
    pub async fn forward(
        &self,
        method: &axum::http::Method,
        path: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<UpstreamResponse, ForwardError> {
        let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|err| ForwardError::Transport(err.to_string()))?;

        let response = self
            .client
            .request(method, format!("{}/{path}", self.base_url))
            .header(
                reqwest::header::CONTENT_TYPE,
                content_type.unwrap_or("application/json"),
            )
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(classify)?;

        Ok(UpstreamResponse { status, content_type, body })
    }

    /// Probe upstream liveness: try `/health` first, then fall back to
    /// `/v1/models` for servers which don't expose a health route.
    pub async fn probe_upstream(&self) -> bool {
        for path in ["health", "v1/models"] {
            let probed = self
                .probe_client
                .get(format!("{}/{path}", self.base_url))
                .send()
                .await;
            if matches!(probed, Ok(response) if response.status().is_success()) {
                return true;
            }
        }
        false
    }

    /// Probe an arbitrary sibling service's health endpoint.
    pub async fn probe_url(&self, url: &str) -> bool {
        matches!(
            self.probe_client.get(url).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    /// The model listing served when the upstream can't produce one.
    pub fn synthesized_models(&self) -> serde_json::Value {
        serde_json::json!({
            "object": "list",
            "data": [{
                "id": self.default_model,
                "object": "model",
                "created": 0,
                "owned_by": "internal",
            }],
        })
    }
}

fn classify(err: reqwest::Error) -> ForwardError {
    if err.is_timeout() {
        ForwardError::Timeout
    } else {
        ForwardError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::UpstreamClient;

    #[test]
    fn synthesized_model_listing_shape() {
        let client = UpstreamClient::new(
            &"http://localhost:8001/".parse().unwrap(),
            "meta-llama/Llama-2-7b-chat-hf".to_string(),
        )
        .unwrap();

        let listing = client.synthesized_models();
        assert_eq!(listing["object"], "list");
        assert_eq!(listing["data"][0]["id"], "meta-llama/Llama-2-7b-chat-hf");
        assert_eq!(listing["data"][0]["owned_by"], "internal");
        assert_eq!(client.base_url, "http://localhost:8001");
    }
}
