//! HTTP transport used to reach the query endpoint.
use bytes::Bytes;
use http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[cfg(feature = "reqwest")]
use crate::config::{ConfigError, GrafanaConfig};

/// A request to be sent by a [`QueryTransport`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct FetchRequest {
    /// The URL or path to request, e.g. `/api/ds/query`.
    pub url: String,
    /// The HTTP method.
    pub method: Method,
    /// The JSON body, if any.
    pub data: Option<Value>,
}

impl FetchRequest {
    /// Create a `POST` request carrying `data` as its JSON body.
    pub fn post(url: impl Into<String>, data: Value) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
            data: Some(data),
        }
    }
}

/// The raw response returned by a [`QueryTransport`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct FetchResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The raw response body.
    pub body: Bytes,
}

impl FetchResponse {
    /// Create a new response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Create a `200 OK` response with a JSON body.
    pub fn json(value: &Value) -> Self {
        Self::new(StatusCode::OK, value.to_string())
    }

    /// Extract a human readable error message from a failed response.
    ///
    /// Grafana puts these in a `message` (or sometimes `error`) property; anything else
    /// falls back to the body itself, or the status' canonical reason if the body is empty.
    pub fn error_message(&self) -> String {
        #[derive(Deserialize)]
        struct ErrorBody {
            message: Option<String>,
            error: Option<String>,
        }

        serde_json::from_slice::<ErrorBody>(&self.body)
            .ok()
            .and_then(|b| b.message.or(b.error))
            .filter(|m| !m.is_empty())
            .or_else(|| {
                let body = String::from_utf8_lossy(&self.body).trim().to_string();
                (!body.is_empty()).then_some(body)
            })
            .unwrap_or_else(|| {
                self.status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            })
    }
}

/// Errors raised while delivering a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The underlying HTTP client failed.
    #[cfg(feature = "reqwest")]
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// Any other error raised by a custom transport.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Wrap an arbitrary error raised by a custom [`QueryTransport`].
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(error.into())
    }
}

/// Sends HTTP requests on behalf of the adapter.
///
/// The transport is responsible for delivering the request and returning whatever
/// came back; interpreting status codes is left to the caller. No retries,
/// timeouts or cancellation are expected.
#[async_trait::async_trait]
pub trait QueryTransport: Send + Sync {
    /// Send `request`, returning the raw response.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// A [`QueryTransport`] backed by a [`reqwest::Client`].
///
/// Paths are resolved against a base URL, usually the URL of the Grafana instance.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[cfg(feature = "reqwest")]
impl ReqwestTransport {
    /// Create a transport sending requests relative to `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: None,
        }
    }

    /// Create a transport for the Grafana instance described by `config`.
    ///
    /// The plugin's service account token, if Grafana provided one, is sent as a bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if Grafana did not provide its URL.
    pub fn from_config(config: &GrafanaConfig) -> Result<Self, ConfigError> {
        let mut transport = Self::new(config.app_url()?.clone());
        transport.token = config.plugin_app_client_secret().ok().cloned();
        Ok(transport)
    }

    /// Use the given client instead of a default one.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Send the given token as a bearer token with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url_for(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        }
    }
}

#[cfg(feature = "reqwest")]
impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(feature = "reqwest")]
#[async_trait::async_trait]
impl QueryTransport for ReqwestTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let url = self.url_for(&request.url);
        tracing::debug!(method = %request.method, url = %url, "Sending request");
        let mut builder = self.client.request(request.method, url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(data) = &request.data {
            builder = builder.json(data);
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok(FetchResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn error_message_prefers_message_property() {
        let response = FetchResponse::new(
            StatusCode::BAD_REQUEST,
            json!({"message": "bad query", "error": "ignored"}).to_string(),
        );
        assert_eq!(response.error_message(), "bad query");

        let response =
            FetchResponse::new(StatusCode::BAD_REQUEST, json!({"error": "boom"}).to_string());
        assert_eq!(response.error_message(), "boom");
    }

    #[test]
    fn error_message_falls_back_to_body_then_reason() {
        let response = FetchResponse::new(StatusCode::BAD_GATEWAY, "upstream timed out\n");
        assert_eq!(response.error_message(), "upstream timed out");

        let response = FetchResponse::new(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(response.error_message(), "Service Unavailable");
    }

    #[cfg(feature = "reqwest")]
    #[test]
    fn joins_paths_onto_base_url() {
        let transport = ReqwestTransport::new("http://grafana:3000/");
        assert_eq!(
            transport.url_for("/api/ds/query"),
            "http://grafana:3000/api/ds/query"
        );
        assert_eq!(
            transport.url_for("https://elsewhere/x"),
            "https://elsewhere/x"
        );
        let transport = transport.with_token("secret");
        assert!(!format!("{transport:?}").contains("secret"));
    }
}
