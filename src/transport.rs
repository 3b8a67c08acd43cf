//! GraphQL Transport Module
//!
//! One request/response cycle against the single GraphQL endpoint.
//! Failures are classified so callers can tell a dead network from a
//! garbled body from a server-side rejection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Longest slice of a raw response body carried in an error message.
const BODY_PREVIEW_CHARS: usize = 300;

/// Message used when the server reports an error without text.
const FALLBACK_ERROR_MESSAGE: &str = "fetching error";

/// Variables of a GraphQL operation
pub type Variables = serde_json::Map<String, Value>;

/// Classified GraphQL failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphqlError {
    /// Network failure or non-2xx HTTP status
    #[error("{0}")]
    Transport(String),

    /// Body was not JSON, or data did not have the expected shape
    #[error("{0}")]
    Protocol(String),

    /// Server answered with a non-empty `errors` array
    #[error("{0}")]
    Application(String),
}

/// Executes GraphQL documents against one endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `query` with optional variables and bearer token.
    ///
    /// Returns the response's `data` field, which may be absent.
    async fn send(
        &self,
        query: &str,
        variables: Option<Variables>,
        bearer_token: Option<&str>,
    ) -> Result<Option<Value>, GraphqlError>;
}

#[derive(Serialize)]
struct RequestBody<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a Variables>,
}

#[derive(Deserialize)]
struct ResponseBody {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<ResponseError>>,
}

#[derive(Deserialize)]
struct ResponseError {
    #[serde(default)]
    message: Option<String>,
}

/// reqwest-backed transport
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for `endpoint` with a per-request timeout.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, GraphqlError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| GraphqlError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }

    /// The endpoint this transport posts to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        query: &str,
        variables: Option<Variables>,
        bearer_token: Option<&str>,
    ) -> Result<Option<Value>, GraphqlError> {
        let body = serde_json::to_vec(&RequestBody {
            query,
            variables: variables.as_ref(),
        })
        .map_err(|e| GraphqlError::Protocol(format!("Unserializable variables: {e}")))?;

        let mut request = self.client.post(&self.endpoint).body(body);
        if let Some(token) = bearer_token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        debug!(
            authenticated = bearer_token.is_some(),
            "Sending GraphQL request to {}", self.endpoint
        );

        let response = request
            .send()
            .await
            .map_err(|e| GraphqlError::Transport(format!("Network error: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GraphqlError::Transport(format!("Network error: {e}")))?;

        if !status.is_success() {
            warn!("GraphQL endpoint answered HTTP {}", status.as_u16());
            return Err(GraphqlError::Transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body_preview(&text)
            )));
        }

        parse_response(&text)
    }
}

/// Classify a 2xx response body.
pub fn parse_response(text: &str) -> Result<Option<Value>, GraphqlError> {
    let body: ResponseBody = serde_json::from_str(text).map_err(|_| {
        GraphqlError::Protocol(format!("Non-JSON response: {}", body_preview(text)))
    })?;

    if let Some(first) = body.errors.as_ref().and_then(|errors| errors.first()) {
        let message = first
            .message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(FALLBACK_ERROR_MESSAGE);
        return Err(GraphqlError::Application(message.to_string()));
    }

    Ok(body.data.filter(|data| !data.is_null()))
}

/// Deserialize `data` into the operation's typed result.
pub fn decode_data<T: DeserializeOwned>(data: Option<Value>) -> Result<T, GraphqlError> {
    let data = data.ok_or_else(|| GraphqlError::Protocol("Response carried no data".into()))?;
    serde_json::from_value(data)
        .map_err(|e| GraphqlError::Protocol(format!("Unexpected data shape: {e}")))
}

fn body_preview(text: &str) -> &str {
    match text.char_indices().nth(BODY_PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Build a variables map from `(name, value)` pairs.
pub fn variables<I, K>(pairs: I) -> Variables
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
