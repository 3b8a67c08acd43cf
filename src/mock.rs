//! Mock transport for testing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::transport::{GraphqlError, Transport, Variables};

type Responder =
    Box<dyn Fn(&str, Option<&Variables>) -> Result<Option<Value>, GraphqlError> + Send + Sync>;

/// One request observed by [`MockTransport`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub query: String,
    pub variables: Option<Variables>,
    pub bearer_token: Option<String>,
}

/// Scripted transport.
///
/// Answers every request through a responder closure after an optional
/// latency, and records what it was asked.
pub struct MockTransport {
    responder: Responder,
    latency: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicU32,
}

impl MockTransport {
    /// Create a transport answering with `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, Option<&Variables>) -> Result<Option<Value>, GraphqlError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Box::new(responder),
            latency: None,
            calls: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Delay every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Total number of requests received.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Number of requests whose document mentions `operation`.
    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.query.contains(operation))
            .count()
    }

    /// Every request received so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        query: &str,
        variables: Option<Variables>,
        bearer_token: Option<&str>,
    ) -> Result<Option<Value>, GraphqlError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                query: query.to_string(),
                variables: variables.clone(),
                bearer_token: bearer_token.map(str::to_string),
            });
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        (self.responder)(query, variables.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let transport = MockTransport::new(|query, _| {
            if query.contains("fail") {
                Err(GraphqlError::Application("nope".into()))
            } else {
                Ok(Some(json!({"ok": true})))
            }
        });

        assert_eq!(transport.call_count(), 0);
        let data = transport.send("{ ok }", None, Some("t")).await.unwrap();
        assert_eq!(data, Some(json!({"ok": true})));
        assert!(transport.send("{ fail }", None, None).await.is_err());

        assert_eq!(transport.call_count(), 2);
        assert_eq!(transport.calls_to("fail"), 1);
        let calls = transport.calls();
        assert_eq!(calls[0].bearer_token.as_deref(), Some("t"));
        assert_eq!(calls[1].bearer_token, None);
    }
}
