//! Authenticated Call Facade
//!
//! Every business request asks the session for a usable access token first.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::auth::SessionManager;
use crate::transport::{decode_data, GraphqlError, Transport, Variables};

/// Issues GraphQL calls on behalf of the signed-in user
#[derive(Clone)]
pub struct AuthenticatedClient {
    session: SessionManager,
    transport: Arc<dyn Transport>,
}

impl AuthenticatedClient {
    pub fn new(session: SessionManager, transport: Arc<dyn Transport>) -> Self {
        Self { session, transport }
    }

    /// Send `query`, attaching a bearer token when the session has one.
    ///
    /// Without a token the request still goes out; the server decides
    /// whether the operation needs authorization.
    pub async fn call(
        &self,
        query: &str,
        variables: Option<Variables>,
    ) -> Result<Option<Value>, GraphqlError> {
        let token = self.session.ensure_access_token().await;
        if token.is_none() {
            debug!("No access token available, sending unauthenticated request");
        }
        self.transport.send(query, variables, token.as_deref()).await
    }

    /// [`call`](Self::call) and deserialize the returned data.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Option<Variables>,
    ) -> Result<T, GraphqlError> {
        decode_data(self.call(query, variables).await?)
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }
}
