//! SoberUp Client Library
//!
//! Session lifecycle and GraphQL goal sync for the SoberUp companion app.

pub mod auth;
pub mod claims;
pub mod client;
pub mod commands;
pub mod config;
pub mod logging;
pub mod mock;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use auth::SessionManager;
use client::AuthenticatedClient;
use config::Config;
use storage::{SecureFileStore, StorageError, TokenStore};
use sync::ApiClient;
use transport::{GraphqlError, HttpTransport, Transport};

/// Application state shared across commands
///
/// Holds the one session of the process; pass it by reference.
pub struct AppState {
    pub session: SessionManager,
    pub api: ApiClient,
}

/// Errors raised while assembling [`AppState`]
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("HTTP client: {0}")]
    Transport(#[from] GraphqlError),

    #[error("Token store: {0}")]
    Storage(#[from] StorageError),
}

impl AppState {
    /// Build state backed by the HTTP endpoint and on-disk token store of
    /// `config`. Stored tokens are not read until the session is
    /// bootstrapped.
    pub async fn open(config: &Config) -> Result<Self, InitError> {
        let transport = Arc::new(HttpTransport::new(&config.api_url, config.request_timeout)?);
        let store = Arc::new(SecureFileStore::open(config.token_dir()).await?);
        Ok(Self::with_parts(transport, store, config.refresh_margin))
    }

    /// Build state from explicit collaborators.
    pub fn with_parts(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        refresh_margin: Duration,
    ) -> Self {
        let session = SessionManager::new(transport.clone(), store, refresh_margin);
        let api = ApiClient::new(AuthenticatedClient::new(session.clone(), transport));
        Self { session, api }
    }
}
