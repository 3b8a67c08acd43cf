//! Authentication Module
//!
//! Owns the session's token pair and decides when the access token must be
//! refreshed. Concurrent callers that find the access token stale share a
//! single refresh mutation.
//!
//! Every sign-in and sign-out bumps a generation counter. A refresh only
//! applies its outcome (install, persist, or clear) while the generation it
//! started under is still current, so a late refresh can never bring back a
//! session the user already left.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::claims;
use crate::storage::{StorageError, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::transport::{decode_data, variables, GraphqlError, Transport};

pub const LOGIN_MUTATION: &str = "mutation Login($phone: String!, $pw: String!) {
  login(data: {phoneNumber: $phone, password: $pw}) { accessToken refreshToken }
}";

pub const REFRESH_MUTATION: &str = "mutation RefreshToken($rt: String!) {
  refreshToken(refreshToken: $rt) { accessToken refreshToken }
}";

type SharedRefresh = Shared<BoxFuture<'static, Option<String>>>;

/// Token pair minted by the login and refresh mutations
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct LoginData {
    login: TokenPair,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    refresh_token: TokenPair,
}

/// In-memory session data
///
/// `user_id` is derived from the access token's subject claim and is never
/// stored on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
}

impl Session {
    fn install(&mut self, pair: TokenPair) {
        self.user_id = claims::subject_of(&pair.access_token);
        self.access_token = Some(pair.access_token);
        self.refresh_token = Some(pair.refresh_token);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Both tokens are held
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }
}

/// Observable lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stored tokens have not been read yet
    Uninitialized,
    Unauthenticated,
    AuthenticatedFresh,
    /// Access token is inside the refresh margin or has no readable expiry
    AuthenticatedStale,
    Refreshing,
}

struct InFlight {
    id: u64,
    generation: u64,
    result: SharedRefresh,
}

#[derive(Default)]
struct Inner {
    session: Session,
    hydrated: bool,
    generation: u64,
    next_refresh_id: u64,
    in_flight: Option<InFlight>,
}

struct Core {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    refresh_margin_secs: i64,
    state: Mutex<Inner>,
    // Serializes token store writes so deletes and installs land in
    // generation order.
    persist: tokio::sync::Mutex<()>,
}

/// Session lifecycle manager
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    core: Arc<Core>,
}

impl SessionManager {
    /// Create a manager with an empty, not yet hydrated session.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                transport,
                store,
                refresh_margin_secs: i64::try_from(refresh_margin.as_secs()).unwrap_or(i64::MAX),
                state: Mutex::new(Inner::default()),
                persist: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Start reading stored tokens in the background.
    ///
    /// Until the returned task finishes the session reads as
    /// [`SessionState::Uninitialized`].
    pub fn bootstrap(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.hydrate().await {
                error!("Failed to restore stored session: {}", e);
            }
        })
    }

    /// Read both tokens from the store into memory.
    ///
    /// Only a complete pair is installed. The result is discarded if a
    /// sign-in or sign-out happened while the reads were pending.
    pub async fn hydrate(&self) -> Result<(), StorageError> {
        let generation = self.lock().generation;

        let access = self.core.store.get(ACCESS_TOKEN_KEY).await;
        let refresh = self.core.store.get(REFRESH_TOKEN_KEY).await;

        let mut inner = self.lock();
        inner.hydrated = true;
        let (access, refresh) = (access?, refresh?);

        if inner.generation != generation {
            debug!("Session changed while restoring, keeping the newer one");
            return Ok(());
        }

        match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => {
                inner.session.install(TokenPair {
                    access_token,
                    refresh_token,
                });
                info!(user_id = ?inner.session.user_id, "Stored session restored");
            }
            (None, None) => debug!("No stored session found"),
            _ => warn!("Ignoring incomplete stored session"),
        }
        Ok(())
    }

    /// Log in with a phone number and password.
    ///
    /// Transport and server errors propagate unchanged and leave the
    /// session as it was.
    pub async fn sign_in(&self, phone_number: &str, password: &str) -> Result<(), GraphqlError> {
        info!("Signing in {}", mask_phone(phone_number));

        let vars = variables([("phone", json!(phone_number)), ("pw", json!(password))]);
        let data = self.core.transport.send(LOGIN_MUTATION, Some(vars), None).await?;
        let LoginData { login } = decode_data(data)?;

        // The new generation must never be visible alongside the old pair.
        let (generation, user_id) = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.session.install(login.clone());
            (inner.generation, inner.session.user_id.clone())
        };
        info!(user_id = ?user_id, "Signed in");

        if !self.persist_if_current(&login, generation).await {
            debug!("Session changed before sign-in tokens were stored");
        }
        Ok(())
    }

    /// Drop both tokens from memory and the store.
    ///
    /// Memory is cleared even when the store fails; the first store error
    /// is returned.
    pub async fn sign_out(&self) -> Result<(), StorageError> {
        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.session.clear();
            inner.generation
        };
        info!("Session cleared");

        self.delete_stored(generation).await
    }

    /// Access token to use for the next authenticated request.
    ///
    /// Returns the held token while it is fresh. A stale token is replaced
    /// through one shared refresh; if that refresh fails the session is
    /// signed out and `None` is returned.
    pub async fn ensure_access_token(&self) -> Option<String> {
        // Deciding to start or join happens under one lock, before any await.
        let pending = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let (Some(access_token), Some(refresh_token)) = (
                inner.session.access_token.clone(),
                inner.session.refresh_token.clone(),
            ) else {
                return None;
            };

            if !claims::is_stale(&access_token, self.core.refresh_margin_secs) {
                return Some(access_token);
            }

            let generation = inner.generation;
            let joinable = inner
                .in_flight
                .as_ref()
                .filter(|in_flight| in_flight.generation == generation)
                .map(|in_flight| in_flight.result.clone());

            match joinable {
                Some(result) => {
                    debug!("Joining in-flight token refresh");
                    result
                }
                None => {
                    inner.next_refresh_id += 1;
                    let id = inner.next_refresh_id;

                    let manager = self.clone();
                    let task = tokio::spawn(async move {
                        manager.run_refresh(id, generation, refresh_token).await
                    });
                    let result = async move { task.await.unwrap_or(None) }.boxed().shared();

                    inner.in_flight = Some(InFlight {
                        id,
                        generation,
                        result: result.clone(),
                    });
                    result
                }
            }
        };

        pending.await
    }

    /// Copy of the current session
    pub fn snapshot(&self) -> Session {
        self.lock().session.clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.lock().session.user_id.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().session.is_authenticated()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        let inner = self.lock();
        let Some(access_token) = inner.session.access_token.as_deref() else {
            return if inner.hydrated {
                SessionState::Unauthenticated
            } else {
                SessionState::Uninitialized
            };
        };
        if inner.session.refresh_token.is_none() {
            return SessionState::Unauthenticated;
        }

        let refreshing = inner
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == inner.generation);
        if refreshing {
            SessionState::Refreshing
        } else if claims::is_stale(access_token, self.core.refresh_margin_secs) {
            SessionState::AuthenticatedStale
        } else {
            SessionState::AuthenticatedFresh
        }
    }

    async fn run_refresh(&self, id: u64, generation: u64, refresh_token: String) -> Option<String> {
        let _guard = InFlightGuard { manager: self, id };
        info!("Refreshing access token");

        let vars = variables([("rt", json!(refresh_token))]);
        let result = match self.core.transport.send(REFRESH_MUTATION, Some(vars), None).await {
            Ok(data) => decode_data::<RefreshData>(data),
            Err(e) => Err(e),
        };

        match result {
            Ok(RefreshData { refresh_token: pair }) => {
                if self.install_if_current(&pair, generation) {
                    info!("Access token refreshed");
                    self.persist_if_current(&pair, generation).await;
                    Some(pair.access_token)
                } else {
                    debug!("Discarding refresh result from a previous session");
                    self.current_access_token()
                }
            }
            Err(e) => {
                // Any refresh failure, transient or not, ends the session.
                warn!("Token refresh failed, signing out: {}", e);
                if self.clear_if_current(generation).await {
                    None
                } else {
                    self.current_access_token()
                }
            }
        }
    }

    /// Install `pair` in memory if `generation` is still current.
    fn install_if_current(&self, pair: &TokenPair, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.session.install(pair.clone());
        true
    }

    /// Write `pair` to the store unless a newer session has replaced it.
    ///
    /// Store failures are logged; the in-memory session stays as it is.
    async fn persist_if_current(&self, pair: &TokenPair, generation: u64) -> bool {
        let _persist = self.core.persist.lock().await;
        if self.lock().generation != generation {
            return false;
        }

        if let Err(e) = self.persist_pair(pair).await {
            warn!("Failed to persist session tokens: {}", e);
        }
        true
    }

    async fn persist_pair(&self, pair: &TokenPair) -> Result<(), StorageError> {
        self.core.store.set(ACCESS_TOKEN_KEY, &pair.access_token).await?;
        self.core.store.set(REFRESH_TOKEN_KEY, &pair.refresh_token).await
    }

    async fn clear_if_current(&self, generation: u64) -> bool {
        let cleared = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return false;
            }
            inner.generation += 1;
            inner.session.clear();
            inner.generation
        };

        if let Err(e) = self.delete_stored(cleared).await {
            warn!("Failed to delete stored tokens: {}", e);
        }
        true
    }

    /// Delete both stored tokens unless a newer session has been installed.
    async fn delete_stored(&self, generation: u64) -> Result<(), StorageError> {
        let _persist = self.core.persist.lock().await;
        if self.lock().generation != generation {
            return Ok(());
        }

        let access = self.core.store.delete(ACCESS_TOKEN_KEY).await;
        let refresh = self.core.store.delete(REFRESH_TOKEN_KEY).await;
        access.and(refresh)
    }

    fn current_access_token(&self) -> Option<String> {
        self.lock().session.access_token.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.core
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight marker when a refresh ends, however it ends.
struct InFlightGuard<'a> {
    manager: &'a SessionManager,
    id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.manager.lock();
        if inner.in_flight.as_ref().is_some_and(|f| f.id == self.id) {
            inner.in_flight = None;
        }
    }
}

fn mask_phone(phone_number: &str) -> String {
    let visible: String = phone_number.chars().take(4).collect();
    format!("{visible}***")
}
