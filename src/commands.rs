//! Commands Module
//!
//! Front-end entry points. Each returns a display-ready result instead of
//! an error so the caller only has to render it.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::auth::SessionState;
use crate::sync::{User, WeeklyProgress};
use crate::transport::GraphqlError;
use crate::usage::{collect_since_monday, start_of_week, UsageSource, UsageStats};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResult {
    pub success: bool,
    pub user_id: Option<String>,
    /// Shown inline under the sign-in form
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: Option<String>,
    pub state: String,
}

/// Outcome of an authenticated command
///
/// A session that expired silently reports `signed_in: false` without an
/// error message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T> {
    pub success: bool,
    pub signed_in: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub goal_minutes: u32,
    pub usage: UsageStats,
    /// Fraction of the goal used; absent while no goal is set
    pub progress: Option<f64>,
}

/// Sign in with phone number and password
pub async fn sign_in(state: &AppState, phone_number: &str, password: &str) -> SignInResult {
    if phone_number.trim().is_empty() || password.is_empty() {
        return SignInResult {
            success: false,
            user_id: None,
            error: Some("Phone number and password are required".into()),
        };
    }

    match state.session.sign_in(phone_number.trim(), password).await {
        Ok(()) => SignInResult {
            success: true,
            user_id: state.session.user_id(),
            error: None,
        },
        Err(e) => {
            error!("Sign-in failed: {}", e);
            SignInResult {
                success: false,
                user_id: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Current session, if one is held
pub fn get_session(state: &AppState) -> Option<SessionResponse> {
    let session_state = state.session.state();
    match session_state {
        SessionState::Uninitialized | SessionState::Unauthenticated => {
            debug!("No active session");
            None
        }
        _ => Some(SessionResponse {
            user_id: state.session.user_id(),
            state: format!("{session_state:?}"),
        }),
    }
}

/// Logout and clear session
pub async fn logout(state: &AppState) -> Result<(), String> {
    info!("Logging out");
    state.session.sign_out().await.map_err(|e| e.to_string())
}

/// Profile including the stored usage goal
pub async fn load_goal(state: &AppState) -> CommandResult<User> {
    finish(state, state.api.me().await)
}

/// Save a new weekly usage goal
pub async fn save_goal(state: &AppState, minutes: u32) -> CommandResult<User> {
    finish(state, state.api.update_usage_goal(minutes).await.map(Some))
}

pub async fn add_contact(state: &AppState, phone_number: &str) -> CommandResult<User> {
    finish(state, state.api.add_contact(phone_number.trim()).await.map(Some))
}

/// Server-side progress for the week starting `week_start`, this week by
/// default
pub async fn weekly_progress(
    state: &AppState,
    week_start: Option<NaiveDate>,
) -> CommandResult<WeeklyProgress> {
    let week_start = week_start.unwrap_or_else(|| start_of_week(&Local::now()).date_naive());
    finish(state, state.api.weekly_progress(week_start).await)
}

/// Local usage since Monday against the stored goal
pub async fn usage_summary(state: &AppState, source: &dyn UsageSource) -> CommandResult<UsageSummary> {
    let profile = load_goal(state).await;
    let Some(user) = profile.data else {
        return CommandResult {
            success: false,
            signed_in: profile.signed_in,
            data: None,
            error: profile.error,
        };
    };

    match collect_since_monday(source, Local::now()).await {
        Ok(usage) => CommandResult {
            success: true,
            signed_in: true,
            data: Some(UsageSummary {
                goal_minutes: user.usage_goal_minutes,
                progress: usage.progress(user.usage_goal_minutes),
                usage,
            }),
            error: None,
        },
        Err(e) => CommandResult {
            success: false,
            signed_in: true,
            data: None,
            error: Some(e.to_string()),
        },
    }
}

fn finish<T>(state: &AppState, result: Result<Option<T>, GraphqlError>) -> CommandResult<T> {
    match result {
        Ok(data) => CommandResult {
            success: true,
            signed_in: state.session.is_authenticated(),
            data,
            error: None,
        },
        Err(_) if !state.session.is_authenticated() => {
            debug!("Request failed without a session, routing to sign-in");
            CommandResult {
                success: false,
                signed_in: false,
                data: None,
                error: None,
            }
        }
        Err(e) => {
            error!("Request failed: {}", e);
            CommandResult {
                success: false,
                signed_in: true,
                data: None,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::storage::{MemoryTokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::usage::{RawUsage, UsageError};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const FRESH: &str = "h.eyJzdWIiOiJ1MSIsImV4cCI6OTk5OTk5OTk5OX0.s";
    // {"sub":"u1"}: no expiry, so every call refreshes first
    const NO_EXPIRY: &str = "h.eyJzdWIiOiJ1MSJ9.s";

    fn user_json() -> serde_json::Value {
        json!({"id": "u1", "name": "Ada", "phoneNumber": "+491234", "usageGoalMinutes": 60})
    }

    async fn state_with(transport: MockTransport, access_token: Option<&str>) -> AppState {
        let mut store = MemoryTokenStore::new();
        if let Some(token) = access_token {
            store = store
                .with_value(ACCESS_TOKEN_KEY, token)
                .with_value(REFRESH_TOKEN_KEY, "r1");
        }
        let state = AppState::with_parts(Arc::new(transport), Arc::new(store), Duration::from_secs(30));
        state.session.hydrate().await.unwrap();
        state
    }

    struct OneHour;

    #[async_trait]
    impl UsageSource for OneHour {
        async fn usage_between(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<RawUsage>, UsageError> {
            Ok(vec![RawUsage {
                package_name: Some("com.video".into()),
                total_time_in_foreground: Some(30 * 60_000),
            }])
        }
    }

    #[tokio::test]
    async fn test_sign_in_error_is_shown_inline() {
        let transport = MockTransport::new(|_, _| {
            Err(GraphqlError::Application("Invalid phone number or password".into()))
        });
        let state = state_with(transport, None).await;

        let result = sign_in(&state, "+491234", "nope").await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Invalid phone number or password"));
        assert!(get_session(&state).is_none());
    }

    #[tokio::test]
    async fn test_sign_in_requires_both_fields() {
        let transport = MockTransport::new(|_, _| Ok(None));
        let state = state_with(transport, None).await;

        let result = sign_in(&state, " ", "pw").await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_sign_in_success_exposes_user() {
        let transport = MockTransport::new(|_, _| {
            Ok(Some(json!({"login": {"accessToken": FRESH, "refreshToken": "r1"}})))
        });
        let state = state_with(transport, None).await;

        let result = sign_in(&state, "+491234", "pw").await;

        assert!(result.success);
        assert_eq!(result.user_id.as_deref(), Some("u1"));
        let session = get_session(&state).unwrap();
        assert_eq!(session.state, "AuthenticatedFresh");
    }

    #[tokio::test]
    async fn test_load_goal_returns_profile() {
        let transport = MockTransport::new(|_, _| Ok(Some(json!({"me": user_json()}))));
        let state = state_with(transport, Some(FRESH)).await;

        let result = load_goal(&state).await;

        assert!(result.success && result.signed_in);
        assert_eq!(result.data.unwrap().usage_goal_minutes, 60);
    }

    #[tokio::test]
    async fn test_silent_expiry_has_no_error_message() {
        let transport = MockTransport::new(|query, _| {
            if query.contains("mutation RefreshToken") {
                Err(GraphqlError::Application("Invalid refresh token".into()))
            } else {
                Err(GraphqlError::Application("Authentication required".into()))
            }
        });
        let state = state_with(transport, Some(NO_EXPIRY)).await;

        let result = save_goal(&state, 90).await;

        assert!(!result.success);
        assert!(!result.signed_in);
        assert_eq!(result.error, None);
        assert!(get_session(&state).is_none());
    }

    #[tokio::test]
    async fn test_server_error_keeps_session_and_reports() {
        let transport = MockTransport::new(|_, _| {
            Err(GraphqlError::Application("Contact already added".into()))
        });
        let state = state_with(transport, Some(FRESH)).await;

        let result = add_contact(&state, "+490000").await;

        assert!(result.signed_in);
        assert_eq!(result.error.as_deref(), Some("Contact already added"));
    }

    #[tokio::test]
    async fn test_usage_summary_combines_goal_and_usage() {
        let transport = MockTransport::new(|_, _| Ok(Some(json!({"me": user_json()}))));
        let state = state_with(transport, Some(FRESH)).await;

        let result = usage_summary(&state, &OneHour).await;
        let summary = result.data.unwrap();

        assert_eq!(summary.goal_minutes, 60);
        assert_eq!(summary.usage.total_ms, 30 * 60_000);
        assert_eq!(summary.progress, Some(0.5));
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let transport = MockTransport::new(|_, _| Ok(None));
        let state = state_with(transport, Some(FRESH)).await;
        assert!(get_session(&state).is_some());

        logout(&state).await.unwrap();
        assert!(get_session(&state).is_none());
    }
}
