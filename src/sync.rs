//! Goal Sync Module
//!
//! Business operations against the SoberUp GraphQL API: the user's profile,
//! the weekly usage goal, contacts and weekly progress.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::client::AuthenticatedClient;
use crate::transport::{variables, GraphqlError};

pub const ME_QUERY: &str = "query Me {
  me { id name phoneNumber usageGoalMinutes }
}";

pub const UPDATE_USER_MUTATION: &str = "mutation UpdateUser($data: UserUpdateInput!) {
  updateUser(data: $data) { id name phoneNumber usageGoalMinutes }
}";

pub const ADD_CONTACT_MUTATION: &str = "mutation AddContact($phoneNumber: String!) {
  addContact(phoneNumber: $phoneNumber) { id name phoneNumber usageGoalMinutes }
}";

pub const WEEKLY_PROGRESS_QUERY: &str = "query WeeklyProgress($weekStart: Date!) {
  me { weeklyProgress(weekStart: $weekStart) { goalMinutes totalMs percent } }
}";

/// A SoberUp user as the API returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    pub usage_goal_minutes: u32,
}

/// Server-computed usage against the goal for one week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyProgress {
    pub goal_minutes: u32,
    pub total_ms: u64,
    /// Capped at 100
    pub percent: f64,
}

#[derive(Deserialize)]
struct MeData {
    me: Option<User>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserData {
    update_user: User,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddContactData {
    add_contact: User,
}

#[derive(Deserialize)]
struct ProgressMe {
    #[serde(rename = "weeklyProgress")]
    weekly_progress: WeeklyProgress,
}

#[derive(Deserialize)]
struct ProgressData {
    me: Option<ProgressMe>,
}

/// API client for the SoberUp backend
#[derive(Clone)]
pub struct ApiClient {
    client: AuthenticatedClient,
}

impl ApiClient {
    pub fn new(client: AuthenticatedClient) -> Self {
        Self { client }
    }

    /// The signed-in user, or `None` when the server does not know them.
    pub async fn me(&self) -> Result<Option<User>, GraphqlError> {
        let data: MeData = self.client.call_as(ME_QUERY, None).await?;
        Ok(data.me)
    }

    /// Store a new weekly usage goal.
    pub async fn update_usage_goal(&self, minutes: u32) -> Result<User, GraphqlError> {
        info!("Saving usage goal: {} minutes", minutes);
        let vars = variables([("data", json!({ "usageGoalMinutes": minutes }))]);
        let data: UpdateUserData = self.client.call_as(UPDATE_USER_MUTATION, Some(vars)).await?;
        Ok(data.update_user)
    }

    /// Change the user's display name.
    pub async fn update_name(&self, name: &str) -> Result<User, GraphqlError> {
        let vars = variables([("data", json!({ "name": name }))]);
        let data: UpdateUserData = self.client.call_as(UPDATE_USER_MUTATION, Some(vars)).await?;
        Ok(data.update_user)
    }

    /// Connect with another user by phone number.
    pub async fn add_contact(&self, phone_number: &str) -> Result<User, GraphqlError> {
        let vars = variables([("phoneNumber", json!(phone_number))]);
        let data: AddContactData = self.client.call_as(ADD_CONTACT_MUTATION, Some(vars)).await?;
        info!("Contact added: {}", data.add_contact.id);
        Ok(data.add_contact)
    }

    /// Progress for the week starting on `week_start`.
    pub async fn weekly_progress(
        &self,
        week_start: NaiveDate,
    ) -> Result<Option<WeeklyProgress>, GraphqlError> {
        let vars = variables([("weekStart", json!(week_start.format("%Y-%m-%d").to_string()))]);
        let data: ProgressData = self.client.call_as(WEEKLY_PROGRESS_QUERY, Some(vars)).await?;
        Ok(data.me.map(|me| me.weekly_progress))
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionManager;
    use crate::mock::MockTransport;
    use crate::storage::MemoryTokenStore;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn user_json(goal: u32) -> Value {
        json!({"id": "u1", "name": "Ada", "phoneNumber": "+491234", "usageGoalMinutes": goal})
    }

    fn api(transport: Arc<MockTransport>) -> ApiClient {
        let session = SessionManager::new(
            transport.clone(),
            Arc::new(MemoryTokenStore::new()),
            Duration::from_secs(30),
        );
        ApiClient::new(AuthenticatedClient::new(session, transport))
    }

    #[tokio::test]
    async fn test_me_decodes_user() {
        let transport = Arc::new(MockTransport::new(|_, _| Ok(Some(json!({"me": user_json(600)})))));
        let user = api(transport).me().await.unwrap().unwrap();

        assert_eq!(user.id, "u1");
        assert_eq!(user.phone_number, "+491234");
        assert_eq!(user.usage_goal_minutes, 600);
    }

    #[tokio::test]
    async fn test_me_null_is_none() {
        let transport = Arc::new(MockTransport::new(|_, _| Ok(Some(json!({"me": null})))));
        assert_eq!(api(transport).me().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_usage_goal_sends_data_input() {
        let transport = Arc::new(MockTransport::new(|_, vars| {
            let minutes = vars.unwrap()["data"]["usageGoalMinutes"].as_u64().unwrap() as u32;
            Ok(Some(json!({"updateUser": user_json(minutes)})))
        }));
        let user = api(transport.clone()).update_usage_goal(420).await.unwrap();

        assert_eq!(user.usage_goal_minutes, 420);
        assert_eq!(transport.calls_to("mutation UpdateUser"), 1);
    }

    #[tokio::test]
    async fn test_update_name_sends_only_name() {
        let transport = Arc::new(MockTransport::new(|_, _| {
            Ok(Some(json!({"updateUser": user_json(0)})))
        }));
        api(transport.clone()).update_name("Ada").await.unwrap();

        let vars = transport.calls()[0].variables.clone().unwrap();
        assert_eq!(vars["data"], json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn test_add_contact_surfaces_server_message() {
        let transport = Arc::new(MockTransport::new(|_, _| {
            Err(GraphqlError::Application("No user found with this phone number".into()))
        }));
        let err = api(transport).add_contact("+490000").await.unwrap_err();

        assert_eq!(err.to_string(), "No user found with this phone number");
    }

    #[tokio::test]
    async fn test_weekly_progress_sends_iso_date() {
        let transport = Arc::new(MockTransport::new(|_, _| {
            Ok(Some(json!({"me": {"weeklyProgress": {"goalMinutes": 600, "totalMs": 18000000, "percent": 50.0}}})))
        }));
        let week_start = NaiveDate::from_ymd_opt(2026, 10, 12).unwrap();
        let progress = api(transport.clone())
            .weekly_progress(week_start)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(progress.total_ms, 18_000_000);
        assert_eq!(progress.percent, 50.0);
        let vars = transport.calls()[0].variables.clone().unwrap();
        assert_eq!(vars["weekStart"], json!("2026-10-12"));
    }
}
