//! Usage Module
//!
//! Weekly screen-time arithmetic. Collecting per-app foreground time is the
//! platform's job and sits behind [`UsageSource`].

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-app record as reported by the platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUsage {
    pub package_name: Option<String>,
    pub total_time_in_foreground: Option<i64>,
}

/// Foreground time of one app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUsage {
    pub package_name: String,
    pub ms: u64,
}

/// Usage over a time window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub entries: Vec<AppUsage>,
    pub total_ms: u64,
}

impl UsageStats {
    /// Normalize raw platform records.
    ///
    /// Unnamed packages become `"unknown"`; missing or negative durations
    /// count as zero.
    pub fn from_raw(from: DateTime<Utc>, to: DateTime<Utc>, raw: Vec<RawUsage>) -> Self {
        let entries: Vec<AppUsage> = raw
            .into_iter()
            .map(|usage| AppUsage {
                package_name: usage.package_name.unwrap_or_else(|| "unknown".to_string()),
                ms: usage
                    .total_time_in_foreground
                    .and_then(|ms| u64::try_from(ms).ok())
                    .unwrap_or(0),
            })
            .collect();
        let total_ms = entries.iter().map(|e| e.ms).sum();

        Self {
            from,
            to,
            entries,
            total_ms,
        }
    }

    /// Fraction of `goal_minutes` used so far.
    pub fn progress(&self, goal_minutes: u32) -> Option<f64> {
        goal_progress(self.total_ms, goal_minutes)
    }
}

/// Usage source errors
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("Usage access has not been granted")]
    PermissionDenied,

    #[error("Usage statistics unavailable: {0}")]
    Unavailable(String),
}

/// Platform usage statistics
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn usage_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawUsage>, UsageError>;
}

/// Midnight of the Monday starting the week that contains `now`.
pub fn start_of_week<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let days_since_monday = i64::from(now.weekday().num_days_from_monday());
    let monday = now.date_naive() - Duration::days(days_since_monday);
    let midnight = monday.and_time(chrono::NaiveTime::MIN);

    // Midnight can fall into a DST gap; take the UTC reading then.
    now.timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or_else(|| now.timezone().from_utc_datetime(&midnight))
}

/// Ratio of `total_ms` to a goal in minutes; `None` without a goal.
pub fn goal_progress(total_ms: u64, goal_minutes: u32) -> Option<f64> {
    if goal_minutes == 0 {
        return None;
    }
    Some(total_ms as f64 / (f64::from(goal_minutes) * 60_000.0))
}

/// Usage from this week's Monday until `now`.
pub async fn collect_since_monday(
    source: &dyn UsageSource,
    now: DateTime<Local>,
) -> Result<UsageStats, UsageError> {
    let from = start_of_week(&now).with_timezone(&Utc);
    let to = now.with_timezone(&Utc);

    let raw = source.usage_between(from, to).await?;
    let stats = UsageStats::from_raw(from, to, raw);
    debug!("Collected usage since Monday: {} ms", stats.total_ms);
    Ok(stats)
}
