//! Persisted statistics records.
//!
//! Field names follow the stored layout (`count`, `watchTime`, ...) that the
//! settings surface also reads; the longer names are accepted on input.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime record for one resolved identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "count", alias = "viewCount", default)]
    pub view_count: u64,
    #[serde(
        rename = "lastWatched",
        alias = "lastWatchedAt",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_watched_at: Option<DateTime<Utc>>,
    #[serde(rename = "totalWatchTime", alias = "totalWatchTimeMs", default)]
    pub total_watch_time_ms: u64,
}

impl TrackedEntity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            view_count: 0,
            last_watched_at: None,
            total_watch_time_ms: 0,
        }
    }
}

/// Rolling aggregate for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAggregate {
    #[serde(with = "calendar_day")]
    pub date: NaiveDate,
    #[serde(rename = "watchTime", alias = "watchTimeMs", default)]
    pub watch_time_ms: u64,
    #[serde(default)]
    pub reels_watched: u64,
    #[serde(default)]
    pub reels_scrolled: u64,
}

impl DailyAggregate {
    pub fn zeroed(date: NaiveDate) -> Self {
        Self {
            date,
            watch_time_ms: 0,
            reels_watched: 0,
            reels_scrolled: 0,
        }
    }
}

/// Lifetime and today's totals, as shown by the settings surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub unique_reels: u64,
    pub repeated_views: u64,
    pub total_watch_time_ms: u64,
    pub total_scrolled: u64,
    pub tracked_entities: usize,
    pub today: DailyAggregate,
}

/// `YYYY-MM-DD` on output; also reads the older `Mon Oct 19 2026` form.
mod calendar_day {
    use chrono::NaiveDate;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    const ISO: &str = "%Y-%m-%d";
    const LEGACY: &str = "%a %b %d %Y";

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(ISO).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, ISO)
            .or_else(|_| NaiveDate::parse_from_str(&raw, LEGACY))
            .map_err(|err| D::Error::custom(format!("invalid calendar day '{raw}': {err}")))
    }
}
