use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::store::{keys, Store};

pub const DEFAULT_TIME_LIMIT_MINUTES: u32 = 60;
pub const DEFAULT_REEL_LIMIT: u32 = 100;

/// User settings. Written by the settings surface; the core only reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub enabled: bool,
    pub notifications_enabled: bool,
    pub limits_enabled: bool,
    pub time_limit_minutes: u32,
    pub reel_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            notifications_enabled: true,
            limits_enabled: true,
            time_limit_minutes: DEFAULT_TIME_LIMIT_MINUTES,
            reel_limit: DEFAULT_REEL_LIMIT,
        }
    }
}

impl Settings {
    /// Read every settings key, falling back to defaults for missing ones.
    /// A stored limit of zero counts as unset.
    pub async fn load(store: &Store) -> Result<Self> {
        let defaults = Self::default();

        let enabled = store.get::<bool>(keys::EXTENSION_ENABLED).await?;
        let notifications = store.get::<bool>(keys::SHOW_NOTIFICATIONS).await?;
        let limits = store.get::<bool>(keys::ENABLE_LIMITS).await?;
        let time_limit = store.get::<u32>(keys::TIME_LIMIT).await?;
        let reel_limit = store.get::<u32>(keys::REEL_LIMIT).await?;

        Ok(Self {
            enabled: enabled.unwrap_or(defaults.enabled),
            notifications_enabled: notifications.unwrap_or(defaults.notifications_enabled),
            limits_enabled: limits.unwrap_or(defaults.limits_enabled),
            time_limit_minutes: time_limit
                .filter(|v| *v > 0)
                .unwrap_or(defaults.time_limit_minutes),
            reel_limit: reel_limit.filter(|v| *v > 0).unwrap_or(defaults.reel_limit),
        })
    }

    /// Write all settings keys. The core never calls this; it exists for
    /// hosts and tests that act as the settings surface.
    pub async fn save(&self, store: &Store) -> Result<()> {
        store
            .put_many(vec![
                (keys::EXTENSION_ENABLED, self.enabled.into()),
                (keys::SHOW_NOTIFICATIONS, self.notifications_enabled.into()),
                (keys::ENABLE_LIMITS, self.limits_enabled.into()),
                (keys::TIME_LIMIT, self.time_limit_minutes.into()),
                (keys::REEL_LIMIT, self.reel_limit.into()),
            ])
            .wait()
            .await
    }

    pub fn time_limit_ms(&self) -> u64 {
        u64::from(self.time_limit_minutes) * 60_000
    }
}
