//! Storage keys. The key names and value shapes are shared with the settings
//! surface and must not change.

/// Mapping of entity id to `TrackedEntity`.
pub const WATCHED_REELS: &str = "watchedReels";
/// Lifetime scrolled counter.
pub const TOTAL_REELS_SCROLLED: &str = "totalReelsScrolled";
/// ScrolledSet serialized as an array of ids.
pub const SCROLLED_REELS: &str = "scrolledReels";
/// Today's `DailyAggregate`.
pub const DAILY_STATS: &str = "dailyStats";

pub const EXTENSION_ENABLED: &str = "extensionEnabled";
pub const SHOW_NOTIFICATIONS: &str = "showNotifications";
pub const ENABLE_LIMITS: &str = "enableLimits";
pub const TIME_LIMIT: &str = "timeLimit";
pub const REEL_LIMIT: &str = "reelLimit";

/// Keys that survive a full statistics reset.
pub const SETTINGS_KEYS: [&str; 5] = [
    EXTENSION_ENABLED,
    SHOW_NOTIFICATIONS,
    ENABLE_LIMITS,
    TIME_LIMIT,
    REEL_LIMIT,
];
