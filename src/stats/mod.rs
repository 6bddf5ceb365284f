//! Statistics aggregator: sole owner of the entity table, the ScrolledSet,
//! the lifetime scrolled counter and today's aggregate.
//!
//! Mutations update memory first and return the queued writes; callers await
//! those after releasing their own locks. A failed write leaves memory as is.

mod models;

pub use models::{DailyAggregate, StatsSummary, TrackedEntity};

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use log::{error, info};
use serde_json::json;

use crate::store::{keys, Pending, Store};

/// Watches shorter than this are accidental taps and never counted.
pub const MIN_WATCH_MS: u64 = 1_000;

/// View count at which an entity is considered a repeat.
pub const REPEAT_VIEW_THRESHOLD: u64 = 3;

/// Writes queued by one mutation, awaited together.
#[must_use = "writes should be awaited so failures are surfaced"]
#[derive(Default)]
pub struct PendingWrites {
    cleared: Vec<Pending<usize>>,
    writes: Vec<(&'static str, Pending<()>)>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `other`, keeping enqueue order.
    pub fn merge(&mut self, mut other: PendingWrites) {
        self.cleared.append(&mut other.cleared);
        self.writes.append(&mut other.writes);
    }

    fn push(&mut self, key: &'static str, pending: Pending<()>) {
        self.writes.push((key, pending));
    }

    pub fn is_empty(&self) -> bool {
        self.cleared.is_empty() && self.writes.is_empty()
    }

    /// Wait for every write; the first failure is returned after all have
    /// settled.
    pub async fn wait(self) -> Result<()> {
        let mut first_error = None;
        for cleared in self.cleared {
            match cleared.wait().await {
                Ok(removed) => info!("Cleared {removed} stored statistics keys"),
                Err(err) => {
                    error!("Failed to clear statistics: {err:#}");
                    first_error.get_or_insert(err.context("failed to clear statistics"));
                }
            }
        }
        for (key, pending) in self.writes {
            if let Err(err) = pending.wait().await {
                error!("Failed to persist {key}: {err:#}");
                first_error.get_or_insert(err.context(format!("failed to persist {key}")));
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Result of recording an entity's first-ever play.
#[must_use]
pub struct ScrollRecord {
    pub total_scrolled: u64,
    pub writes: PendingWrites,
}

/// Result of a watch commit.
#[must_use]
pub struct CommitOutcome {
    pub counted: bool,
    pub view_count: u64,
    /// True only on the commit that moves the count across the repeat
    /// threshold.
    pub repeat_crossed: bool,
    pub writes: PendingWrites,
}

pub struct StatsAggregator {
    store: Store,
    entities: HashMap<String, TrackedEntity>,
    scrolled: HashSet<String>,
    total_scrolled: u64,
    daily: Option<DailyAggregate>,
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl StatsAggregator {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            entities: HashMap::new(),
            scrolled: HashSet::new(),
            total_scrolled: 0,
            daily: None,
        }
    }

    /// Load everything persisted. Each part is best effort: a part that fails
    /// to load starts empty and the failure is logged.
    pub async fn load(&mut self, today: NaiveDate) {
        match self
            .store
            .get::<HashMap<String, TrackedEntity>>(keys::WATCHED_REELS)
            .await
        {
            Ok(stored) => {
                self.entities = stored
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(id, mut entity)| {
                        entity.id = id.clone();
                        (id, entity)
                    })
                    .collect();
            }
            Err(err) => error!("Failed to load watched reels: {err:#}"),
        }

        match self.load_scroll_counter().await {
            Ok((total, scrolled)) => {
                self.total_scrolled = total;
                self.scrolled = scrolled;
            }
            Err(err) => error!("Failed to load scroll counter: {err:#}"),
        }

        if let Err(err) = self.load_or_rollover_on(today).await {
            error!("Failed to load daily stats: {err:#}");
        }

        info!(
            "Loaded {} tracked reels, {} scrolled, today {:?}",
            self.entities.len(),
            self.total_scrolled,
            self.daily
        );
    }

    async fn load_scroll_counter(&self) -> Result<(u64, HashSet<String>)> {
        let total = self.store.get::<u64>(keys::TOTAL_REELS_SCROLLED).await?;
        let scrolled = self.store.get::<Vec<String>>(keys::SCROLLED_REELS).await?;
        Ok((
            total.unwrap_or(0),
            scrolled.unwrap_or_default().into_iter().collect(),
        ))
    }

    pub async fn load_or_rollover(&mut self) -> Result<DailyAggregate> {
        self.load_or_rollover_on(today()).await
    }

    /// Return the persisted aggregate if it belongs to `today`; otherwise
    /// persist and return a zeroed one stamped `today`.
    pub async fn load_or_rollover_on(&mut self, today: NaiveDate) -> Result<DailyAggregate> {
        let stored = self
            .store
            .get::<DailyAggregate>(keys::DAILY_STATS)
            .await
            .context("failed to read daily stats")?;

        if let Some(daily) = stored.filter(|d| d.date == today) {
            self.daily = Some(daily.clone());
            return Ok(daily);
        }

        let fresh = DailyAggregate::zeroed(today);
        self.daily = Some(fresh.clone());
        self.store
            .put(keys::DAILY_STATS, &fresh)
            .wait()
            .await
            .context("failed to persist rolled-over daily stats")?;
        info!("Daily stats rolled over to {today}");
        Ok(fresh)
    }

    /// In-memory rollover before any read or mutation of the aggregate.
    /// Returns a write when the day changed.
    fn refresh_daily(&mut self, today: NaiveDate) -> Option<Pending<()>> {
        let stale = self.daily.as_ref().map(|d| d.date != today).unwrap_or(true);
        if !stale {
            return None;
        }
        let fresh = DailyAggregate::zeroed(today);
        let pending = self.store.put(keys::DAILY_STATS, &fresh);
        self.daily = Some(fresh);
        Some(pending)
    }

    /// Today's aggregate, rolled over first if the day changed.
    pub fn daily_for(&mut self, today: NaiveDate) -> (DailyAggregate, Option<PendingWrites>) {
        let writes = self.refresh_daily(today).map(|pending| {
            let mut writes = PendingWrites::new();
            writes.push(keys::DAILY_STATS, pending);
            writes
        });
        let daily = self
            .daily
            .clone()
            .unwrap_or_else(|| DailyAggregate::zeroed(today));
        (daily, writes)
    }

    /// Last known aggregate without rollover; `None` before anything loaded.
    pub fn daily(&self) -> Option<&DailyAggregate> {
        self.daily.as_ref()
    }

    /// Register an entity on first detection. Existing records are untouched.
    pub fn ensure_entity(&mut self, id: &str) -> &TrackedEntity {
        self.entities
            .entry(id.to_string())
            .or_insert_with(|| TrackedEntity::new(id))
    }

    pub fn entity(&self, id: &str) -> Option<&TrackedEntity> {
        self.entities.get(id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn has_scrolled(&self, id: &str) -> bool {
        self.scrolled.contains(id)
    }

    pub fn total_scrolled(&self) -> u64 {
        self.total_scrolled
    }

    /// Total counted watches across all entities.
    pub fn lifetime_watched(&self) -> u64 {
        self.entities.values().map(|e| e.view_count).sum()
    }

    /// Count `id` as scrolled past. `None` if it already was.
    pub fn record_scroll(&mut self, id: &str, today: NaiveDate) -> Option<ScrollRecord> {
        if self.has_scrolled(id) {
            return None;
        }
        self.scrolled.insert(id.to_string());
        self.total_scrolled += 1;

        let mut writes = PendingWrites::new();
        if let Some(pending) = self.refresh_daily(today) {
            writes.push(keys::DAILY_STATS, pending);
        }
        if let Some(daily) = self.daily.as_mut() {
            daily.reels_scrolled += 1;
        }

        let mut scrolled: Vec<&String> = self.scrolled.iter().collect();
        scrolled.sort();
        writes.push(
            keys::TOTAL_REELS_SCROLLED,
            self.store.put_many(vec![
                (keys::TOTAL_REELS_SCROLLED, json!(self.total_scrolled)),
                (keys::SCROLLED_REELS, json!(scrolled)),
            ]),
        );
        if let Some(daily) = self.daily.as_ref() {
            writes.push(keys::DAILY_STATS, self.store.put(keys::DAILY_STATS, daily));
        }

        Some(ScrollRecord {
            total_scrolled: self.total_scrolled,
            writes,
        })
    }

    /// Convert a finished play interval into statistics.
    pub fn commit_watch(&mut self, id: &str, duration_ms: u64, now: DateTime<Local>) -> CommitOutcome {
        if duration_ms < MIN_WATCH_MS {
            return CommitOutcome {
                counted: false,
                view_count: self.entities.get(id).map(|e| e.view_count).unwrap_or(0),
                repeat_crossed: false,
                writes: PendingWrites::new(),
            };
        }

        let entity = self
            .entities
            .entry(id.to_string())
            .or_insert_with(|| TrackedEntity::new(id));
        let previous = entity.view_count;
        entity.view_count += 1;
        entity.total_watch_time_ms += duration_ms;
        entity.last_watched_at = Some(now.with_timezone(&Utc));
        let view_count = entity.view_count;

        let mut writes = PendingWrites::new();
        if let Some(pending) = self.refresh_daily(now.date_naive()) {
            writes.push(keys::DAILY_STATS, pending);
        }
        if let Some(daily) = self.daily.as_mut() {
            daily.watch_time_ms += duration_ms;
            daily.reels_watched += 1;
        }

        writes.push(keys::WATCHED_REELS, self.store.put(keys::WATCHED_REELS, &self.entities));
        if let Some(daily) = self.daily.as_ref() {
            writes.push(keys::DAILY_STATS, self.store.put(keys::DAILY_STATS, daily));
        }

        CommitOutcome {
            counted: true,
            view_count,
            repeat_crossed: previous < REPEAT_VIEW_THRESHOLD && view_count >= REPEAT_VIEW_THRESHOLD,
            writes,
        }
    }

    pub fn summary(&mut self, today: NaiveDate) -> (StatsSummary, Option<PendingWrites>) {
        let (daily, writes) = self.daily_for(today);
        let watched = self.entities.values().filter(|e| e.view_count > 0);
        let summary = StatsSummary {
            unique_reels: watched.clone().count() as u64,
            repeated_views: watched.clone().map(|e| e.view_count.saturating_sub(1)).sum(),
            total_watch_time_ms: self.entities.values().map(|e| e.total_watch_time_ms).sum(),
            total_scrolled: self.total_scrolled,
            tracked_entities: self.entities.len(),
            today: daily,
        };
        (summary, writes)
    }

    /// Full reset: drop every statistic, keep settings.
    pub fn reset(&mut self, today: NaiveDate) -> PendingWrites {
        self.entities.clear();
        self.scrolled.clear();
        self.total_scrolled = 0;
        let fresh = DailyAggregate::zeroed(today);

        let mut writes = PendingWrites::new();
        writes.cleared.push(self.store.clear_except(&keys::SETTINGS_KEYS));
        let reseed = self.store.put_many(vec![
            (keys::TOTAL_REELS_SCROLLED, json!(0)),
            (keys::SCROLLED_REELS, json!([])),
            (keys::DAILY_STATS, json!(fresh)),
        ]);
        self.daily = Some(fresh);

        writes.push(keys::DAILY_STATS, reseed);
        info!("Statistics reset");
        writes
    }
}
