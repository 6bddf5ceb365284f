//! The single owned tracking context: document mirror, detection engine,
//! sessions, statistics, settings and the alert scheduler, plus the periodic
//! work that keeps them in step with the page.

pub mod commands;

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::{
    alerts::{messages, AlertConfig, LimitAlertScheduler, LimitInputs},
    detection::{Detected, DetectionEngine},
    dom::{Document, NodeId},
    events::EventEmitter,
    session::{SessionContext, SessionTracker, StopReason},
    settings::Settings,
    stats::{today, PendingWrites, StatsAggregator},
    store::Store,
    tasks::ScheduledTask,
};

pub use commands::{
    handle_control, ControlMessage, ControlReply, DebugReport, Frame, HostEvent, StatsReport,
};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Full rescan catching elements the change notifications missed.
    pub rescan_interval: Duration,
    pub status_interval: Duration,
    pub alerts: AlertConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            rescan_interval: Duration::from_secs(5),
            status_interval: Duration::from_secs(30),
            alerts: AlertConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Defaults, with a 5 s status log when `REELAWARE_DEBUG` is `1`/`true`.
    pub fn from_env() -> Self {
        let debug_mode = std::env::var("REELAWARE_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let mut config = Self::default();
        if debug_mode {
            config.status_interval = Duration::from_secs(5);
        }
        config
    }
}

struct TrackerCore {
    document: Document,
    engine: DetectionEngine,
    sessions: SessionTracker,
    stats: StatsAggregator,
    settings: Settings,
}

impl TrackerCore {
    fn with_sessions<R>(
        &mut self,
        f: impl FnOnce(&mut SessionTracker, &mut SessionContext<'_>) -> R,
    ) -> R {
        let mut cx = SessionContext {
            stats: &mut self.stats,
            settings: &self.settings,
            now: Instant::now(),
            wall: Local::now(),
        };
        f(&mut self.sessions, &mut cx)
    }

    fn attach_all(&mut self, found: Vec<Detected>) {
        self.with_sessions(|sessions, cx| {
            for detected in &found {
                sessions.attach(detected, cx);
            }
        });
    }

    fn scan_document(&mut self) {
        let root = self.document.root();
        let found = self.engine.scan(&self.document, root);
        self.attach_all(found)
    }

    fn limit_inputs(&self) -> LimitInputs {
        LimitInputs {
            settings: self.settings,
            daily: self.stats.daily().cloned(),
            lifetime_watched: self.stats.lifetime_watched(),
        }
    }

    fn log_status(&self, alerting: bool) {
        let now = Instant::now();
        let active = match (self.sessions.active_entity(), self.sessions.active_elapsed_ms(now)) {
            (Some(entity), Some(ms)) => format!("{entity} for {}", messages::format_duration(ms)),
            (Some(entity), None) => entity.to_string(),
            _ => "none".to_string(),
        };
        let today_watched = self
            .stats
            .daily()
            .map_or(0, |daily| daily.watch_time_ms);
        info!(
            "Tracking status: {} tagged, {} subscribed, {} playing, active {active}, scrolled {}, today watched {}, alerting {alerting}",
            self.engine.tracked_count(),
            self.sessions.subscription_count(),
            self.sessions.playing_count(),
            self.stats.total_scrolled(),
            messages::format_duration(today_watched),
        );
    }
}

#[derive(Default)]
struct Background {
    rescan: Option<ScheduledTask>,
    status: Option<ScheduledTask>,
}

impl Background {
    fn cancel(&mut self) {
        for task in [self.rescan.take(), self.status.take()].into_iter().flatten() {
            task.cancel();
        }
    }
}

/// Cheap to clone; all clones drive the same context.
#[derive(Clone)]
pub struct ReelTracker {
    core: Arc<Mutex<TrackerCore>>,
    background: Arc<StdMutex<Background>>,
    scheduler: LimitAlertScheduler,
    store: Store,
    config: TrackerConfig,
}

impl ReelTracker {
    /// Load settings and persisted statistics, then start tracking if
    /// enabled.
    pub async fn init(store: Store, emitter: EventEmitter, config: TrackerConfig) -> Result<Self> {
        let settings = match Settings::load(&store).await {
            Ok(settings) => settings,
            Err(err) => {
                warn!("Failed to load settings, using defaults: {err:#}");
                Settings::default()
            }
        };

        let mut stats = StatsAggregator::new(store.clone());
        stats.load(today()).await;

        let scheduler = LimitAlertScheduler::with_config(emitter, config.alerts.clone());
        let tracker = Self {
            core: Arc::new(Mutex::new(TrackerCore {
                document: Document::new(),
                engine: DetectionEngine::new(),
                sessions: SessionTracker::new(scheduler.clone()),
                stats,
                settings,
            })),
            background: Arc::new(StdMutex::new(Background::default())),
            scheduler,
            store,
            config,
        };

        if settings.enabled {
            tracker.start().await;
        } else {
            tracker.scheduler.stop();
            info!("Tracking disabled in settings");
        }
        info!("Tracker initialized");
        Ok(tracker)
    }

    fn background(&self) -> MutexGuard<'_, Background> {
        match self.background.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Arm periodic work, scan what is already in the document and check
    /// limits against the statistics carried over.
    async fn start(&self) {
        self.scheduler.activate();
        self.arm_background();
        let inputs = {
            let mut core = self.core.lock().await;
            core.scan_document();
            core.limit_inputs()
        };
        self.scheduler.evaluate(inputs);
    }

    fn arm_background(&self) {
        let mut background = self.background();
        background.cancel();

        let core = Arc::downgrade(&self.core);
        background.rescan = Some(ScheduledTask::spawn_interval(
            "periodic-rescan",
            self.config.rescan_interval,
            move || rescan(core.clone()),
        ));

        let core = Arc::downgrade(&self.core);
        let scheduler = self.scheduler.clone();
        background.status = Some(ScheduledTask::spawn_interval(
            "status-log",
            self.config.status_interval,
            move || log_status(core.clone(), scheduler.clone()),
        ));
    }

    /// Stop every timer, then drop all subscriptions and tags.
    async fn stop(&self) {
        self.background().cancel();
        self.scheduler.stop();

        let mut core = self.core.lock().await;
        let detached = core.sessions.detach_all();
        core.engine.reset();
        info!("Tracking stopped, {detached} subscription(s) detached");
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let was_enabled = {
            let mut core = self.core.lock().await;
            std::mem::replace(&mut core.settings.enabled, enabled)
        };
        info!("Tracking toggled: {enabled}");

        match (was_enabled, enabled) {
            (false, true) => self.start().await,
            (true, false) => self.stop().await,
            _ => {}
        }
        Ok(())
    }

    /// Re-read settings from the store without touching session state.
    pub async fn reload_settings(&self) -> Result<Settings> {
        let settings = Settings::load(&self.store)
            .await
            .context("failed to reload settings")?;

        let (was_enabled, inputs) = {
            let mut core = self.core.lock().await;
            let was_enabled = core.settings.enabled;
            core.settings = settings;
            (was_enabled, core.limit_inputs())
        };
        info!("Settings updated: {settings:?}");

        match (was_enabled, settings.enabled) {
            (false, true) => self.start().await,
            (true, false) => self.stop().await,
            _ => {}
        }
        if settings.enabled {
            self.scheduler.evaluate(inputs);
        }
        Ok(settings)
    }

    pub fn snooze(&self, minutes: u32) -> u32 {
        self.scheduler.snooze(minutes)
    }

    pub async fn reset_stats(&self) -> Result<()> {
        let (writes, inputs) = {
            let mut core = self.core.lock().await;
            let writes = core.stats.reset(today());
            (writes, core.limit_inputs())
        };
        self.scheduler.evaluate(inputs);
        writes.wait().await
    }

    pub async fn stats_report(&self) -> Result<StatsReport> {
        let (summary, writes) = self.core.lock().await.stats.summary(today());
        if let Some(writes) = writes {
            writes.wait().await?;
        }
        Ok(StatsReport {
            awareness: messages::scroll_awareness(summary.total_scrolled),
            scheduler: self.scheduler.status(),
            summary,
        })
    }

    pub async fn debug_report(&self) -> DebugReport {
        let core = self.core.lock().await;
        DebugReport {
            enabled: core.settings.enabled,
            tracked_elements: core.engine.tracked_count(),
            subscriptions: core.sessions.subscription_count(),
            playing: core.sessions.playing_count(),
            active_entity: core.sessions.active_entity().map(str::to_string),
            detection: core.engine.stats(),
            scheduler: self.scheduler.status(),
            settings: core.settings,
            store: self.store.location().to_string(),
        }
    }

    pub async fn settings(&self) -> Settings {
        self.core.lock().await.settings
    }

    /// Apply one host event. The document mirror is always updated; detection
    /// and sessions only run while enabled. Returns the id of an inserted
    /// element. Persistence failures are returned after memory is updated.
    pub async fn handle_host_event(&self, event: HostEvent) -> Result<Option<NodeId>> {
        let (inserted, writes) = {
            let mut guard = self.core.lock().await;
            let core = &mut *guard;
            let enabled = core.settings.enabled;

            match event {
                HostEvent::Insert { parent, element } => {
                    let parent = parent.unwrap_or_else(|| core.document.root());
                    let node = core.document.insert(parent, element)?;
                    if enabled {
                        let found = core.engine.on_structural_change(&core.document, &[node]);
                        core.attach_all(found);
                    }
                    (Some(node), PendingWrites::new())
                }
                HostEvent::Remove { node } => {
                    let removed = core.document.remove(node)?;
                    core.engine.forget(&removed);
                    let writes = if enabled {
                        core.with_sessions(|sessions, cx| sessions.on_removed(&removed, cx))
                    } else {
                        PendingWrites::new()
                    };
                    (None, writes)
                }
                HostEvent::Resize { node, rect } => {
                    core.document.set_rect(node, rect)?;
                    if enabled {
                        let found = core.engine.scan(&core.document, node);
                        core.attach_all(found);
                    }
                    (None, PendingWrites::new())
                }
                HostEvent::Play { node } if enabled => (
                    None,
                    core.with_sessions(|sessions, cx| sessions.on_play(node, cx)),
                ),
                HostEvent::Pause { node } if enabled => (
                    None,
                    core.with_sessions(|sessions, cx| sessions.on_stop(node, StopReason::Pause, cx)),
                ),
                HostEvent::Ended { node } if enabled => (
                    None,
                    core.with_sessions(|sessions, cx| sessions.on_stop(node, StopReason::Ended, cx)),
                ),
                HostEvent::Visibility { hidden } => {
                    core.document.set_hidden(hidden);
                    let writes = match (enabled, hidden) {
                        (true, true) => core.with_sessions(|sessions, cx| sessions.on_hidden(cx)),
                        (true, false) => {
                            core.sessions.on_visible();
                            PendingWrites::new()
                        }
                        (false, _) => PendingWrites::new(),
                    };
                    (None, writes)
                }
                HostEvent::Play { .. } | HostEvent::Pause { .. } | HostEvent::Ended { .. } => {
                    (None, PendingWrites::new())
                }
            }
        };

        writes.wait().await?;
        Ok(inserted)
    }

    /// Commit whatever is playing and stop all background work.
    pub async fn shutdown(&self) -> Result<()> {
        let writes = self
            .core
            .lock()
            .await
            .with_sessions(|sessions, cx| sessions.on_hidden(cx));
        self.stop().await;
        info!("Tracker shut down");
        writes.wait().await
    }
}

async fn rescan(core: Weak<Mutex<TrackerCore>>) {
    let Some(core) = core.upgrade() else {
        return;
    };
    let mut core = core.lock().await;
    if core.settings.enabled {
        core.scan_document();
    }
}

async fn log_status(core: Weak<Mutex<TrackerCore>>, scheduler: LimitAlertScheduler) {
    if let Some(core) = core.upgrade() {
        core.lock().await.log_status(scheduler.is_alerting());
    }
}
