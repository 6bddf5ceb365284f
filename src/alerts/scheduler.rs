use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::{Duration, Instant};

use crate::{
    events::{EventEmitter, PresentationEvent},
    settings::Settings,
    stats::DailyAggregate,
    tasks::ScheduledTask,
};

use super::{
    milestones::is_milestone,
    state::{SchedulerState, SchedulerStatus},
};

const ENABLE_LOGS: bool = true;

use crate::log_info;

pub const MIN_SNOOZE_MINUTES: u32 = 1;

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Delay between repeated limit alerts while alerting.
    pub repeat_interval: Duration,
    /// Minimum gap between recovery reinforcements.
    pub positive_cooldown: Duration,
    /// Minimum gap before an occasional encouragement.
    pub encouragement_spacing: Duration,
    pub encouragement_every: u64,
    pub encouragement_probability: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            repeat_interval: Duration::from_millis(2_500),
            positive_cooldown: Duration::from_secs(60 * 60),
            encouragement_spacing: Duration::from_secs(30 * 60),
            encouragement_every: 25,
            encouragement_probability: 0.3,
        }
    }
}

/// Everything one evaluation looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitInputs {
    pub settings: Settings,
    pub daily: Option<DailyAggregate>,
    pub lifetime_watched: u64,
}

impl LimitInputs {
    /// `(time_exceeded, reels_exceeded)`, or `None` when limits are not
    /// evaluated at all.
    fn exceeded(&self) -> Option<(bool, bool)> {
        if !self.settings.limits_enabled || !self.settings.notifications_enabled {
            return None;
        }
        let daily = self.daily.as_ref()?;
        Some((
            daily.watch_time_ms >= self.settings.time_limit_ms(),
            daily.reels_scrolled >= u64::from(self.settings.reel_limit),
        ))
    }
}

struct SchedulerInner {
    config: AlertConfig,
    state: SchedulerState,
    last_inputs: Option<LimitInputs>,
    emitter: EventEmitter,
    rng: StdRng,
}

/// Limit alerting with snooze. Cloning shares the same state.
#[derive(Clone)]
pub struct LimitAlertScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

fn lock(inner: &Mutex<SchedulerInner>) -> MutexGuard<'_, SchedulerInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl LimitAlertScheduler {
    pub fn new(emitter: EventEmitter) -> Self {
        Self::with_config(emitter, AlertConfig::default())
    }

    pub fn with_config(emitter: EventEmitter, config: AlertConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                config,
                state: SchedulerState::default(),
                last_inputs: None,
                emitter,
                rng: StdRng::from_entropy(),
            })),
        }
    }

    /// Re-check limits against `inputs` and cache them for the repeat and
    /// snooze-resume tasks.
    pub fn evaluate(&self, inputs: LimitInputs) {
        let weak = Arc::downgrade(&self.inner);
        let mut inner = lock(&self.inner);
        inner.last_inputs = Some(inputs);
        evaluate_locked(&mut inner, &weak, Instant::now());
    }

    /// Emit a milestone event if `total_scrolled` just reached one.
    pub fn scroll_milestone(&self, total_scrolled: u64, settings: &Settings) -> bool {
        if !is_milestone(total_scrolled) {
            return false;
        }
        self.notify(settings, PresentationEvent::ScrollMilestone {
            count: total_scrolled,
        })
    }

    /// Emit `event` only while notifications are enabled.
    pub fn notify(&self, settings: &Settings, event: PresentationEvent) -> bool {
        if !settings.notifications_enabled {
            return false;
        }
        lock(&self.inner).emitter.emit(event);
        true
    }

    /// Silence limit alerts for `minutes` (at least one). Replaces any
    /// running snooze. Returns the effective minutes. While suspended the
    /// window is recorded but no resume is armed; it lapses on its own.
    pub fn snooze(&self, minutes: u32) -> u32 {
        let minutes = minutes.max(MIN_SNOOZE_MINUTES);
        let duration = Duration::from_secs(u64::from(minutes) * 60);
        let weak = Arc::downgrade(&self.inner);

        let mut inner = lock(&self.inner);
        inner.state.stop_alerting();
        inner.state.cancel_snooze_timer();
        inner.state.snooze_generation += 1;
        inner.state.snooze_until = Some(Instant::now() + duration);

        if inner.state.suspended {
            log_info!("Snooze of {minutes} minutes recorded while suspended");
        } else {
            let generation = inner.state.snooze_generation;
            inner.state.snooze_task = Some(ScheduledTask::spawn_once(
                "snooze-resume",
                duration,
                async move {
                    if let Some(inner) = weak.upgrade() {
                        resume_after_snooze(&inner, minutes, generation);
                    }
                },
            ));
        }
        inner.emitter.emit(PresentationEvent::SnoozeStarted { minutes });
        info!("Alerts snoozed for {minutes} minutes");
        minutes
    }

    /// Suspend: cancel the repeat task and the snooze timer, leave
    /// `Alerting`, and ignore evaluations until `activate`. A running snooze
    /// window still suppresses alerts until it lapses.
    pub fn stop(&self) {
        let mut inner = lock(&self.inner);
        inner.state.stop_alerting();
        inner.state.cancel_snooze_timer();
        inner.state.suspended = true;
        log_info!("Alert scheduler suspended");
    }

    /// Accept evaluations again after `stop`.
    pub fn activate(&self) {
        let mut inner = lock(&self.inner);
        if std::mem::replace(&mut inner.state.suspended, false) {
            log_info!("Alert scheduler active");
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        lock(&self.inner).state.status(Instant::now())
    }

    pub fn is_alerting(&self) -> bool {
        lock(&self.inner).state.alerting
    }
}

fn evaluate_locked(inner: &mut SchedulerInner, weak: &Weak<Mutex<SchedulerInner>>, now: Instant) {
    if inner.state.suspended {
        return;
    }
    let Some(inputs) = inner.last_inputs.clone() else {
        return;
    };
    let Some((time_exceeded, reels_exceeded)) = inputs.exceeded() else {
        return;
    };
    if inner.state.is_snoozed(now) {
        return;
    }

    let exceeded = time_exceeded || reels_exceeded;
    match (exceeded, inner.state.alerting) {
        (true, false) => start_alerting(inner, weak, time_exceeded, reels_exceeded),
        (true, true) => {}
        (false, true) => {
            inner.state.stop_alerting();
            log_info!("Limits no longer exceeded, alerts stopped");
            if inner.state.positive_spaced(now, inner.config.positive_cooldown) {
                emit_positive(inner, now);
            }
        }
        (false, false) => maybe_encourage(inner, &inputs, now),
    }
}

fn start_alerting(
    inner: &mut SchedulerInner,
    weak: &Weak<Mutex<SchedulerInner>>,
    time_exceeded: bool,
    reels_exceeded: bool,
) {
    inner.state.alerting = true;
    inner.state.alert_fire_count = 0;
    info!("Limits exceeded (time: {time_exceeded}, reels: {reels_exceeded}), alerting");

    fire_alert(inner, time_exceeded, reels_exceeded);

    let weak = weak.clone();
    inner.state.repeat_task = Some(ScheduledTask::spawn_interval(
        "limit-alert-repeat",
        inner.config.repeat_interval,
        move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    repeat_alert(&inner);
                }
            }
        },
    ));
}

fn repeat_alert(inner: &Mutex<SchedulerInner>) {
    let mut inner = lock(inner);
    if !inner.state.alerting || inner.state.suspended || inner.state.is_snoozed(Instant::now()) {
        return;
    }
    let exceeded = inner.last_inputs.as_ref().and_then(LimitInputs::exceeded);
    match exceeded {
        Some((false, false)) => {
            inner.state.stop_alerting();
        }
        Some((time_exceeded, reels_exceeded)) => fire_alert(&mut inner, time_exceeded, reels_exceeded),
        // Limits or notifications were switched off: stay quiet.
        None => {}
    }
}

fn fire_alert(inner: &mut SchedulerInner, time_exceeded: bool, reels_exceeded: bool) {
    inner.state.alert_fire_count += 1;
    let alert_count = inner.state.alert_fire_count;
    inner.emitter.emit(PresentationEvent::LimitExceeded {
        time_exceeded,
        reels_exceeded,
        alert_count,
    });
}

fn maybe_encourage(inner: &mut SchedulerInner, inputs: &LimitInputs, now: Instant) {
    let every = inner.config.encouragement_every;
    let watched = inputs.lifetime_watched;
    if every == 0 || watched == 0 || watched % every != 0 {
        return;
    }
    if !inner.state.positive_spaced(now, inner.config.encouragement_spacing) {
        return;
    }
    let probability = inner.config.encouragement_probability.clamp(0.0, 1.0);
    if inner.rng.gen_bool(probability) {
        emit_positive(inner, now);
    }
}

fn emit_positive(inner: &mut SchedulerInner, now: Instant) {
    inner.state.last_positive_at = Some(now);
    inner.emitter.emit(PresentationEvent::PositiveReinforcement);
}

fn resume_after_snooze(inner_arc: &Arc<Mutex<SchedulerInner>>, minutes: u32, generation: u64) {
    let weak = Arc::downgrade(inner_arc);
    let mut inner = lock(inner_arc);
    // A newer snooze or a suspend got the lock first.
    if inner.state.snooze_generation != generation || inner.state.suspended {
        log_info!("Stale snooze resume ignored");
        return;
    }
    // Already fired; dropping only signals its own token.
    drop(inner.state.snooze_task.take());
    inner.state.snooze_until = None;
    info!("Snooze of {minutes} minutes ended");

    evaluate_locked(&mut inner, &weak, Instant::now());
    inner.emitter.emit(PresentationEvent::SnoozeEnded { minutes });
}
