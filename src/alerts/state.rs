use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::tasks::ScheduledTask;

/// Transient alerting state. Never persisted.
#[derive(Default)]
pub struct SchedulerState {
    pub alerting: bool,
    pub alert_fire_count: u64,
    pub snooze_until: Option<Instant>,
    pub last_positive_at: Option<Instant>,
    /// Set while the pipeline is disabled; nothing is evaluated or armed.
    pub suspended: bool,
    /// Bumped by every snooze; a resume carrying an older value is stale.
    pub snooze_generation: u64,
    pub(super) repeat_task: Option<ScheduledTask>,
    pub(super) snooze_task: Option<ScheduledTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub suspended: bool,
    pub alerting: bool,
    pub alert_fire_count: u64,
    pub snooze_remaining_ms: Option<u64>,
}

impl SchedulerState {
    pub fn is_snoozed(&self, now: Instant) -> bool {
        self.snooze_until.map(|until| until > now).unwrap_or(false)
    }

    /// Leave `Alerting` and stop the repeat task. Returns whether it was
    /// alerting.
    pub fn stop_alerting(&mut self) -> bool {
        if let Some(task) = self.repeat_task.take() {
            task.cancel();
        }
        std::mem::replace(&mut self.alerting, false)
    }

    pub fn cancel_snooze_timer(&mut self) {
        if let Some(task) = self.snooze_task.take() {
            task.cancel();
        }
    }

    /// True when no positive event was shown within `spacing` of `now`.
    pub fn positive_spaced(&self, now: Instant, spacing: Duration) -> bool {
        self.last_positive_at
            .map(|last| now.saturating_duration_since(last) >= spacing)
            .unwrap_or(true)
    }

    pub fn status(&self, now: Instant) -> SchedulerStatus {
        SchedulerStatus {
            suspended: self.suspended,
            alerting: self.alerting,
            alert_fire_count: self.alert_fire_count,
            snooze_remaining_ms: self
                .snooze_until
                .filter(|until| *until > now)
                .map(|until| until.duration_since(now).as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snooze_expires_at_deadline() {
        let now = Instant::now();
        let state = SchedulerState {
            snooze_until: Some(now + Duration::from_secs(60)),
            ..SchedulerState::default()
        };
        assert!(state.is_snoozed(now));
        assert!(state.is_snoozed(now + Duration::from_millis(59_999)));
        assert!(!state.is_snoozed(now + Duration::from_secs(60)));
        assert_eq!(state.status(now).snooze_remaining_ms, Some(60_000));
    }

    #[test]
    fn positive_spacing_starts_open() {
        let now = Instant::now();
        let mut state = SchedulerState::default();
        assert!(state.positive_spaced(now, Duration::from_secs(3_600)));

        state.last_positive_at = Some(now);
        assert!(!state.positive_spaced(now + Duration::from_secs(1_800), Duration::from_secs(3_600)));
        assert!(state.positive_spaced(now + Duration::from_secs(3_600), Duration::from_secs(3_600)));
    }

    #[test]
    fn stop_alerting_reports_previous_state() {
        let mut state = SchedulerState {
            alerting: true,
            ..SchedulerState::default()
        };
        assert!(state.stop_alerting());
        assert!(!state.stop_alerting());
    }
}
