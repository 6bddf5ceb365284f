use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
    Ended,
    Hidden,
}

/// Why a playing interval ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Pause,
    Ended,
    Hidden,
    Removed,
}

impl StopReason {
    fn next_state(self) -> PlaybackState {
        match self {
            StopReason::Pause => PlaybackState::Paused,
            StopReason::Ended => PlaybackState::Ended,
            StopReason::Hidden => PlaybackState::Hidden,
            StopReason::Removed => PlaybackState::Idle,
        }
    }
}

/// Watch session for one live element.
#[derive(Debug, Clone)]
pub struct Session {
    pub entity_id: String,
    state: PlaybackState,
    /// Set only while `Playing`.
    play_started_at: Option<Instant>,
    committed: bool,
    has_played: bool,
}

impl Session {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: PlaybackState::Idle,
            play_started_at: None,
            committed: false,
            has_played: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Enter `Playing` and arm a new interval. Returns true on the first
    /// play this element has seen. A repeated play while already playing
    /// keeps the running interval.
    pub fn play(&mut self, now: Instant) -> bool {
        if self.is_playing() {
            return false;
        }
        self.state = PlaybackState::Playing;
        self.play_started_at = Some(now);
        self.committed = false;
        !std::mem::replace(&mut self.has_played, true)
    }

    /// Leave `Playing`. Returns the interval length in milliseconds if there
    /// was an uncommitted one; other states ignore the stop.
    pub fn stop(&mut self, reason: StopReason, now: Instant) -> Option<u64> {
        if !self.is_playing() {
            return None;
        }
        self.state = reason.next_state();
        let started = self.play_started_at.take()?;
        if self.committed {
            return None;
        }
        self.committed = true;
        Some(now.saturating_duration_since(started).as_millis() as u64)
    }

    /// Document visible again: a hidden session waits for the next play.
    pub fn on_visible(&mut self) {
        if self.state == PlaybackState::Hidden {
            self.state = PlaybackState::Idle;
        }
    }

    pub fn elapsed_ms(&self, now: Instant) -> Option<u64> {
        self.play_started_at
            .map(|started| now.saturating_duration_since(started).as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[test]
    fn play_pause_commits_interval_once() {
        let start = Instant::now();
        let mut session = Session::new("A");

        assert!(session.play(start));
        assert_eq!(session.elapsed_ms(start + Duration::from_millis(700)), Some(700));
        assert_eq!(
            session.stop(StopReason::Pause, start + Duration::from_millis(1_500)),
            Some(1_500)
        );
        assert_eq!(session.state(), PlaybackState::Paused);
        assert_eq!(session.elapsed_ms(start), None);

        assert_eq!(session.stop(StopReason::Ended, start + Duration::from_secs(3)), None);
        assert_eq!(session.state(), PlaybackState::Paused);
    }

    #[test]
    fn replay_arms_new_subsession() {
        let start = Instant::now();
        let mut session = Session::new("A");
        session.play(start);
        session.stop(StopReason::Ended, start + Duration::from_secs(2));

        assert!(!session.play(start + Duration::from_secs(5)));
        assert!(session.is_playing());
        assert_eq!(
            session.stop(StopReason::Pause, start + Duration::from_secs(9)),
            Some(4_000)
        );
    }

    #[test]
    fn duplicate_play_keeps_running_interval() {
        let start = Instant::now();
        let mut session = Session::new("A");
        session.play(start);
        session.play(start + Duration::from_secs(1));
        assert_eq!(
            session.stop(StopReason::Hidden, start + Duration::from_secs(3)),
            Some(3_000)
        );
        assert_eq!(session.state(), PlaybackState::Hidden);

        session.on_visible();
        assert_eq!(session.state(), PlaybackState::Idle);
    }

    #[test]
    fn stop_without_play_is_ignored() {
        let mut session = Session::new("A");
        assert_eq!(session.stop(StopReason::Pause, Instant::now()), None);
        assert_eq!(session.state(), PlaybackState::Idle);
    }
}
