use std::collections::HashMap;

use chrono::{DateTime, Local};
use tokio::time::Instant;

use crate::{
    alerts::{LimitAlertScheduler, LimitInputs},
    detection::Detected,
    dom::NodeId,
    events::PresentationEvent,
    settings::Settings,
    stats::{PendingWrites, StatsAggregator, REPEAT_VIEW_THRESHOLD},
};

use super::{
    registry::ListenerRegistry,
    state::{Session, StopReason},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// What a session transition needs from the rest of the tracker.
pub struct SessionContext<'a> {
    pub stats: &'a mut StatsAggregator,
    pub settings: &'a Settings,
    pub now: Instant,
    pub wall: DateTime<Local>,
}

impl SessionContext<'_> {
    fn limit_inputs(&self) -> LimitInputs {
        LimitInputs {
            settings: *self.settings,
            daily: self.stats.daily().cloned(),
            lifetime_watched: self.stats.lifetime_watched(),
        }
    }
}

/// Turns playback events of subscribed elements into committed watches.
pub struct SessionTracker {
    registry: ListenerRegistry,
    sessions: HashMap<NodeId, Session>,
    active: Option<NodeId>,
    scheduler: LimitAlertScheduler,
}

impl SessionTracker {
    pub fn new(scheduler: LimitAlertScheduler) -> Self {
        Self {
            registry: ListenerRegistry::new(),
            sessions: HashMap::new(),
            active: None,
            scheduler,
        }
    }

    /// Subscribe a freshly tagged element. Re-encountering an entity that was
    /// already watched three or more times raises a repeat reminder.
    pub fn attach(&mut self, detected: &Detected, cx: &mut SessionContext<'_>) -> bool {
        let id = detected.identity.id.as_str();
        if self.registry.subscribe(id, detected.node).is_none() {
            return false;
        }
        self.sessions.insert(detected.node, Session::new(id));

        if detected.identity.is_advisory() {
            log_debug!("{} tracked under layout-derived id {}", detected.node, id);
        }

        let view_count = cx.stats.ensure_entity(id).view_count;
        if view_count >= REPEAT_VIEW_THRESHOLD {
            self.scheduler.notify(
                cx.settings,
                PresentationEvent::RepeatView {
                    id: id.to_string(),
                    count: view_count,
                },
            );
        }
        true
    }

    pub fn on_play(&mut self, node: NodeId, cx: &mut SessionContext<'_>) -> PendingWrites {
        let mut writes = PendingWrites::new();
        let Some(session) = self.sessions.get_mut(&node) else {
            return writes;
        };
        let first_play = session.play(cx.now);
        self.active = Some(node);

        if !first_play {
            return writes;
        }

        let id = session.entity_id.clone();
        if let Some(record) = cx.stats.record_scroll(&id, cx.wall.date_naive()) {
            log_info!("{} scrolled, total {}", id, record.total_scrolled);
            writes.merge(record.writes);
            self.scheduler.scroll_milestone(record.total_scrolled, cx.settings);
            self.scheduler.evaluate(cx.limit_inputs());
        }
        writes
    }

    /// Pause or end on one element.
    pub fn on_stop(&mut self, node: NodeId, reason: StopReason, cx: &mut SessionContext<'_>) -> PendingWrites {
        let Some(session) = self.sessions.get_mut(&node) else {
            return PendingWrites::new();
        };
        match session.stop(reason, cx.now) {
            Some(duration_ms) => {
                let id = session.entity_id.clone();
                self.commit(&id, duration_ms, cx)
            }
            None => PendingWrites::new(),
        }
    }

    /// The document went to the background: commit everything playing.
    pub fn on_hidden(&mut self, cx: &mut SessionContext<'_>) -> PendingWrites {
        let playing: Vec<NodeId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_playing())
            .map(|(node, _)| *node)
            .collect();

        let mut writes = PendingWrites::new();
        for node in playing {
            writes.merge(self.on_stop(node, StopReason::Hidden, cx));
        }
        writes
    }

    pub fn on_visible(&mut self) {
        self.sessions.values_mut().for_each(Session::on_visible);
    }

    /// Elements left the document: commit what was playing and unsubscribe.
    pub fn on_removed(&mut self, nodes: &[NodeId], cx: &mut SessionContext<'_>) -> PendingWrites {
        let mut writes = PendingWrites::new();
        for node in nodes {
            let Some((entity_id, subscription)) = self.registry.unsubscribe(*node) else {
                continue;
            };
            log_debug!("{} unsubscribed from {} ({})", node, entity_id, subscription.handle);
            writes.merge(self.on_stop(*node, StopReason::Removed, cx));
            self.sessions.remove(node);
            if self.active == Some(*node) {
                self.active = None;
            }
        }
        writes
    }

    fn commit(&mut self, id: &str, duration_ms: u64, cx: &mut SessionContext<'_>) -> PendingWrites {
        let outcome = cx.stats.commit_watch(id, duration_ms, cx.wall);
        if !outcome.counted {
            log_debug!("{} watch of {}ms ignored", id, duration_ms);
            return outcome.writes;
        }

        log_info!("{} watched {}ms, {} view(s)", id, duration_ms, outcome.view_count);
        if outcome.repeat_crossed {
            self.scheduler.notify(
                cx.settings,
                PresentationEvent::RepeatView {
                    id: id.to_string(),
                    count: outcome.view_count,
                },
            );
        }
        self.scheduler.evaluate(cx.limit_inputs());
        outcome.writes
    }

    /// Drop every subscription and session without committing.
    pub fn detach_all(&mut self) -> usize {
        self.sessions.clear();
        self.active = None;
        self.registry.detach_all()
    }

    pub fn active_entity(&self) -> Option<&str> {
        self.active
            .and_then(|node| self.sessions.get(&node))
            .map(|session| session.entity_id.as_str())
    }

    /// How long the active element has been playing in its current interval.
    pub fn active_elapsed_ms(&self, now: Instant) -> Option<u64> {
        self.active
            .and_then(|node| self.sessions.get(&node))
            .and_then(|session| session.elapsed_ms(now))
    }

    pub fn session(&self, node: NodeId) -> Option<&Session> {
        self.sessions.get(&node)
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    pub fn playing_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_playing()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        detection::DetectionEngine,
        dom::{Document, ElementSpec, Rect},
        events::{drain, EventEmitter},
        session::PlaybackState,
        store::Store,
        tasks::settle,
    };
    use chrono::TimeZone;
    use tokio::{
        sync::mpsc::UnboundedReceiver,
        time::{self, Duration},
    };

    struct Fixture {
        doc: Document,
        engine: DetectionEngine,
        tracker: SessionTracker,
        stats: StatsAggregator,
        settings: Settings,
        rx: UnboundedReceiver<PresentationEvent>,
    }

    fn wall() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).single().unwrap()
    }

    fn cx<'a>(stats: &'a mut StatsAggregator, settings: &'a Settings) -> SessionContext<'a> {
        SessionContext {
            stats,
            settings,
            now: Instant::now(),
            wall: wall(),
        }
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Store::open_in_memory().unwrap();
            let mut stats = StatsAggregator::new(store);
            stats.load(wall().date_naive()).await;
            let (emitter, rx) = EventEmitter::channel();
            Self {
                doc: Document::new(),
                engine: DetectionEngine::new(),
                tracker: SessionTracker::new(LimitAlertScheduler::new(emitter)),
                stats,
                settings: Settings::default(),
                rx,
            }
        }

        fn add_reel(&mut self, code: &str) -> NodeId {
            let root = self.doc.root();
            let article = self.doc.insert(root, ElementSpec::new("article")).unwrap();
            self.doc
                .insert(article, ElementSpec::new("a").attr("href", format!("/reel/{code}/")))
                .unwrap();
            let video = self
                .doc
                .insert(
                    article,
                    ElementSpec::new("video")
                        .attr("playsinline", "")
                        .rect(Rect::new(0.0, 0.0, 360.0, 640.0)),
                )
                .unwrap();

            for detected in self.engine.on_structural_change(&self.doc, &[article]) {
                self.tracker
                    .attach(&detected, &mut cx(&mut self.stats, &self.settings));
            }
            video
        }

        fn play(&mut self, node: NodeId) -> PendingWrites {
            self.tracker.on_play(node, &mut cx(&mut self.stats, &self.settings))
        }

        fn stop(&mut self, node: NodeId, reason: StopReason) -> PendingWrites {
            self.tracker
                .on_stop(node, reason, &mut cx(&mut self.stats, &self.settings))
        }

        async fn watch(&mut self, node: NodeId, ms: u64) {
            self.play(node).wait().await.unwrap();
            time::advance(Duration::from_millis(ms)).await;
            self.stop(node, StopReason::Pause).wait().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_watches_count_three_views_and_one_repeat() {
        let mut fx = Fixture::new().await;
        let video = fx.add_reel("A");

        for _ in 0..3 {
            fx.watch(video, 1_500).await;
        }

        let entity = fx.stats.entity("A").unwrap();
        assert_eq!(entity.view_count, 3);
        assert_eq!(entity.total_watch_time_ms, 4_500);
        assert_eq!(fx.stats.daily().unwrap().reels_watched, 3);
        assert_eq!(fx.stats.total_scrolled(), 1);

        let repeats: Vec<_> = drain(&mut fx.rx)
            .into_iter()
            .filter(|e| matches!(e, PresentationEvent::RepeatView { .. }))
            .collect();
        assert_eq!(
            repeats,
            vec![PresentationEvent::RepeatView {
                id: "A".into(),
                count: 3
            }]
        );

        fx.watch(video, 1_500).await;
        assert!(drain(&mut fx.rx)
            .iter()
            .all(|e| !matches!(e, PresentationEvent::RepeatView { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn tap_under_a_second_counts_scroll_only() {
        let mut fx = Fixture::new().await;
        let video = fx.add_reel("A");
        fx.watch(video, 999).await;

        assert_eq!(fx.stats.entity("A").unwrap().view_count, 0);
        assert_eq!(fx.stats.daily().unwrap().reels_watched, 0);
        assert_eq!(fx.stats.daily().unwrap().reels_scrolled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_document_commits_playing_sessions() {
        let mut fx = Fixture::new().await;
        let first = fx.add_reel("A");
        let second = fx.add_reel("B");

        for node in [first, second] {
            fx.play(node).wait().await.unwrap();
        }
        assert_eq!(fx.tracker.active_entity(), Some("B"));
        time::advance(Duration::from_secs(2)).await;

        fx.tracker
            .on_hidden(&mut cx(&mut fx.stats, &fx.settings))
            .wait()
            .await
            .unwrap();
        assert_eq!(fx.tracker.playing_count(), 0);
        assert_eq!(fx.stats.entity("A").unwrap().total_watch_time_ms, 2_000);
        assert_eq!(fx.stats.entity("B").unwrap().view_count, 1);
        assert_eq!(fx.tracker.session(first).unwrap().state(), PlaybackState::Hidden);

        fx.tracker.on_visible();
        assert_eq!(fx.tracker.session(first).unwrap().state(), PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn removal_commits_and_unsubscribes() {
        let mut fx = Fixture::new().await;
        let video = fx.add_reel("A");
        fx.play(video).wait().await.unwrap();
        time::advance(Duration::from_millis(1_200)).await;

        let article = fx.doc.element(video).unwrap().parent().unwrap();
        let removed = fx.doc.remove(article).unwrap();
        fx.tracker
            .on_removed(&removed, &mut cx(&mut fx.stats, &fx.settings))
            .wait()
            .await
            .unwrap();

        assert_eq!(fx.stats.entity("A").unwrap().view_count, 1);
        assert_eq!(fx.tracker.subscription_count(), 0);
        assert_eq!(fx.tracker.active_entity(), None);

        // Events for the gone node are ignored.
        assert!(fx.play(video).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_nodes_are_ignored() {
        let mut fx = Fixture::new().await;
        let root = fx.doc.root();
        let stray = fx.doc.insert(root, ElementSpec::new("video")).unwrap();
        assert!(fx.play(stray).is_empty());
        assert_eq!(fx.stats.total_scrolled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_plays_drive_milestones_once_per_entity() {
        let mut fx = Fixture::new().await;
        let videos: Vec<NodeId> = (0..5).map(|i| fx.add_reel(&format!("R{i}"))).collect();

        for video in videos {
            fx.play(video).wait().await.unwrap();
            fx.stop(video, StopReason::Ended).wait().await.unwrap();
            assert!(fx.play(video).is_empty());
        }
        settle().await;

        assert_eq!(fx.stats.total_scrolled(), 5);
        let milestones: Vec<_> = drain(&mut fx.rx)
            .into_iter()
            .filter(|e| matches!(e, PresentationEvent::ScrollMilestone { .. }))
            .collect();
        assert_eq!(milestones, vec![PresentationEvent::ScrollMilestone { count: 5 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn reencountering_repeated_entity_reminds() {
        let mut fx = Fixture::new().await;
        for _ in 0..3 {
            let _ = fx.stats.commit_watch("A", 2_000, wall());
        }
        fx.add_reel("A");
        assert_eq!(
            drain(&mut fx.rx),
            vec![PresentationEvent::RepeatView {
                id: "A".into(),
                count: 3
            }]
        );
    }
}
