//! Presentation events. The core decides *that* something should be shown;
//! rendering belongs to whoever drains the channel.

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PresentationEvent {
    #[serde(rename_all = "camelCase")]
    RepeatView { id: String, count: u64 },
    #[serde(rename_all = "camelCase")]
    ScrollMilestone { count: u64 },
    #[serde(rename_all = "camelCase")]
    LimitExceeded {
        time_exceeded: bool,
        reels_exceeded: bool,
        alert_count: u64,
    },
    PositiveReinforcement,
    #[serde(rename_all = "camelCase")]
    SnoozeStarted { minutes: u32 },
    #[serde(rename_all = "camelCase")]
    SnoozeEnded { minutes: u32 },
}

impl PresentationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PresentationEvent::RepeatView { .. } => "repeat-view",
            PresentationEvent::ScrollMilestone { .. } => "scroll-milestone",
            PresentationEvent::LimitExceeded { .. } => "limit-exceeded",
            PresentationEvent::PositiveReinforcement => "positive-reinforcement",
            PresentationEvent::SnoozeStarted { .. } => "snooze-started",
            PresentationEvent::SnoozeEnded { .. } => "snooze-ended",
        }
    }
}

/// Cheap, cloneable sending half handed to every component that can raise
/// an event.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<PresentationEvent>,
}

impl EventEmitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PresentationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: PresentationEvent) {
        log::debug!("emit {}: {:?}", event.name(), event);
        // A dropped renderer must not stall tracking.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<PresentationEvent>) -> Vec<PresentationEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(PresentationEvent::LimitExceeded {
            time_exceeded: true,
            reels_exceeded: false,
            alert_count: 2,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "event": "limitExceeded", "timeExceeded": true, "reelsExceeded": false, "alertCount": 2 })
        );

        let value = serde_json::to_value(PresentationEvent::PositiveReinforcement).unwrap();
        assert_eq!(value, json!({ "event": "positiveReinforcement" }));
    }

    #[test]
    fn emit_without_receiver_is_silent() {
        let (emitter, rx) = EventEmitter::channel();
        drop(rx);
        emitter.emit(PresentationEvent::ScrollMilestone { count: 5 });
    }
}
