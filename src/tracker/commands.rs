//! Inbound frames from the host adapter and the settings surface, and the
//! replies sent back.

use serde::{Deserialize, Serialize};

use crate::{
    alerts::SchedulerStatus,
    detection::DetectionStats,
    dom::{ElementSpec, NodeId, Rect},
    settings::Settings,
    stats::StatsSummary,
};

use super::ReelTracker;

/// Structural, playback and visibility changes replayed from the host page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    /// Append `element` under `parent` (the root when absent).
    Insert {
        #[serde(default)]
        parent: Option<NodeId>,
        element: ElementSpec,
    },
    Remove { node: NodeId },
    Resize { node: NodeId, rect: Rect },
    Play { node: NodeId },
    Pause { node: NodeId },
    Ended { node: NodeId },
    Visibility { hidden: bool },
}

/// Messages from the settings surface.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum ControlMessage {
    ToggleExtension(bool),
    UpdateSettings,
    Snooze(u32),
    ResetStats,
    GetStats,
    Debug,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub summary: StatsSummary,
    pub scheduler: SchedulerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awareness: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugReport {
    pub enabled: bool,
    pub tracked_elements: usize,
    pub subscriptions: usize,
    pub playing: usize,
    pub active_entity: Option<String>,
    pub detection: DetectionStats,
    pub scheduler: SchedulerStatus,
    pub settings: Settings,
    pub store: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reply", rename_all = "camelCase")]
pub enum ControlReply {
    #[serde(rename_all = "camelCase")]
    Toggled { enabled: bool },
    SettingsUpdated(Settings),
    #[serde(rename_all = "camelCase")]
    Snoozed { minutes: u32 },
    StatsReset,
    Stats(StatsReport),
    Debug(DebugReport),
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

/// One NDJSON line from the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Control(ControlMessage),
    Host(HostEvent),
}

/// Dispatch a control message; failures become `ControlReply::Error`.
pub async fn handle_control(tracker: &ReelTracker, message: ControlMessage) -> ControlReply {
    let result = match message {
        ControlMessage::ToggleExtension(enabled) => tracker
            .set_enabled(enabled)
            .await
            .map(|()| ControlReply::Toggled { enabled }),
        ControlMessage::UpdateSettings => tracker
            .reload_settings()
            .await
            .map(ControlReply::SettingsUpdated),
        ControlMessage::Snooze(minutes) => Ok(ControlReply::Snoozed {
            minutes: tracker.snooze(minutes),
        }),
        ControlMessage::ResetStats => tracker.reset_stats().await.map(|()| ControlReply::StatsReset),
        ControlMessage::GetStats => tracker.stats_report().await.map(ControlReply::Stats),
        ControlMessage::Debug => Ok(ControlReply::Debug(tracker.debug_report().await)),
    };

    result.unwrap_or_else(|err| ControlReply::Error {
        message: format!("{err:#}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_messages_use_action_and_data() {
        let toggle: ControlMessage =
            serde_json::from_value(json!({ "action": "toggleExtension", "data": false })).unwrap();
        assert_eq!(toggle, ControlMessage::ToggleExtension(false));

        let snooze: ControlMessage =
            serde_json::from_value(json!({ "action": "snooze", "data": 15 })).unwrap();
        assert_eq!(snooze, ControlMessage::Snooze(15));

        let update: ControlMessage =
            serde_json::from_value(json!({ "action": "updateSettings" })).unwrap();
        assert_eq!(update, ControlMessage::UpdateSettings);
    }

    #[test]
    fn frames_pick_control_or_host() {
        let frame: Frame = serde_json::from_str(r#"{"action":"getStats"}"#).unwrap();
        assert_eq!(frame, Frame::Control(ControlMessage::GetStats));

        let frame: Frame = serde_json::from_str(
            r#"{"type":"insert","parent":0,"element":{"tag":"video","attrs":{"playsinline":""},"rect":{"top":0,"left":0,"width":360,"height":640}}}"#,
        )
        .unwrap();
        match frame {
            Frame::Host(HostEvent::Insert { parent, element }) => {
                assert_eq!(parent, Some(NodeId(0)));
                assert_eq!(element.tag, "video");
                assert_eq!(element.rect.height, 640.0);
            }
            other => panic!("unexpected frame {other:?}"),
        }

        let frame: Frame = serde_json::from_str(r#"{"type":"visibility","hidden":true}"#).unwrap();
        assert_eq!(frame, Frame::Host(HostEvent::Visibility { hidden: true }));
    }

    #[test]
    fn unknown_frames_are_rejected() {
        assert!(serde_json::from_str::<Frame>(r#"{"type":"scroll"}"#).is_err());
        assert!(serde_json::from_str::<Frame>(r#"{"action":"explode"}"#).is_err());
    }

    #[test]
    fn replies_are_tagged() {
        let value = serde_json::to_value(ControlReply::Toggled { enabled: true }).unwrap();
        assert_eq!(value, json!({ "reply": "toggled", "enabled": true }));

        let value = serde_json::to_value(ControlReply::StatsReset).unwrap();
        assert_eq!(value, json!({ "reply": "statsReset" }));
    }
}
