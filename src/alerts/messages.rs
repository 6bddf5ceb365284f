//! User-facing copy for presentation events.

use rand::{seq::SliceRandom, Rng};
use serde::Serialize;

use crate::{events::PresentationEvent, settings::Settings};

const POSITIVE_POOL: [&str; 4] = [
    "Great job staying within your limits today! 🌟",
    "You're doing amazing with your screen time balance! 💪",
    "Mindful scrolling in action! Keep it up! ✨",
    "Your future self will thank you for this balance! 🙏",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Notice {
    fn line(message: impl Into<String>) -> Self {
        Self {
            title: None,
            message: message.into(),
            suggestion: None,
        }
    }
}

pub fn render<R: Rng + ?Sized>(event: &PresentationEvent, settings: &Settings, rng: &mut R) -> Notice {
    match event {
        PresentationEvent::RepeatView { count, .. } => {
            Notice::line(format!("You've watched this reel {count} times already!"))
        }
        PresentationEvent::ScrollMilestone { count } => Notice::line(milestone_line(*count)),
        PresentationEvent::LimitExceeded {
            time_exceeded,
            reels_exceeded,
            ..
        } => limit_notice(*time_exceeded, *reels_exceeded, settings),
        PresentationEvent::PositiveReinforcement => Notice::line(positive_line(rng)),
        PresentationEvent::SnoozeStarted { minutes } => {
            Notice::line(format!("✅ Reminders snoozed for {minutes} {}", plural_minutes(*minutes)))
        }
        PresentationEvent::SnoozeEnded { minutes } => Notice::line(snooze_ended_line(*minutes)),
    }
}

pub fn limit_notice(time_exceeded: bool, reels_exceeded: bool, settings: &Settings) -> Notice {
    let (message, suggestion) = match (time_exceeded, reels_exceeded) {
        (true, true) => (
            format!(
                "You've reached both your {}min time and {} reel limits today.",
                settings.time_limit_minutes, settings.reel_limit
            ),
            "Consider taking a meaningful break to recharge.",
        ),
        (true, false) => (
            format!(
                "You've reached your {} minute daily time limit for watching reels.",
                settings.time_limit_minutes
            ),
            "Try some offline activities or hobbies instead.",
        ),
        _ => (
            format!("You've scrolled through {} reels today.", settings.reel_limit),
            "Your brain deserves a break from the scroll.",
        ),
    };

    Notice {
        title: Some("Daily Limit Reached".to_string()),
        message,
        suggestion: Some(suggestion.to_string()),
    }
}

pub fn milestone_line(count: u64) -> String {
    match count {
        10 | 50 => format!("You've viewed {count} reels today."),
        _ => format!("You've scrolled through {count} reels."),
    }
}

pub fn positive_line<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    POSITIVE_POOL.choose(rng).copied().unwrap_or(POSITIVE_POOL[0])
}

/// Awareness line shown next to the lifetime scrolled counter.
pub fn scroll_awareness(total_scrolled: u64) -> Option<String> {
    match total_scrolled {
        n if n >= 50 => Some(format!(
            "You've scrolled through {n} reels today. Consider taking a break to focus on other activities."
        )),
        n if n >= 25 => Some(format!(
            "You've viewed {n} reels. Remember to balance your screen time with other productive tasks."
        )),
        n if n >= 10 => Some(format!(
            "You've scrolled through {n} reels. Stay mindful of your viewing habits."
        )),
        _ => None,
    }
}

fn snooze_ended_line(minutes: u32) -> String {
    if minutes > 0 {
        format!("🔔 Reminders resumed after {minutes} {}.", plural_minutes(minutes))
    } else {
        "🔔 Reminders resumed.".to_string()
    }
}

fn plural_minutes(minutes: u32) -> &'static str {
    if minutes == 1 {
        "minute"
    } else {
        "minutes"
    }
}

/// `Xm Ys`, or just `Ys` under a minute.
pub fn format_duration(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
