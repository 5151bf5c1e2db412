//! Inbound state reports from the player adapter

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Discriminator carried by every adapter report
pub const REPORT_TAG: &str = "watchPartySync";

/// Why the adapter sent a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportEvent {
    /// Periodic report from the adapter's own timer
    Heartbeat,
    /// Answer to a `getTime` command
    TimeUpdate,
    Play,
    Pause,
    Seeked,
    /// Media element started waiting for data
    Buffering,
}

impl ReportEvent {
    /// Discrete media events, as opposed to periodic state reports
    pub fn is_discrete(&self) -> bool {
        matches!(
            self,
            ReportEvent::Play | ReportEvent::Pause | ReportEvent::Seeked | ReportEvent::Buffering
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    #[serde(rename = "type")]
    tag: String,
    event: ReportEvent,
    current_time: f64,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    paused: Option<bool>,
    #[serde(default)]
    buffering: Option<bool>,
}

/// One report from the player surface
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerReport {
    pub event: ReportEvent,
    /// Position in seconds
    pub current_time: f64,
    /// Media length in seconds, when the player knows it
    pub duration: Option<f64>,
    pub paused: bool,
    pub buffering: bool,
}

impl PlayerReport {
    /// Parse a cross-boundary message. Anything that isn't a tagged sync
    /// report (other scripts talk over the same channel) yields `None`.
    pub fn from_message(message: &Value) -> Option<Self> {
        if let Value::String(text) = message {
            let parsed: Value = serde_json::from_str(text).ok()?;
            return Self::from_message(&parsed);
        }

        if message.get("type").and_then(Value::as_str) != Some(REPORT_TAG) {
            return None;
        }

        let raw: RawReport = match serde_json::from_value(message.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Dropping malformed player report: {}", e);
                return None;
            }
        };
        debug_assert_eq!(raw.tag, REPORT_TAG);

        if !raw.current_time.is_finite() {
            return None;
        }

        // Event-only reports may omit the flags; the event itself implies them
        let paused = match raw.event {
            ReportEvent::Play => raw.paused.unwrap_or(false),
            ReportEvent::Pause => raw.paused.unwrap_or(true),
            _ => raw.paused.unwrap_or(false),
        };
        let buffering = raw.buffering.unwrap_or(raw.event == ReportEvent::Buffering);

        Some(Self {
            event: raw.event,
            current_time: raw.current_time,
            duration: raw.duration.filter(|d| d.is_finite() && *d > 0.0),
            paused,
            buffering,
        })
    }

    /// Whether the media has played through to its end
    pub fn is_at_end(&self) -> bool {
        match self.duration {
            Some(duration) => self.paused && self.current_time >= duration - 0.5,
            None => false,
        }
    }
}
