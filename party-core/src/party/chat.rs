//! Message log helpers: input cleanup, the bounded window and announcements

use serde_json::Value;
use tracing::debug;

use crate::sync::ChatMessage;

/// Trim and cap user text. `None` if nothing is left.
pub fn clean_text(text: &str, limit: usize) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(limit).collect())
}

/// Display names follow the same rule with their own limit
pub fn clean_name(name: &str, limit: usize) -> Option<String> {
    clean_text(name, limit).map(|n| n.trim_end().to_string())
}

/// Most recent `limit` messages of a log snapshot, oldest first
pub fn message_window(log: Option<Value>, limit: usize) -> Vec<ChatMessage> {
    let Some(Value::Object(entries)) = log else {
        return Vec::new();
    };

    let mut messages: Vec<ChatMessage> = entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<ChatMessage>(value) {
            Ok(mut message) => {
                message.id = key;
                Some(message)
            }
            Err(e) => {
                debug!("Skipping malformed message {}: {}", key, e);
                None
            }
        })
        .collect();

    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    let skip = messages.len().saturating_sub(limit);
    messages.split_off(skip)
}

pub(crate) fn format_position(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

pub(crate) fn joined(name: &str) -> String {
    format!("{} joined the room", name)
}

pub(crate) fn left(name: &str) -> String {
    format!("{} left the room", name)
}

pub(crate) fn played(name: &str) -> String {
    format!("{} started playback", name)
}

pub(crate) fn paused(name: &str) -> String {
    format!("{} paused playback", name)
}

pub(crate) fn seeked(name: &str, position: f64) -> String {
    format!("{} jumped to {}", name, format_position(position))
}

pub(crate) fn episode_changed(name: &str, episode: u32) -> String {
    format!("{} switched to episode {}", name, episode + 1)
}

pub(crate) fn server_changed(name: &str, server: u32) -> String {
    format!("{} switched to server {}", name, server + 1)
}

pub(crate) fn host_stalled(name: &str) -> String {
    format!("{} is buffering, playback paused for everyone", name)
}

pub(crate) fn new_host(name: &str) -> String {
    format!("{} is now the host", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  hi  ", 500).as_deref(), Some("hi"));
        assert_eq!(clean_text("   ", 500), None);
        assert_eq!(clean_text("héllo wörld", 5).as_deref(), Some("héllo"));
        assert_eq!(clean_name("Movie Buff Extraordinaire", 11).as_deref(), Some("Movie Buff"));
    }

    #[test]
    fn test_window_orders_and_bounds() {
        let log = json!({
            "k3": { "userId": "a", "userName": "A", "text": "third", "timestamp": 30 },
            "k1": { "userId": "a", "userName": "A", "text": "first", "timestamp": 10 },
            "k2": { "userId": "b", "userName": "B", "text": "second", "timestamp": 20, "system": true },
            "bad": { "text": "no author" }
        });

        let all = message_window(Some(log.clone()), 100);
        let texts: Vec<_> = all.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(all[0].id, "k1");
        assert!(all[1].system);

        let last_two = message_window(Some(log), 2);
        let texts: Vec<_> = last_two.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third"]);
    }

    #[test]
    fn test_window_of_missing_log() {
        assert!(message_window(None, 100).is_empty());
    }

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(65.4), "1:05");
        assert_eq!(format_position(3725.0), "1:02:05");
        assert_eq!(format_position(-3.0), "0:00");
    }
}
