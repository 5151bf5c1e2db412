//! Room Store wire documents
//!
//! Everything in here is stored as JSON in the shared realtime database, one
//! document per room plus a message list per room. Field names are camelCase
//! on the wire so rooms written by the web client and by this crate are
//! interchangeable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Opaque participant identifier (stable per client storage scope)
pub type ParticipantId = String;

/// Lifecycle status of a room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Waiting,
    Playing,
    Paused,
    Ended,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Playing => "playing",
            RoomStatus::Paused => "paused",
            RoomStatus::Ended => "ended",
        }
    }
}

/// Shared playback record, written only by the current host.
///
/// `current_time` is the position *as of* `updated_at`, never "now".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    /// Position in seconds
    pub current_time: f64,
    pub is_playing: bool,
    /// Episode index into the selected server's episode list
    #[serde(default)]
    pub episode: u32,
    /// Server (source) index
    #[serde(default)]
    pub server: u32,
    /// Wall clock of the write, milliseconds since UNIX epoch
    pub updated_at: u64,
}

impl PlaybackState {
    /// Playback record of a freshly created room
    pub fn initial(now_ms: u64) -> Self {
        Self {
            current_time: 0.0,
            is_playing: false,
            episode: 0,
            server: 0,
            updated_at: now_ms,
        }
    }
}

/// A participant's entry in `members`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub name: String,
    pub joined_at: u64,
    #[serde(default)]
    pub is_host: bool,
}

/// Which movie a room is watching
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieRef {
    #[serde(rename = "movieSlug")]
    pub slug: String,
    #[serde(rename = "movieName", default)]
    pub name: String,
    #[serde(rename = "movieThumb", default)]
    pub thumb: String,
}

/// Full room document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Also the document key; older documents may omit it
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub movie: MovieRef,
    pub host_id: ParticipantId,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub status: RoomStatus,
    pub created_at: u64,
    pub playback: PlaybackState,
    /// Absent on the wire when empty
    #[serde(default)]
    pub members: HashMap<ParticipantId, Membership>,
    #[serde(default)]
    pub viewer_count: u32,
}

/// One entry of a room's message log. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Push key of the entry; filled in when reading, never written
    #[serde(default, skip_serializing)]
    pub id: String,
    pub user_id: ParticipantId,
    pub user_name: String,
    pub text: String,
    pub timestamp: u64,
    /// Join/leave/host-action announcements
    #[serde(default, skip_serializing_if = "is_false")]
    pub system: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ChatMessage {
    pub fn user(user_id: &str, user_name: &str, text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: String::new(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            text: text.into(),
            timestamp,
            system: false,
        }
    }

    pub fn system(user_id: &str, user_name: &str, text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            system: true,
            ..Self::user(user_id, user_name, text, timestamp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_from_web_client_document() {
        let doc = serde_json::json!({
            "id": "-Nabc",
            "movieSlug": "big-buck-bunny",
            "movieName": "Big Buck Bunny",
            "movieThumb": "",
            "hostId": "user_1",
            "hostName": "CoolFox12",
            "status": "playing",
            "createdAt": 1700000000000u64,
            "playback": {
                "currentTime": 42.5,
                "isPlaying": true,
                "episode": 1,
                "server": 0,
                "updatedAt": 1700000005000u64
            },
            "members": {
                "user_1": { "name": "CoolFox12", "joinedAt": 1700000000000u64, "isHost": true }
            },
            "viewerCount": 1
        });

        let room: Room = serde_json::from_value(doc).unwrap();
        assert_eq!(room.movie.slug, "big-buck-bunny");
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.playback.episode, 1);
        assert!(room.members["user_1"].is_host);
        assert_eq!(room.viewer_count, 1);
    }

    #[test]
    fn test_room_without_members_deserializes_empty() {
        let doc = serde_json::json!({
            "id": "r1",
            "movieSlug": "m",
            "hostId": "u",
            "createdAt": 1,
            "playback": { "currentTime": 0, "isPlaying": false, "updatedAt": 1 }
        });

        let room: Room = serde_json::from_value(doc).unwrap();
        assert!(room.members.is_empty());
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.playback.current_time, 0.0);
    }

    #[test]
    fn test_chat_message_system_flag_only_written_when_set() {
        let user = serde_json::to_value(ChatMessage::user("u", "Ann", "hi", 5)).unwrap();
        assert!(user.get("system").is_none());
        assert!(user.get("id").is_none());

        let notice = serde_json::to_value(ChatMessage::system("u", "Ann", "joined", 5)).unwrap();
        assert_eq!(notice["system"], true);
        assert_eq!(notice["userName"], "Ann");
    }
}
