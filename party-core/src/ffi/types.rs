//! FFI types exposed via uniffi

use crate::catalog::MediaSource;
use crate::identity::Session;
use crate::party::PartyError;
use crate::sync::{ChatMessage, PlaybackState, Room, SyncStatus};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Watch party is not available")]
    Unavailable,

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl From<PartyError> for CoreError {
    fn from(e: PartyError) -> Self {
        match e {
            PartyError::ChannelUnavailable => CoreError::Unavailable,
            PartyError::RoomNotFound(id) => CoreError::RoomNotFound(id),
            PartyError::NotInRoom => CoreError::NotInRoom,
            PartyError::AlreadyInRoom(_) => CoreError::AlreadyInRoom,
            PartyError::InvalidInput(msg) => CoreError::InvalidInput(msg),
            PartyError::Store(e) => CoreError::NetworkError(e.to_string()),
        }
    }
}

/// The local participant
#[derive(Debug, Clone, uniffi::Record)]
pub struct Identity {
    pub participant_id: String,
    pub display_name: String,
}

impl From<Session> for Identity {
    fn from(s: Session) -> Self {
        Self {
            participant_id: s.id,
            display_name: s.name,
        }
    }
}

/// Shared playback record
#[derive(Debug, Clone, uniffi::Record)]
pub struct PlaybackInfo {
    pub current_time: f64,
    pub is_playing: bool,
    pub episode: u32,
    pub server: u32,
    pub updated_at_ms: u64,
}

impl From<&PlaybackState> for PlaybackInfo {
    fn from(p: &PlaybackState) -> Self {
        Self {
            current_time: p.current_time,
            is_playing: p.is_playing,
            episode: p.episode,
            server: p.server,
            updated_at_ms: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct Member {
    pub participant_id: String,
    pub display_name: String,
    pub joined_at_ms: u64,
    pub is_host: bool,
}

/// Room snapshot exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct RoomInfo {
    pub room_id: String,
    pub movie_slug: String,
    pub movie_name: String,
    pub movie_thumb: String,
    pub host_id: String,
    pub host_name: String,
    /// waiting, playing, paused or ended
    pub status: String,
    pub created_at_ms: u64,
    pub viewer_count: u32,
    pub playback: PlaybackInfo,
    /// Host first, then by name
    pub members: Vec<Member>,
}

impl From<&Room> for RoomInfo {
    fn from(r: &Room) -> Self {
        Self {
            room_id: r.id.clone(),
            movie_slug: r.movie.slug.clone(),
            movie_name: r.movie.name.clone(),
            movie_thumb: r.movie.thumb.clone(),
            host_id: r.host_id.clone(),
            host_name: r.host_name.clone(),
            status: r.status.as_str().to_string(),
            created_at_ms: r.created_at,
            viewer_count: r.viewer_count,
            playback: PlaybackInfo::from(&r.playback),
            members: r
                .member_list()
                .into_iter()
                .map(|(id, m)| Member {
                    participant_id: id.clone(),
                    display_name: m.name.clone(),
                    joined_at_ms: m.joined_at,
                    is_host: m.is_host,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct ChatEntry {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub timestamp_ms: u64,
    pub system: bool,
}

impl From<ChatMessage> for ChatEntry {
    fn from(m: ChatMessage) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            user_name: m.user_name,
            text: m.text,
            timestamp_ms: m.timestamp,
            system: m.system,
        }
    }
}

/// Local sync indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SyncState {
    Waiting,
    Synced,
    Drifted,
    Buffering,
}

impl From<SyncStatus> for SyncState {
    fn from(s: SyncStatus) -> Self {
        match s {
            SyncStatus::Waiting => SyncState::Waiting,
            SyncStatus::Synced => SyncState::Synced,
            SyncStatus::Drifted => SyncState::Drifted,
            SyncStatus::Buffering => SyncState::Buffering,
        }
    }
}

/// What the app should load for the shared episode
#[derive(Debug, Clone, uniffi::Record)]
pub struct MediaInfo {
    pub url: String,
    /// Embed pages are driven through `post_to_player`; streams are played natively
    pub is_embed: bool,
}

impl From<&MediaSource> for MediaInfo {
    fn from(s: &MediaSource) -> Self {
        Self {
            url: s.url().to_string(),
            is_embed: s.is_embed(),
        }
    }
}

/// Callback interface for party events
#[uniffi::export(callback_interface)]
pub trait PartyCallback: Send + Sync {
    fn on_room_changed(&self, room: RoomInfo);
    fn on_messages(&self, messages: Vec<ChatEntry>);
    fn on_sync_status(&self, status: SyncState);
    fn on_host_changed(&self, host_id: Option<String>, is_self: bool);
    /// `media` is `None` when the episode can't be resolved
    fn on_source_changed(&self, episode: u32, server: u32, media: Option<MediaInfo>);
    fn on_room_closed(&self);
    fn on_error(&self, message: String);
    /// Deliver a command to the embedded player. `is_text` marks payloads that
    /// must be posted as a plain string rather than a structured object.
    fn post_to_player(&self, payload: String, is_text: bool);
}
