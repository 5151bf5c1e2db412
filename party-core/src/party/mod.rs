//! Room Coordinator
//!
//! Wires identity, the room store and the sync engine together: room
//! creation and listing, the join/leave lifecycle, host-only control gating
//! and host succession.

mod chat;
mod coordinator;
mod handle;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::catalog::MediaSource;
use crate::store::StoreError;
use crate::sync::{ChatMessage, ParticipantId, Room, SyncStatus};

pub use chat::{clean_name, clean_text, message_window};
pub use coordinator::{Coordinator, RoomsWatch};
pub use handle::PartyHandle;

/// Room documents live under here, keyed by room id
pub const ROOMS_PATH: &str = "watchPartyRooms";

/// Per-room message logs live under here, keyed by room id
pub const MESSAGES_PATH: &str = "watchPartyMessages";

pub fn room_path(room_id: &str) -> String {
    format!("{}/{}", ROOMS_PATH, room_id)
}

pub fn messages_path(room_id: &str) -> String {
    format!("{}/{}", MESSAGES_PATH, room_id)
}

#[derive(Debug, Error)]
pub enum PartyError {
    #[error("Watch party is not available: no realtime database configured")]
    ChannelUnavailable,

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in room {0}")]
    AlreadyInRoom(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PartyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable => PartyError::ChannelUnavailable,
            other => PartyError::Store(other),
        }
    }
}

impl From<serde_json::Error> for PartyError {
    fn from(e: serde_json::Error) -> Self {
        PartyError::Store(StoreError::Decode(e))
    }
}

/// What a joined participant's UI gets told
#[derive(Debug, Clone, PartialEq)]
pub enum PartyEvent {
    /// Latest room snapshot
    RoomUpdated(Room),
    /// Most recent window of the message log, oldest first
    Messages(Vec<ChatMessage>),
    SyncStatus(SyncStatus),
    /// Media for the shared episode/server; `None` if it can't be resolved
    SourceChanged {
        episode: u32,
        server: u32,
        source: Option<MediaSource>,
    },
    HostChanged {
        host_id: Option<ParticipantId>,
        is_self: bool,
    },
    /// The room was deleted
    RoomClosed,
    /// Non-fatal problem worth surfacing once
    Error(String),
}

pub type PartyEvents = mpsc::UnboundedReceiver<PartyEvent>;

/// Parse a room document, taking the id from its key when missing
pub(crate) fn parse_room(room_id: &str, value: Value) -> Result<Room, PartyError> {
    let mut room: Room = serde_json::from_value(value)?;
    if room.id.is_empty() {
        room.id = room_id.to_string();
    }
    Ok(room)
}

/// Build a multi-path patch from `(path, value)` pairs
pub(crate) fn patch<I, K>(entries: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
