//! Room creation, listing and joining

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::{PlayerBridge, PlayerSurface};
use crate::catalog::{CatalogClient, MovieCatalog};
use crate::config::{PartyConfig, SyncConfig};
use crate::identity::SessionIdentity;
use crate::now_ms;
use crate::store::{FirebaseStore, RoomStore, Subscription};
use crate::sync::{ChatMessage, Membership, MovieRef, PlaybackState, Room, RoomStatus};

use super::chat;
use super::handle::PartyHandle;
use super::{messages_path, parse_room, patch, room_path, PartyError, PartyEvents, ROOMS_PATH};

/// Entry point for everything room-related
pub struct Coordinator {
    store: Option<Arc<dyn RoomStore>>,
    identity: Arc<SessionIdentity>,
    catalog: Option<Arc<dyn MovieCatalog>>,
    config: SyncConfig,
}

impl Coordinator {
    /// `store: None` means no channel is configured; every room operation
    /// then fails with `ChannelUnavailable`.
    pub fn new(store: Option<Arc<dyn RoomStore>>, identity: Arc<SessionIdentity>, config: SyncConfig) -> Self {
        Self {
            store,
            identity,
            catalog: None,
            config,
        }
    }

    /// Build the Firebase store and catalog client described by `config`
    pub fn from_config(config: &PartyConfig, identity: Arc<SessionIdentity>) -> Self {
        let store: Option<Arc<dyn RoomStore>> = match &config.store {
            Some(store_config) => match FirebaseStore::new(store_config) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!("Realtime database client unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        let mut coordinator = Self::new(store, identity, config.sync.clone());
        match CatalogClient::new(&config.catalog) {
            Ok(client) => coordinator.catalog = Some(Arc::new(client)),
            Err(e) => warn!("Catalog client unavailable: {}", e),
        }
        coordinator
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn MovieCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn identity(&self) -> &Arc<SessionIdentity> {
        &self.identity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn store(&self) -> Result<&Arc<dyn RoomStore>, PartyError> {
        self.store.as_ref().ok_or(PartyError::ChannelUnavailable)
    }

    /// Create a room with the caller as sole member and host
    pub async fn create_room(&self, movie: MovieRef) -> Result<Room, PartyError> {
        let store = self.store()?;
        if movie.slug.trim().is_empty() {
            return Err(PartyError::InvalidInput("movie slug is required".to_string()));
        }

        let session = self.identity.get_session();
        let now = now_ms();
        let mut members = HashMap::new();
        members.insert(
            session.id.clone(),
            Membership {
                name: session.name.clone(),
                joined_at: now,
                is_host: true,
            },
        );
        let mut room = Room {
            id: String::new(),
            movie,
            host_id: session.id.clone(),
            host_name: session.name.clone(),
            status: RoomStatus::Waiting,
            created_at: now,
            playback: PlaybackState::initial(now),
            members,
            viewer_count: 1,
        };

        let key = store.push(ROOMS_PATH, serde_json::to_value(&room)?).await?;
        store
            .update(&room_path(&key), patch([("id", json!(key))]))
            .await?;
        room.id = key;

        info!("Created room {} for {}", room.id, room.movie.slug);
        Ok(room)
    }

    /// All rooms, newest first
    pub async fn list_rooms(&self) -> Result<Vec<Room>, PartyError> {
        let value = self.store()?.read(ROOMS_PATH).await?;
        Ok(rooms_from(value))
    }

    /// Live room list, newest first
    pub async fn watch_rooms(&self) -> Result<RoomsWatch, PartyError> {
        let sub = self.store()?.subscribe(ROOMS_PATH).await?;
        Ok(RoomsWatch { sub })
    }

    /// Join a room and start following it.
    ///
    /// Commands for the local player go to `surface`; everything the UI needs
    /// arrives on the returned event stream.
    pub async fn join(
        &self,
        room_id: &str,
        surface: Arc<dyn PlayerSurface>,
    ) -> Result<(PartyHandle, PartyEvents), PartyError> {
        let store = self.store()?.clone();
        let session = self.identity.get_session();
        let path = room_path(room_id);

        let value = store
            .read(&path)
            .await?
            .ok_or_else(|| PartyError::RoomNotFound(room_id.to_string()))?;
        let room = parse_room(room_id, value)?;

        // Rejoining keeps the original join time and host flag
        let membership = match room.members.get(&session.id) {
            Some(existing) => Membership {
                name: session.name.clone(),
                ..existing.clone()
            },
            None => Membership {
                name: session.name.clone(),
                joined_at: now_ms(),
                is_host: false,
            },
        };
        let count = room.members.len() + usize::from(!room.members.contains_key(&session.id));

        // Subscribe before registering, so a failure here leaves nothing behind
        let room_sub = store.subscribe(&path).await?;
        let message_sub = store.subscribe(&messages_path(room_id)).await?;

        store
            .update(
                &path,
                patch([
                    (format!("members/{}", session.id), serde_json::to_value(&membership)?),
                    ("viewerCount".to_string(), json!(count)),
                ]),
            )
            .await?;
        info!("Joined room {} as {}", room_id, session.name);

        let notice = ChatMessage::system(&session.id, &session.name, chat::joined(&session.name), now_ms());
        if let Err(e) = store
            .push(&messages_path(room_id), serde_json::to_value(&notice)?)
            .await
        {
            warn!("Failed to announce join: {}", e);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = PartyHandle::start(
            room,
            session,
            store,
            self.identity.clone(),
            self.catalog.clone(),
            self.config.clone(),
            PlayerBridge::new(surface),
            room_sub,
            message_sub,
            events_tx,
        );
        Ok((handle, events_rx))
    }
}

/// Live room list
pub struct RoomsWatch {
    sub: Subscription,
}

impl RoomsWatch {
    /// Next full list; `None` once the channel is gone
    pub async fn next(&mut self) -> Option<Vec<Room>> {
        self.sub.next().await.map(rooms_from)
    }
}

fn rooms_from(value: Option<Value>) -> Vec<Room> {
    let Some(Value::Object(entries)) = value else {
        return Vec::new();
    };
    let mut rooms: Vec<Room> = entries
        .into_iter()
        .filter_map(|(key, value)| match parse_room(&key, value) {
            Ok(room) => Some(room),
            Err(e) => {
                debug!("Skipping malformed room {}: {}", key, e);
                None
            }
        })
        .collect();
    rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rooms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{decode_command, BridgeError, BridgeMessage, PlayerCommand};
    use crate::store::{MemoryStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use serde_json::Map;
    use crate::sync::SyncStatus;
    use crate::PartyEvent;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<PlayerCommand>>,
    }

    impl PlayerSurface for Recorder {
        fn post(&self, message: &BridgeMessage) -> Result<(), BridgeError> {
            if let Some(command) = decode_command(message) {
                self.commands.lock().push(command);
            }
            Ok(())
        }
    }

    struct Party {
        store: Arc<MemoryStore>,
    }

    impl Party {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
            }
        }

        fn coordinator(&self) -> Coordinator {
            self.coordinator_with(SyncConfig::default())
        }

        fn coordinator_with(&self, config: SyncConfig) -> Coordinator {
            Coordinator::new(
                Some(self.store.clone()),
                Arc::new(SessionIdentity::in_memory()),
                config,
            )
        }

        async fn room(&self, room_id: &str) -> Option<Room> {
            let value = self.store.read(&room_path(room_id)).await.unwrap()?;
            Some(parse_room(room_id, value).unwrap())
        }
    }

    /// Store that works except it can't open subscriptions
    struct NoSubscriptions {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl RoomStore for NoSubscriptions {
        async fn create(&self, path: &str, value: Value) -> StoreResult<()> {
            self.inner.create(path, value).await
        }

        async fn push(&self, path: &str, value: Value) -> StoreResult<String> {
            self.inner.push(path, value).await
        }

        async fn update(&self, path: &str, patch: Map<String, Value>) -> StoreResult<()> {
            self.inner.update(path, patch).await
        }

        async fn remove(&self, path: &str) -> StoreResult<()> {
            self.inner.remove(path).await
        }

        async fn read(&self, path: &str) -> StoreResult<Option<Value>> {
            self.inner.read(path).await
        }

        async fn subscribe(&self, _path: &str) -> StoreResult<Subscription> {
            Err(StoreError::Status(503, "listener refused".to_string()))
        }
    }

    fn heartbeat_report(current_time: f64) -> Value {
        json!({
            "type": "watchPartySync",
            "event": "heartbeat",
            "currentTime": current_time,
            "duration": 3600.0,
            "paused": false,
            "buffering": false
        })
    }

    fn movie() -> MovieRef {
        MovieRef {
            slug: "big-buck-bunny".to_string(),
            name: "Big Buck Bunny".to_string(),
            thumb: String::new(),
        }
    }

    /// Poll until `check` holds, failing after ~2s
    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    /// Wait until the stored room names `host_id` as a flagged host
    async fn wait_for_host(party: &Party, room_id: &str, host_id: &str) {
        for _ in 0..200 {
            if let Some(room) = party.room(room_id).await {
                if room.host_id == host_id && room.members.get(host_id).map(|m| m.is_host).unwrap_or(false) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never became host", host_id);
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_reported() {
        let coordinator = Coordinator::new(None, Arc::new(SessionIdentity::in_memory()), SyncConfig::default());
        assert!(!coordinator.is_available());
        assert!(matches!(
            coordinator.create_room(movie()).await,
            Err(PartyError::ChannelUnavailable)
        ));
        assert!(matches!(
            coordinator.join("r", Arc::new(Recorder::default())).await,
            Err(PartyError::ChannelUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_create_room_document() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();

        let stored = party.room(&room.id).await.unwrap();
        assert_eq!(stored.id, room.id);
        assert_eq!(stored.status, RoomStatus::Waiting);
        assert!(stored.is_host(&host.identity().get_session().id));
        assert_eq!(stored.members.len(), 1);
        assert!(!stored.playback.is_playing);
        assert_eq!(stored.playback.current_time, 0.0);
    }

    #[tokio::test]
    async fn test_list_rooms_newest_first() {
        let party = Party::new();
        let host = party.coordinator();
        let first = host.create_room(movie()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = host.create_room(movie()).await.unwrap();

        let rooms = host.list_rooms().await.unwrap();
        let ids: Vec<_> = rooms.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);

        let mut watch = host.watch_rooms().await.unwrap();
        assert_eq!(watch.next().await.map(|r| r.len()), Some(2));
    }

    #[tokio::test]
    async fn test_join_missing_room() {
        let party = Party::new();
        let result = party.coordinator().join("nope", Arc::new(Recorder::default())).await;
        assert!(matches!(result, Err(PartyError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_join_then_leave_restores_members() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (host_handle, _host_events) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();

        let members_path = format!("{}/members", room_path(&room.id));
        let before_members = party.store.read(&members_path).await.unwrap();
        let before_count = party.room(&room.id).await.unwrap().viewer_count;

        let viewer = party.coordinator();
        let (handle, _events) = viewer.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        assert_eq!(party.room(&room.id).await.unwrap().members.len(), 2);

        handle.leave().await.unwrap();
        // Idempotent
        handle.leave().await.unwrap();

        assert_eq!(party.store.read(&members_path).await.unwrap(), before_members);
        assert_eq!(party.room(&room.id).await.unwrap().viewer_count, before_count);
        assert!(matches!(handle.send_message("hi").await, Err(PartyError::NotInRoom)));

        host_handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_join_leaves_no_membership() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (host_handle, _events) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        let before = party.store.snapshot();

        let broken = Coordinator::new(
            Some(Arc::new(NoSubscriptions {
                inner: party.store.clone(),
            })),
            Arc::new(SessionIdentity::in_memory()),
            SyncConfig::default(),
        );
        let result = broken.join(&room.id, Arc::new(Recorder::default())).await;
        assert!(matches!(result, Err(PartyError::Store(StoreError::Status(503, _)))));

        assert_eq!(party.store.snapshot(), before);
        assert_eq!(party.room(&room.id).await.unwrap().members.len(), 1);

        host_handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_leave_is_retried() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (host_handle, _e1) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        let viewer = party.coordinator();
        let (handle, _e2) = viewer.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        assert_eq!(party.room(&room.id).await.unwrap().members.len(), 2);

        party.store.set_online(false);
        assert!(handle.leave().await.is_err());
        // Stopped locally, but still a member until the store agrees
        assert!(handle.has_left());
        assert!(matches!(handle.send_message("hi").await, Err(PartyError::NotInRoom)));

        party.store.set_online(true);
        assert_eq!(party.room(&room.id).await.unwrap().members.len(), 2);
        handle.leave().await.unwrap();

        let stored = party.room(&room.id).await.unwrap();
        assert_eq!(stored.members.len(), 1);
        assert!(!stored.members.contains_key(handle.participant_id()));
        assert_eq!(stored.viewer_count, 1);

        // Done now; further calls are no-ops
        handle.leave().await.unwrap();
        host_handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_and_drop_stop_all_room_activity() {
        let party = Party::new();
        let config = SyncConfig {
            heartbeat_ms: 50,
            ..SyncConfig::default()
        };
        let host = party.coordinator_with(config.clone());
        let room = host.create_room(movie()).await.unwrap();
        let (host_handle, _e1) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        let viewer = party.coordinator_with(config.clone());
        let (handle, _e2) = viewer.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        // Room and message log for each participant
        assert_eq!(party.store.subscriber_count(), 4);

        // The host's heartbeat is live while it is in the room
        host_handle.handle_player_message(heartbeat_report(5.0));
        let mut beating = false;
        for _ in 0..200 {
            if party.room(&room.id).await.unwrap().playback.is_playing {
                beating = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(beating);

        host_handle.leave().await.unwrap();
        eventually(|| party.store.subscriber_count() == 2).await;
        wait_for_host(&party, &room.id, handle.participant_id()).await;

        // No ghost heartbeats from the participant that left
        let settled = party.room(&room.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(config.heartbeat_ms * 4)).await;
        let later = party.room(&room.id).await.unwrap();
        assert_eq!(later.playback, settled.playback);
        assert!(!later.members.contains_key(host_handle.participant_id()));

        // Dropping the last handle leaves on its own
        drop(handle);
        eventually(|| party.store.subscriber_count() == 0).await;
        for _ in 0..200 {
            if party.room(&room.id).await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(party.room(&room.id).await.is_none());
        assert!(party.store.read(&messages_path(&room.id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_member_leaving_deletes_room_and_log() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (handle, _events) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        handle.send_message("hello").await.unwrap();
        assert!(party.store.read(&messages_path(&room.id)).await.unwrap().is_some());

        handle.leave().await.unwrap();

        assert!(party.room(&room.id).await.is_none());
        assert!(party.store.read(&messages_path(&room.id)).await.unwrap().is_none());
        assert_eq!(party.store.snapshot(), Value::Null);
    }

    #[tokio::test]
    async fn test_rejoin_keeps_join_time_and_host_flag() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let id = host.identity().get_session().id;
        let joined_at = room.members[&id].joined_at;

        let (handle, _events) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        let stored = party.room(&room.id).await.unwrap();
        assert_eq!(stored.members[&id].joined_at, joined_at);
        assert!(stored.members[&id].is_host);
        assert_eq!(stored.viewer_count, 1);
        handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_host_control_is_a_noop() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (host_handle, _host_events) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();

        let viewer = party.coordinator();
        let surface = Arc::new(Recorder::default());
        let (handle, _events) = viewer.join(&room.id, surface.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let before = party.store.snapshot();
        assert!(!handle.play().await.unwrap());
        assert!(!handle.pause().await.unwrap());
        assert!(!handle.toggle_play().await.unwrap());
        assert!(!handle.seek(120.0).await.unwrap());
        assert!(!handle.change_episode(3).await.unwrap());
        assert!(!handle.change_server(1).await.unwrap());
        assert!(!handle.transfer_host(handle.participant_id()).await.unwrap());
        assert!(!handle.delete_room().await.unwrap());
        assert_eq!(party.store.snapshot(), before);
        assert!(!surface.commands.lock().iter().any(|c| matches!(c, PlayerCommand::Seek(_))));

        handle.leave().await.unwrap();
        host_handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_host_play_publishes_and_announces() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let surface = Arc::new(Recorder::default());
        let (handle, _events) = host.join(&room.id, surface.clone()).await.unwrap();

        assert!(handle.play().await.unwrap());

        let stored = party.room(&room.id).await.unwrap();
        assert!(stored.playback.is_playing);
        assert_eq!(stored.status, RoomStatus::Playing);
        assert!(stored.playback.updated_at >= room.playback.updated_at);
        assert!(surface.commands.lock().contains(&PlayerCommand::Play));

        let log = chat::message_window(party.store.read(&messages_path(&room.id)).await.unwrap(), 100);
        assert!(log.iter().any(|m| m.system && m.text.contains("started playback")));

        assert!(handle.seek(95.0).await.unwrap());
        let stored = party.room(&room.id).await.unwrap();
        assert_eq!(stored.playback.current_time, 95.0);

        handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_change_episode_resets_and_autoplays() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (handle, _events) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();

        handle.seek(300.0).await.unwrap();
        assert!(handle.change_episode(2).await.unwrap());

        let stored = party.room(&room.id).await.unwrap();
        assert_eq!(stored.playback.episode, 2);
        assert_eq!(stored.playback.current_time, 0.0);
        assert!(stored.playback.is_playing);
        assert_eq!(stored.status, RoomStatus::Playing);

        handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_successor_takes_over_when_host_leaves() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (host_handle, _host_events) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();

        let second = party.coordinator();
        let (second_handle, _e2) = second.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let third = party.coordinator();
        let (third_handle, _e3) = third.join(&room.id, Arc::new(Recorder::default())).await.unwrap();

        host_handle.leave().await.unwrap();

        let second_id = second.identity().get_session().id;
        wait_for_host(&party, &room.id, &second_id).await;

        let stored = party.room(&room.id).await.unwrap();
        assert_eq!(stored.members.values().filter(|m| m.is_host).count(), 1);
        eventually(|| second_handle.is_host()).await;
        assert!(!third_handle.is_host());

        third_handle.leave().await.unwrap();
        second_handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_transfer_host() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (host_handle, _e1) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        let viewer = party.coordinator();
        let (viewer_handle, _e2) = viewer.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        let viewer_id = viewer.identity().get_session().id;

        assert!(matches!(
            host_handle.transfer_host("stranger").await,
            Err(PartyError::InvalidInput(_))
        ));
        assert!(host_handle.transfer_host(&viewer_id).await.unwrap());

        wait_for_host(&party, &room.id, &viewer_id).await;

        // The former host is now gated out
        assert!(!host_handle.play().await.unwrap());
        assert!(viewer_handle.play().await.unwrap());

        host_handle.leave().await.unwrap();
        viewer_handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_and_rename() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (handle, mut events) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();

        assert!(matches!(handle.send_message("   ").await, Err(PartyError::InvalidInput(_))));
        handle.send_message(&"x".repeat(600)).await.unwrap();
        handle.rename("  Projectionist  ").await.unwrap();

        let stored = party.room(&room.id).await.unwrap();
        let id = host.identity().get_session().id;
        assert_eq!(stored.members[&id].name, "Projectionist");
        assert_eq!(stored.host_name, "Projectionist");
        assert_eq!(host.identity().get_session().name, "Projectionist");

        let mut longest = 0;
        for _ in 0..50 {
            match tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
                Ok(Some(PartyEvent::Messages(messages))) => {
                    longest = messages.iter().map(|m| m.text.chars().count()).max().unwrap_or(0);
                    if longest > 0 && messages.iter().any(|m| !m.system) {
                        break;
                    }
                }
                Ok(Some(_)) => {}
                _ => break,
            }
        }
        assert_eq!(longest, 500);

        handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_viewer_follows_host_and_reports_status() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (host_handle, _e1) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        host_handle.seek(600.0).await.unwrap();
        host_handle.pause().await.unwrap();

        let viewer = party.coordinator();
        let surface = Arc::new(Recorder::default());
        let (handle, mut events) = viewer.join(&room.id, surface.clone()).await.unwrap();

        eventually(|| handle.room().is_some()).await;
        handle.handle_player_message(json!({
            "type": "watchPartySync",
            "event": "heartbeat",
            "currentTime": 5.0,
            "paused": true
        }));
        // Unrelated traffic is ignored
        handle.handle_player_message(json!({ "type": "ads", "currentTime": 1 }));

        eventually(|| surface.commands.lock().contains(&PlayerCommand::Seek(600.0))).await;

        let mut saw_drifted = false;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
            if event == PartyEvent::SyncStatus(SyncStatus::Drifted) {
                saw_drifted = true;
            }
        }
        assert!(saw_drifted);
        assert!(!handle.is_host());

        handle.leave().await.unwrap();
        host_handle.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_deleted_room_closes_for_everyone() {
        let party = Party::new();
        let host = party.coordinator();
        let room = host.create_room(movie()).await.unwrap();
        let (host_handle, _e1) = host.join(&room.id, Arc::new(Recorder::default())).await.unwrap();
        let viewer = party.coordinator();
        let (handle, mut events) = viewer.join(&room.id, Arc::new(Recorder::default())).await.unwrap();

        assert!(host_handle.delete_room().await.unwrap());
        assert!(party.room(&room.id).await.is_none());

        let mut closed = false;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            if event == PartyEvent::RoomClosed {
                closed = true;
                break;
            }
        }
        assert!(closed);
        eventually(|| handle.has_left()).await;
    }
}
