//! Session implementation for FFI

use std::path::PathBuf;
use std::sync::{Arc, Once};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bridge::{adapter_script, BridgeError, BridgeMessage, PlayerSurface};
use crate::config::{PartyConfig, StoreConfig};
use crate::identity::{AuthUser, FileStorage, SessionIdentity};
use crate::party::{clean_name, Coordinator, PartyEvent, PartyEvents, PartyHandle};
use crate::sync::MovieRef;

use super::types::*;

static TRACING_INIT: Once = Once::new();

type SharedCallback = Arc<RwLock<Option<Arc<dyn PartyCallback>>>>;

/// Main session interface
#[derive(uniffi::Object)]
pub struct WatchPartySession {
    runtime: Runtime,
    coordinator: Coordinator,
    callback: SharedCallback,
    party: Arc<Mutex<Option<Arc<PartyHandle>>>>,
    /// Forwards party events to the callback
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

#[uniffi::export]
impl WatchPartySession {
    /// Create a new session.
    ///
    /// `storage_dir` keeps the participant identity across launches. The
    /// database URL falls back to `WATCHPARTY_DATABASE_URL` when not given;
    /// without one the session still works but reports itself unavailable.
    #[uniffi::constructor]
    pub fn new(
        storage_dir: String,
        database_url: Option<String>,
        database_secret: Option<String>,
    ) -> Result<Self, CoreError> {
        TRACING_INIT.call_once(|| {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("watchparty_core=debug,hyper_util=off,hyper=off,reqwest=off")
            });
            let _ = tracing_subscriber::fmt()
                .with_ansi(false)
                .with_target(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        });

        info!("Initializing watch party session");

        let runtime = Runtime::new().map_err(|e| CoreError::NetworkError(e.to_string()))?;

        let mut config = PartyConfig::from_env();
        if let Some(url) = database_url {
            config.store = StoreConfig::new(&url, database_secret.as_deref());
        }
        if !config.is_available() {
            warn!("No realtime database configured; watch party disabled");
        }

        let storage = FileStorage::new(PathBuf::from(storage_dir));
        let identity = Arc::new(SessionIdentity::new(Arc::new(storage)));
        let coordinator = Coordinator::from_config(&config, identity);

        Ok(Self {
            runtime,
            coordinator,
            callback: Arc::new(RwLock::new(None)),
            party: Arc::new(Mutex::new(None)),
            forwarder: Mutex::new(None),
        })
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn PartyCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Whether a realtime database is configured
    pub fn is_available(&self) -> bool {
        self.coordinator.is_available()
    }

    pub fn identity(&self) -> Identity {
        Identity::from(self.coordinator.identity().get_session())
    }

    /// Adopt the signed-in account's display name, if it has one
    pub fn sign_in(&self, uid: String, display_name: Option<String>) -> Identity {
        let user = AuthUser { uid, display_name };
        Identity::from(self.coordinator.identity().apply_auth(&user))
    }

    /// Rename the local participant, in the current room too if there is one
    pub fn set_display_name(&self, name: String) -> Result<Identity, CoreError> {
        match self.current() {
            Some(party) => {
                self.runtime.block_on(party.rename(&name))?;
            }
            None => {
                let name = clean_name(&name, self.coordinator.config().name_limit)
                    .ok_or_else(|| CoreError::InvalidInput("empty name".to_string()))?;
                self.coordinator.identity().update_name(&name);
            }
        }
        Ok(self.identity())
    }

    /// Create a room for a movie; the caller still has to join it
    pub fn create_room(
        &self,
        movie_slug: String,
        movie_name: String,
        movie_thumb: String,
    ) -> Result<RoomInfo, CoreError> {
        let movie = MovieRef {
            slug: movie_slug,
            name: movie_name,
            thumb: movie_thumb,
        };
        let room = self.runtime.block_on(self.coordinator.create_room(movie))?;
        Ok(RoomInfo::from(&room))
    }

    pub fn list_rooms(&self) -> Result<Vec<RoomInfo>, CoreError> {
        let rooms = self.runtime.block_on(self.coordinator.list_rooms())?;
        Ok(rooms.iter().map(RoomInfo::from).collect())
    }

    /// Join a room. Player commands go out through `post_to_player`.
    pub fn join_room(&self, room_id: String) -> Result<(), CoreError> {
        if self.current().is_some() {
            return Err(CoreError::AlreadyInRoom);
        }

        let surface = Arc::new(CallbackSurface {
            callback: self.callback.clone(),
        });
        let (handle, events) = self
            .runtime
            .block_on(self.coordinator.join(&room_id, surface))?;

        *self.party.lock() = Some(Arc::new(handle));
        let forwarder = self.runtime.spawn(forward_events(
            events,
            self.callback.clone(),
            self.party.clone(),
        ));
        if let Some(previous) = self.forwarder.lock().replace(forwarder) {
            previous.abort();
        }

        info!("Joined room {}", room_id);
        Ok(())
    }

    /// Leave the current room
    pub fn leave_room(&self) -> Result<(), CoreError> {
        let party = self.party.lock().take().ok_or(CoreError::NotInRoom)?;
        if let Err(e) = self.runtime.block_on(party.leave()) {
            // Keep the handle so the next call retries the removal
            self.party.lock().get_or_insert(party);
            return Err(e.into());
        }
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }
        info!("Left room");
        Ok(())
    }

    pub fn current_room(&self) -> Option<RoomInfo> {
        self.current()?.room().as_ref().map(RoomInfo::from)
    }

    pub fn is_host(&self) -> bool {
        self.current().map(|p| p.is_host()).unwrap_or(false)
    }

    pub fn sync_status(&self) -> SyncState {
        self.current()
            .map(|p| SyncState::from(p.sync_status()))
            .unwrap_or(SyncState::Waiting)
    }

    /// Host only; returns false when the caller isn't the host
    pub fn play(&self) -> Result<bool, CoreError> {
        let party = self.require()?;
        Ok(self.runtime.block_on(party.play())?)
    }

    /// Host only; returns false when the caller isn't the host
    pub fn pause(&self) -> Result<bool, CoreError> {
        let party = self.require()?;
        Ok(self.runtime.block_on(party.pause())?)
    }

    pub fn toggle_play(&self) -> Result<bool, CoreError> {
        let party = self.require()?;
        Ok(self.runtime.block_on(party.toggle_play())?)
    }

    /// Seek everyone to `position` seconds
    pub fn seek(&self, position: f64) -> Result<bool, CoreError> {
        let party = self.require()?;
        Ok(self.runtime.block_on(party.seek(position))?)
    }

    pub fn change_episode(&self, episode: u32) -> Result<bool, CoreError> {
        let party = self.require()?;
        Ok(self.runtime.block_on(party.change_episode(episode))?)
    }

    pub fn change_server(&self, server: u32) -> Result<bool, CoreError> {
        let party = self.require()?;
        Ok(self.runtime.block_on(party.change_server(server))?)
    }

    pub fn transfer_host(&self, participant_id: String) -> Result<bool, CoreError> {
        let party = self.require()?;
        Ok(self.runtime.block_on(party.transfer_host(&participant_id))?)
    }

    /// Delete the room for everyone (host only)
    pub fn delete_room(&self) -> Result<bool, CoreError> {
        let party = self.require()?;
        let deleted = self.runtime.block_on(party.delete_room())?;
        if deleted {
            self.party.lock().take();
        }
        Ok(deleted)
    }

    pub fn send_message(&self, text: String) -> Result<(), CoreError> {
        let party = self.require()?;
        Ok(self.runtime.block_on(party.send_message(&text))?)
    }

    /// Hand over a message the embedded player posted to the app
    pub fn handle_player_message(&self, payload: String) {
        let Some(party) = self.current() else {
            return;
        };
        let message = serde_json::from_str::<Value>(&payload).unwrap_or(Value::String(payload));
        party.handle_player_message(message);
    }

    /// Script to inject into embed pages so they speak the bridge protocol
    pub fn injection_script(&self) -> String {
        adapter_script().to_string()
    }
}

impl WatchPartySession {
    fn current(&self) -> Option<Arc<PartyHandle>> {
        self.party.lock().as_ref().filter(|p| !p.has_left()).cloned()
    }

    fn require(&self) -> Result<Arc<PartyHandle>, CoreError> {
        self.current().ok_or(CoreError::NotInRoom)
    }
}

impl Drop for WatchPartySession {
    fn drop(&mut self) {
        if let Some(party) = self.party.lock().take() {
            if let Err(e) = self.runtime.block_on(party.leave()) {
                warn!("Leave on shutdown failed: {}", e);
            }
        }
    }
}

/// Player surface backed by the app's callback
struct CallbackSurface {
    callback: SharedCallback,
}

impl PlayerSurface for CallbackSurface {
    fn post(&self, message: &BridgeMessage) -> Result<(), BridgeError> {
        let callback = self.callback.read().clone().ok_or(BridgeError::Detached)?;
        match message {
            BridgeMessage::Structured(value) => callback.post_to_player(value.to_string(), false),
            BridgeMessage::Text(text) => callback.post_to_player(text.clone(), true),
        }
        Ok(())
    }
}

async fn forward_events(
    mut events: PartyEvents,
    callback: SharedCallback,
    party: Arc<Mutex<Option<Arc<PartyHandle>>>>,
) {
    while let Some(event) = events.recv().await {
        let Some(cb) = callback.read().clone() else {
            debug!("No callback set, dropping {:?}", event);
            continue;
        };
        match event {
            PartyEvent::RoomUpdated(room) => cb.on_room_changed(RoomInfo::from(&room)),
            PartyEvent::Messages(messages) => {
                cb.on_messages(messages.into_iter().map(ChatEntry::from).collect())
            }
            PartyEvent::SyncStatus(status) => cb.on_sync_status(SyncState::from(status)),
            PartyEvent::SourceChanged {
                episode,
                server,
                source,
            } => cb.on_source_changed(episode, server, source.as_ref().map(MediaInfo::from)),
            PartyEvent::HostChanged { host_id, is_self } => cb.on_host_changed(host_id, is_self),
            PartyEvent::RoomClosed => {
                party.lock().take();
                cb.on_room_closed();
            }
            PartyEvent::Error(message) => cb.on_error(message),
        }
    }
}
