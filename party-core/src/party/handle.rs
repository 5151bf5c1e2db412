//! A joined room
//!
//! `PartyHandle` is the scoped membership: while it lives, one background
//! task follows the room and message log, ticks the heartbeat and feeds the
//! player's reports to the sync engine. `leave()` (or dropping the handle)
//! stops that task before the membership is removed, so nothing writes to a
//! room the participant no longer belongs to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bridge::{PlayerBridge, PlayerReport};
use crate::catalog::{MovieCatalog, MovieDetail};
use crate::config::SyncConfig;
use crate::identity::{Session, SessionIdentity};
use crate::now_ms;
use crate::store::{RoomStore, Subscription};
use crate::sync::{Authority, ChatMessage, EngineAction, ParticipantId, Room, RoomStatus, SyncEngine, SyncStatus};

use super::chat;
use super::{messages_path, parse_room, patch, room_path, PartyError, PartyEvent};

/// State shared between the handle and its background task
pub(crate) struct Shared {
    pub(crate) room_id: String,
    pub(crate) self_id: ParticipantId,
    session: Mutex<Session>,
    store: Arc<dyn RoomStore>,
    identity: Arc<SessionIdentity>,
    catalog: Option<Arc<dyn MovieCatalog>>,
    config: SyncConfig,
    bridge: PlayerBridge,
    engine: Mutex<SyncEngine>,
    room: Mutex<Option<Room>>,
    detail: Mutex<Option<MovieDetail>>,
    events: mpsc::UnboundedSender<PartyEvent>,
    /// Set once leaving starts; the room task is stopped from then on
    left: AtomicBool,
    /// Set once the membership is actually gone from the store
    released: AtomicBool,
    /// Serializes leave attempts
    leaving: tokio::sync::Mutex<()>,
    /// Orphaned host id this participant already replaced
    promoted_from: Mutex<Option<ParticipantId>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Membership in one room
pub struct PartyHandle {
    shared: Arc<Shared>,
    reports: mpsc::UnboundedSender<Value>,
}

impl PartyHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        room: Room,
        session: Session,
        store: Arc<dyn RoomStore>,
        identity: Arc<SessionIdentity>,
        catalog: Option<Arc<dyn MovieCatalog>>,
        config: SyncConfig,
        bridge: PlayerBridge,
        room_sub: Subscription,
        message_sub: Subscription,
        events: mpsc::UnboundedSender<PartyEvent>,
    ) -> Self {
        let now = now_ms();
        let shared = Arc::new(Shared {
            room_id: room.id.clone(),
            self_id: session.id.clone(),
            engine: Mutex::new(SyncEngine::new(session.id.clone(), config.clone(), now)),
            session: Mutex::new(session),
            store,
            identity,
            catalog,
            config,
            bridge,
            room: Mutex::new(None),
            detail: Mutex::new(None),
            events,
            left: AtomicBool::new(false),
            released: AtomicBool::new(false),
            leaving: tokio::sync::Mutex::new(()),
            promoted_from: Mutex::new(None),
            task: Mutex::new(None),
        });

        let (reports, report_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(shared.clone(), room_sub, message_sub, report_rx));
        *shared.task.lock() = Some(task);

        Self { shared, reports }
    }

    pub fn room_id(&self) -> &str {
        &self.shared.room_id
    }

    pub fn participant_id(&self) -> &str {
        &self.shared.self_id
    }

    /// Latest room snapshot seen by the background task
    pub fn room(&self) -> Option<Room> {
        self.shared.room.lock().clone()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.shared.engine.lock().status()
    }

    pub fn is_host(&self) -> bool {
        self.shared.engine.lock().is_host()
    }

    pub fn has_left(&self) -> bool {
        self.shared.left.load(Ordering::SeqCst)
    }

    /// Hand a raw cross-boundary message from the player surface to the engine.
    /// Unrelated traffic is ignored.
    pub fn handle_player_message(&self, message: Value) {
        if self.has_left() {
            return;
        }
        if self.reports.send(message).is_err() {
            debug!("Player message after room task ended");
        }
    }

    pub async fn play(&self) -> Result<bool, PartyError> {
        self.host_playback(|engine, now| engine.host_play(now), Some(chat::played)).await
    }

    pub async fn pause(&self) -> Result<bool, PartyError> {
        self.host_playback(|engine, now| engine.host_pause(now), Some(chat::paused)).await
    }

    pub async fn toggle_play(&self) -> Result<bool, PartyError> {
        let Some(room) = self.host_room().await? else {
            return Ok(false);
        };
        let now = now_ms();
        let (actions, playing) = {
            let mut engine = self.shared.engine.lock();
            let mut actions = engine.on_room(&room, now);
            actions.extend(engine.host_toggle(now));
            let playing = engine.playback().map(|pb| pb.is_playing).unwrap_or(false);
            (actions, playing)
        };
        self.shared.execute(actions).await;
        let name = self.shared.name();
        let text = if playing { chat::played(&name) } else { chat::paused(&name) };
        self.shared.announce(text).await;
        Ok(true)
    }

    /// Seek everyone to an absolute position in seconds
    pub async fn seek(&self, position: f64) -> Result<bool, PartyError> {
        if !position.is_finite() || position < 0.0 {
            return Err(PartyError::InvalidInput(format!("bad seek position {}", position)));
        }
        let Some(room) = self.host_room().await? else {
            return Ok(false);
        };
        let now = now_ms();
        let actions = {
            let mut engine = self.shared.engine.lock();
            let mut actions = engine.on_room(&room, now);
            actions.extend(engine.host_seek(position, now));
            actions
        };
        self.shared.execute(actions).await;
        self.shared.announce(chat::seeked(&self.shared.name(), position)).await;
        Ok(true)
    }

    /// Switch episode on the current server; restarts from 0 and autoplays
    pub async fn change_episode(&self, episode: u32) -> Result<bool, PartyError> {
        let Some(room) = self.host_room().await? else {
            return Ok(false);
        };
        let server = room.playback.server;
        self.validate_source(episode, server)?;
        self.change_source(&room, episode, server).await;
        self.shared
            .announce(chat::episode_changed(&self.shared.name(), episode))
            .await;
        Ok(true)
    }

    /// Switch server keeping the episode index; restarts from 0 and autoplays
    pub async fn change_server(&self, server: u32) -> Result<bool, PartyError> {
        let Some(room) = self.host_room().await? else {
            return Ok(false);
        };
        let episode = room.playback.episode;
        self.validate_source(episode, server)?;
        self.change_source(&room, episode, server).await;
        self.shared
            .announce(chat::server_changed(&self.shared.name(), server))
            .await;
        Ok(true)
    }

    /// Hand host authority to another present member
    pub async fn transfer_host(&self, participant_id: &str) -> Result<bool, PartyError> {
        let Some(room) = self.host_room().await? else {
            return Ok(false);
        };
        if participant_id == self.shared.self_id {
            return Ok(false);
        }
        let Some(target) = room.members.get(participant_id) else {
            return Err(PartyError::InvalidInput(format!("{} is not in the room", participant_id)));
        };

        info!("Transferring host to {}", participant_id);
        let update = patch([
            ("hostId".to_string(), json!(participant_id)),
            ("hostName".to_string(), json!(target.name)),
            (format!("members/{}/isHost", self.shared.self_id), json!(false)),
        ]);
        self.shared
            .store
            .update(&room_path(&self.shared.room_id), update)
            .await?;
        self.shared.announce(chat::new_host(&target.name)).await;
        Ok(true)
    }

    /// Delete the room and its message log for everyone
    pub async fn delete_room(&self) -> Result<bool, PartyError> {
        if self.host_room().await?.is_none() {
            return Ok(false);
        }
        info!("Deleting room {}", self.shared.room_id);
        self.shared.stop();
        self.shared.left.store(true, Ordering::SeqCst);
        self.shared.store.remove(&room_path(&self.shared.room_id)).await?;
        self.shared
            .store
            .remove(&messages_path(&self.shared.room_id))
            .await?;
        self.shared.released.store(true, Ordering::SeqCst);
        Ok(true)
    }

    /// Append a chat message
    pub async fn send_message(&self, text: &str) -> Result<(), PartyError> {
        self.ensure_joined()?;
        let text = chat::clean_text(text, self.shared.config.chat_text_limit)
            .ok_or_else(|| PartyError::InvalidInput("empty message".to_string()))?;
        let session = self.shared.session.lock().clone();
        let message = ChatMessage::user(&session.id, &session.name, text, now_ms());
        self.shared
            .store
            .push(&messages_path(&self.shared.room_id), serde_json::to_value(&message)?)
            .await?;
        Ok(())
    }

    /// Change display name, persisted and reflected in the membership entry
    pub async fn rename(&self, name: &str) -> Result<(), PartyError> {
        self.ensure_joined()?;
        let name = chat::clean_name(name, self.shared.config.name_limit)
            .ok_or_else(|| PartyError::InvalidInput("empty name".to_string()))?;

        let session = self.shared.identity.update_name(&name);
        *self.shared.session.lock() = session;

        let mut entries = vec![(format!("members/{}/name", self.shared.self_id), json!(name))];
        if self.shared.fresh_room().await?.is_host(&self.shared.self_id) {
            entries.push(("hostName".to_string(), json!(name)));
        }
        self.shared
            .store
            .update(&room_path(&self.shared.room_id), patch(entries))
            .await?;
        Ok(())
    }

    /// Leave the room. Safe to call more than once; a failed attempt is
    /// retried in full by the next call.
    pub async fn leave(&self) -> Result<(), PartyError> {
        self.shared.leave().await
    }

    fn ensure_joined(&self) -> Result<(), PartyError> {
        if self.has_left() {
            Err(PartyError::NotInRoom)
        } else {
            Ok(())
        }
    }

    /// The room as of right now if the caller is its host, else `None`
    async fn host_room(&self) -> Result<Option<Room>, PartyError> {
        self.ensure_joined()?;
        let room = self.shared.fresh_room().await?;
        if room.is_host(&self.shared.self_id) {
            Ok(Some(room))
        } else {
            debug!("Ignoring host-only action: host is {}", room.host_id);
            Ok(None)
        }
    }

    async fn host_playback(
        &self,
        act: impl FnOnce(&mut SyncEngine, u64) -> Vec<EngineAction>,
        notice: Option<fn(&str) -> String>,
    ) -> Result<bool, PartyError> {
        let Some(room) = self.host_room().await? else {
            return Ok(false);
        };
        let now = now_ms();
        let actions = {
            let mut engine = self.shared.engine.lock();
            let mut actions = engine.on_room(&room, now);
            actions.extend(act(&mut *engine, now));
            actions
        };
        self.shared.execute(actions).await;
        if let Some(notice) = notice {
            self.shared.announce(notice(&self.shared.name())).await;
        }
        Ok(true)
    }

    async fn change_source(&self, room: &Room, episode: u32, server: u32) {
        let now = now_ms();
        let actions = {
            let mut engine = self.shared.engine.lock();
            let mut actions = engine.on_room(room, now);
            actions.extend(engine.host_change_source(episode, server, now));
            actions
        };
        self.shared.execute(actions).await;
    }

    fn validate_source(&self, episode: u32, server: u32) -> Result<(), PartyError> {
        if let Some(detail) = self.shared.detail.lock().as_ref() {
            if detail.episodes.get(server as usize).is_none() {
                return Err(PartyError::InvalidInput(format!("no server {}", server)));
            }
            if detail.episodes_on(server).get(episode as usize).is_none() {
                return Err(PartyError::InvalidInput(format!("no episode {}", episode)));
            }
        }
        Ok(())
    }
}

impl Drop for PartyHandle {
    fn drop(&mut self) {
        if self.shared.released.load(Ordering::SeqCst) {
            return;
        }
        self.shared.stop();
        // Best effort: still leave if a runtime is around to do it
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = self.shared.clone();
                runtime.spawn(async move {
                    if let Err(e) = shared.leave().await {
                        warn!("Leave on drop failed: {}", e);
                    }
                });
            }
            Err(_) => warn!("Party handle dropped outside a runtime; membership left behind"),
        }
    }
}

impl Shared {
    fn name(&self) -> String {
        self.session.lock().name.clone()
    }

    fn emit(&self, event: PartyEvent) {
        let _ = self.events.send(event);
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    async fn fresh_room(&self) -> Result<Room, PartyError> {
        let value = self
            .store
            .read(&room_path(&self.room_id))
            .await?
            .ok_or_else(|| PartyError::RoomNotFound(self.room_id.clone()))?;
        parse_room(&self.room_id, value)
    }

    async fn announce(&self, text: String) {
        let message = ChatMessage::system(&self.self_id, &self.name(), text, now_ms());
        let result = match serde_json::to_value(&message) {
            Ok(value) => self.store.push(&messages_path(&self.room_id), value).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Failed to post announcement: {}", e);
        }
    }

    async fn leave(&self) -> Result<(), PartyError> {
        let _leaving = self.leaving.lock().await;
        if self.released.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.left.store(true, Ordering::SeqCst);
        self.stop();
        info!("Leaving room {}", self.room_id);

        self.release().await?;
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Remove our membership, and the room with its log if nobody is left
    async fn release(&self) -> Result<(), PartyError> {
        let path = room_path(&self.room_id);
        let Some(value) = self.store.read(&path).await? else {
            return Ok(());
        };
        let room = parse_room(&self.room_id, value)?;
        if room.members.contains_key(&self.self_id) {
            self.announce(chat::left(&self.name())).await;

            let remaining = room.members.len().saturating_sub(1);
            let update = patch([
                (format!("members/{}", self.self_id), Value::Null),
                ("viewerCount".to_string(), json!(remaining)),
            ]);
            self.store.update(&path, update).await?;
        }

        // Re-read: someone may have joined in the meantime
        let still_there = match self.store.read(&path).await? {
            Some(value) => !parse_room(&self.room_id, value)?.members.is_empty(),
            None => false,
        };
        if !still_there {
            info!("Last member left, removing room {}", self.room_id);
            self.store.remove(&path).await?;
            self.store.remove(&messages_path(&self.room_id)).await?;
        }
        Ok(())
    }

    async fn on_room_value(&self, value: Option<Value>) {
        let Some(value) = value else {
            info!("Room {} was deleted", self.room_id);
            self.left.store(true, Ordering::SeqCst);
            self.released.store(true, Ordering::SeqCst);
            self.emit(PartyEvent::RoomClosed);
            return;
        };
        let room = match parse_room(&self.room_id, value) {
            Ok(room) => room,
            Err(e) => {
                warn!("Ignoring unreadable room snapshot: {}", e);
                return;
            }
        };

        let authority = room.authority();
        let previous = self.room.lock().replace(room.clone());
        if previous.as_ref().map(|r| r.authority()) != Some(authority.clone()) {
            self.emit(PartyEvent::HostChanged {
                host_id: authority.host_id().map(str::to_string),
                is_self: authority.is(&self.self_id),
            });
        }

        self.settle_authority(&room, &authority).await;

        let actions = self.engine.lock().on_room(&room, now_ms());
        self.execute(actions).await;
        self.emit(PartyEvent::RoomUpdated(room));
    }

    /// Membership writes this participant owns in response to authority changes
    async fn settle_authority(&self, room: &Room, authority: &Authority) {
        let path = room_path(&self.room_id);
        match authority {
            Authority::Orphaned => {
                if room.successor() != Some(&self.self_id) {
                    return;
                }
                if self.promoted_from.lock().as_deref() == Some(room.host_id.as_str()) {
                    return;
                }
                *self.promoted_from.lock() = Some(room.host_id.clone());
                let name = self.name();
                info!("Host {} is gone, taking over", room.host_id);
                let update = patch([
                    ("hostId".to_string(), json!(self.self_id)),
                    ("hostName".to_string(), json!(name)),
                    (format!("members/{}/isHost", self.self_id), json!(true)),
                ]);
                match self.store.update(&path, update).await {
                    Ok(()) => self.announce(chat::new_host(&name)).await,
                    Err(e) => warn!("Failed to take over as host: {}", e),
                }
            }
            Authority::Host(host_id) if *host_id == self.self_id => {
                // Handed over by the previous host: claim the flag on our own entry
                let flagged = room.members.get(&self.self_id).map(|m| m.is_host);
                if flagged == Some(false) {
                    let update = patch([(format!("members/{}/isHost", self.self_id), json!(true))]);
                    if let Err(e) = self.store.update(&path, update).await {
                        warn!("Failed to claim host flag: {}", e);
                    }
                }
            }
            Authority::Host(_) => {}
        }
    }

    fn on_message_value(&self, value: Option<Value>) {
        let messages = chat::message_window(value, self.config.chat_window);
        self.emit(PartyEvent::Messages(messages));
    }

    async fn on_player_message(&self, message: Value) {
        let Some(report) = PlayerReport::from_message(&message) else {
            return;
        };
        let actions = self.engine.lock().on_report(report, now_ms());
        self.execute(actions).await;
    }

    async fn on_heartbeat(&self) {
        let actions = self.engine.lock().on_tick(now_ms());
        self.execute(actions).await;
    }

    async fn execute(&self, actions: Vec<EngineAction>) {
        for action in actions {
            match action {
                EngineAction::Player(command) => {
                    self.bridge.send(&command);
                }
                EngineAction::Publish(playback) => {
                    let status = if playback.is_playing {
                        RoomStatus::Playing
                    } else {
                        RoomStatus::Paused
                    };
                    let update = patch([
                        ("playback".to_string(), json!(playback)),
                        ("status".to_string(), json!(status.as_str())),
                    ]);
                    // Retried implicitly by the next heartbeat
                    if let Err(e) = self.store.update(&room_path(&self.room_id), update).await {
                        warn!("Failed to publish playback: {}", e);
                    }
                }
                EngineAction::HostStalled => {
                    self.announce(chat::host_stalled(&self.name())).await;
                }
                EngineAction::StatusChanged(status) => {
                    self.emit(PartyEvent::SyncStatus(status));
                }
                EngineAction::LoadSource { episode, server } => {
                    self.resolve_source(episode, server).await;
                }
                EngineAction::Ended => {
                    let update = patch([("status".to_string(), json!(RoomStatus::Ended.as_str()))]);
                    if let Err(e) = self.store.update(&room_path(&self.room_id), update).await {
                        warn!("Failed to mark room ended: {}", e);
                    }
                }
            }
        }
    }

    async fn resolve_source(&self, episode: u32, server: u32) {
        let Some(catalog) = self.catalog.clone() else {
            self.emit(PartyEvent::SourceChanged {
                episode,
                server,
                source: None,
            });
            return;
        };

        let cached = self.detail.lock().clone();
        let detail = match cached {
            Some(detail) => detail,
            None => {
                let slug = self
                    .room
                    .lock()
                    .as_ref()
                    .map(|r| r.movie.slug.clone())
                    .unwrap_or_default();
                match catalog.movie_detail(&slug).await {
                    Ok(detail) => {
                        *self.detail.lock() = Some(detail.clone());
                        detail
                    }
                    Err(e) => {
                        warn!("Failed to load movie detail for {}: {}", slug, e);
                        self.emit(PartyEvent::Error(format!("Could not load the movie: {}", e)));
                        self.emit(PartyEvent::SourceChanged {
                            episode,
                            server,
                            source: None,
                        });
                        return;
                    }
                }
            }
        };

        // A newer change may have landed while the lookup was in flight
        if self.engine.lock().source() != Some((episode, server)) {
            return;
        }
        self.emit(PartyEvent::SourceChanged {
            episode,
            server,
            source: detail.resolve(episode, server),
        });
    }
}

/// Background loop of one joined participant
async fn run(
    shared: Arc<Shared>,
    mut room_sub: Subscription,
    mut message_sub: Subscription,
    mut reports: mpsc::UnboundedReceiver<Value>,
) {
    let mut heartbeat = tokio::time::interval(Duration::from_millis(shared.config.heartbeat_ms));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    heartbeat.tick().await;
    let mut messages_open = true;

    loop {
        tokio::select! {
            next = room_sub.next() => match next {
                Some(value) => shared.on_room_value(value).await,
                None => {
                    warn!("Room subscription closed");
                    shared.emit(PartyEvent::Error("Lost connection to the room".to_string()));
                    break;
                }
            },
            next = message_sub.next(), if messages_open => match next {
                Some(value) => shared.on_message_value(value),
                None => {
                    debug!("Message subscription closed");
                    messages_open = false;
                }
            },
            message = reports.recv() => match message {
                Some(message) => shared.on_player_message(message).await,
                None => break,
            },
            _ = heartbeat.tick() => shared.on_heartbeat().await,
        }

        if shared.left.load(Ordering::SeqCst) {
            break;
        }
    }
    debug!("Room task for {} finished", shared.room_id);
}
