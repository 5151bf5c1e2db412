//! One host and a handful of viewers watching together over an in-process
//! store with channel delay, drifting clocks and stalling players.

use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use watchparty_core::bridge::{decode_command, BridgeError, BridgeMessage, REPORT_TAG};
use watchparty_core::party::{PartyError, PartyEvents};
use watchparty_core::sync::MovieRef;
use watchparty_core::{
    Coordinator, MemoryStore, PartyEvent, PartyHandle, PlayerCommand, PlayerSurface, RoomStore,
    SessionIdentity, SyncConfig, SyncStatus,
};

use crate::metrics::{LogLevel, Metrics, ParticipantRow, SimStatus};

/// Simulated media length in seconds
const MEDIA_LENGTH: f64 = 1500.0;

/// The adapter script reports on its own every two seconds
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// How often the simulation advances
pub const TICK: Duration = Duration::from_millis(250);

/// Command-line knobs
#[derive(Debug, Clone)]
pub struct SimOptions {
    pub viewers: usize,
    pub latency: Duration,
    pub jitter: Duration,
    /// Expected stalls per player per minute of playback
    pub stall_rate: f64,
    /// Largest clock skew of a viewer's player, as a fraction of real time
    pub max_skew: f64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            viewers: 3,
            latency: Duration::from_millis(150),
            jitter: Duration::from_millis(250),
            stall_rate: 0.5,
            max_skew: 0.03,
        }
    }
}

impl SimOptions {
    /// `--viewers N --latency MS --jitter MS --stalls PER_MIN --skew FRACTION`
    pub fn from_args(args: &[String]) -> Self {
        let mut options = Self::default();
        if let Some(viewers) = flag(args, "--viewers") {
            options.viewers = viewers;
        }
        if let Some(ms) = flag(args, "--latency") {
            options.latency = Duration::from_millis(ms);
        }
        if let Some(ms) = flag(args, "--jitter") {
            options.jitter = Duration::from_millis(ms);
        }
        if let Some(rate) = flag::<f64>(args, "--stalls") {
            options.stall_rate = rate.max(0.0);
        }
        if let Some(skew) = flag::<f64>(args, "--skew") {
            options.max_skew = skew.clamp(0.0, 0.5);
        }
        options
    }
}

fn flag<T: FromStr>(args: &[String], name: &str) -> Option<T> {
    let position = args.iter().position(|a| a == name)?;
    args.get(position + 1)?.parse().ok()
}

/// Which of the outbound shapes a simulated embed understands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dialect {
    Structured,
    JsonText,
    Action,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Structured, Dialect::JsonText, Dialect::Action];

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Structured => "structured",
            Dialect::JsonText => "json-text",
            Dialect::Action => "action",
        }
    }

    fn understands(&self, message: &BridgeMessage) -> bool {
        match (self, message) {
            (Dialect::Structured, BridgeMessage::Structured(v)) => v.get("command").is_some(),
            (Dialect::Action, BridgeMessage::Structured(v)) => v.get("action").is_some(),
            (Dialect::JsonText, BridgeMessage::Text(_)) => true,
            _ => false,
        }
    }
}

struct PlayerState {
    position: f64,
    paused: bool,
    advanced_at: Instant,
    stalled_until: Option<Instant>,
    last_report: Option<Instant>,
    seeks: u64,
    last_seek: f64,
}

/// A video element behind an embed page, answering bridge commands the way
/// the injected adapter would
pub struct SimulatedPlayer {
    dialect: Dialect,
    /// Playback speed relative to real time
    rate: f64,
    state: Mutex<PlayerState>,
    reports: mpsc::UnboundedSender<Value>,
}

impl SimulatedPlayer {
    pub fn new(dialect: Dialect, rate: f64, reports: mpsc::UnboundedSender<Value>, now: Instant) -> Self {
        Self {
            dialect,
            rate,
            state: Mutex::new(PlayerState {
                position: 0.0,
                paused: true,
                advanced_at: now,
                stalled_until: None,
                last_report: None,
                seeks: 0,
                last_seek: 0.0,
            }),
            reports,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn position(&self) -> f64 {
        self.state.lock().position
    }

    pub fn is_playing(&self) -> bool {
        !self.state.lock().paused
    }

    pub fn is_stalled(&self) -> bool {
        self.state.lock().stalled_until.is_some()
    }

    /// Seeks received so far and the target of the latest one
    pub fn seeks(&self) -> (u64, f64) {
        let state = self.state.lock();
        (state.seeks, state.last_seek)
    }

    /// Freeze the position for `duration` as if the stream ran dry
    pub fn stall(&self, duration: Duration, now: Instant) {
        let mut state = self.state.lock();
        self.advance(&mut state, now);
        state.stalled_until = Some(now + duration);
        self.report(&mut state, "buffering", now);
    }

    /// Advance the clock and emit the periodic report when it's due
    pub fn tick(&self, now: Instant) {
        let mut state = self.state.lock();
        self.advance(&mut state, now);
        let due = state
            .last_report
            .map(|at| now.duration_since(at) >= REPORT_INTERVAL)
            .unwrap_or(true);
        if due {
            self.report(&mut state, "heartbeat", now);
        }
    }

    fn apply(&self, command: PlayerCommand, now: Instant) {
        let mut state = self.state.lock();
        self.advance(&mut state, now);
        match command {
            PlayerCommand::Play => {
                if state.position < MEDIA_LENGTH {
                    state.paused = false;
                }
                self.report(&mut state, "play", now);
            }
            PlayerCommand::Pause => {
                state.paused = true;
                self.report(&mut state, "pause", now);
            }
            PlayerCommand::Seek(target) => {
                state.position = target.clamp(0.0, MEDIA_LENGTH);
                state.seeks += 1;
                state.last_seek = target;
                self.report(&mut state, "seeked", now);
            }
            PlayerCommand::GetTime => self.report(&mut state, "timeUpdate", now),
        }
    }

    fn advance(&self, state: &mut PlayerState, now: Instant) {
        if let Some(until) = state.stalled_until {
            if now >= until {
                state.stalled_until = None;
                // Only the time after the stall counts
                state.advanced_at = until;
            }
        }
        if !state.paused && state.stalled_until.is_none() {
            let elapsed = now.saturating_duration_since(state.advanced_at).as_secs_f64();
            state.position = (state.position + elapsed * self.rate).min(MEDIA_LENGTH);
            if state.position >= MEDIA_LENGTH {
                state.paused = true;
            }
        }
        state.advanced_at = now;
    }

    fn report(&self, state: &mut PlayerState, event: &str, now: Instant) {
        state.last_report = Some(now);
        let report = json!({
            "type": REPORT_TAG,
            "event": event,
            "currentTime": state.position,
            "duration": MEDIA_LENGTH,
            "paused": state.paused,
            "buffering": state.stalled_until.is_some(),
        });
        // The receiving side may already be gone during shutdown
        let _ = self.reports.send(report);
    }
}

impl PlayerSurface for SimulatedPlayer {
    fn post(&self, message: &BridgeMessage) -> Result<(), BridgeError> {
        // Real embeds silently ignore shapes they don't speak
        if !self.dialect.understands(message) {
            return Ok(());
        }
        if let Some(command) = decode_command(message) {
            self.apply(command, Instant::now());
        }
        Ok(())
    }
}

struct Participant {
    name: String,
    handle: Arc<PartyHandle>,
    player: Arc<SimulatedPlayer>,
    seen_seeks: u64,
}

/// What the host does, and how long it waits before the next cue
#[derive(Debug, Clone, Copy)]
enum Cue {
    Play,
    Pause,
    Seek,
    Chat,
}

const SCRIPT: [(Cue, u64); 6] = [
    (Cue::Play, 20),
    (Cue::Chat, 15),
    (Cue::Seek, 25),
    (Cue::Pause, 5),
    (Cue::Play, 30),
    (Cue::Chat, 10),
];

/// Delay before the first cue
const FIRST_CUE: Duration = Duration::from_secs(1);

const CHATTER: [&str; 4] = [
    "this part is great",
    "wait for it",
    "anyone else buffering?",
    "best scene",
];

pub struct Simulation {
    metrics: Arc<RwLock<Metrics>>,
    options: SimOptions,
    participants: Vec<Participant>,
    rng: StdRng,
    cue: usize,
    next_cue_at: Instant,
    last_step: Instant,
}

impl Simulation {
    /// Create the room and bring everyone in
    pub async fn start(metrics: Arc<RwLock<Metrics>>, options: SimOptions) -> Result<Self, PartyError> {
        let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::with_latency(options.latency, options.jitter));
        let mut rng = StdRng::from_entropy();

        let host_identity = named_identity("Host");
        let coordinator = Coordinator::new(Some(store.clone()), host_identity.clone(), SyncConfig::default());
        let room = coordinator
            .create_room(MovieRef {
                slug: "sintel".to_string(),
                name: "Sintel".to_string(),
                thumb: String::new(),
            })
            .await?;
        info!("Simulating room {} with {} viewers", room.id, options.viewers);
        metrics.write().room_id = Some(room.id.clone());

        let mut participants = vec![join(&coordinator, &room.id, "Host", Dialect::Structured, 1.0, &metrics).await?];
        for i in 0..options.viewers {
            let name = format!("Viewer {}", i + 1);
            let dialect = Dialect::ALL[(i + 1) % Dialect::ALL.len()];
            let skew = if options.max_skew > 0.0 {
                rng.gen_range(-options.max_skew..options.max_skew)
            } else {
                0.0
            };
            let coordinator = Coordinator::new(Some(store.clone()), named_identity(&name), SyncConfig::default());
            participants.push(join(&coordinator, &room.id, &name, dialect, 1.0 + skew, &metrics).await?);
        }

        {
            let mut m = metrics.write();
            m.status = SimStatus::Running;
            m.log(LogLevel::Info, format!("Room {} ready", room.id));
        }

        let now = Instant::now();
        Ok(Self {
            metrics,
            options,
            participants,
            rng,
            cue: 0,
            next_cue_at: now + FIRST_CUE,
            last_step: now,
        })
    }

    /// Advance every player, inject stalls, run the host script and refresh
    /// the participant table
    pub async fn step(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_step).as_secs_f64();
        self.last_step = now;
        let stall_chance = self.options.stall_rate / 60.0 * dt;

        for p in &self.participants {
            p.player.tick(now);
            if stall_chance > 0.0
                && p.player.is_playing()
                && !p.player.is_stalled()
                && self.rng.gen_bool(stall_chance.min(1.0))
            {
                let seconds = self.rng.gen_range(1.0..12.0);
                p.player.stall(Duration::from_secs_f64(seconds), now);
                info!("{} stalls for {:.1}s", p.name, seconds);
                self.metrics.write().stall_injected(&p.name, seconds);
            }
        }

        if now >= self.next_cue_at {
            let (cue, wait) = SCRIPT[self.cue % SCRIPT.len()];
            self.cue += 1;
            self.next_cue_at = now + Duration::from_secs(wait);
            self.perform(cue).await;
        }

        self.refresh();
    }

    /// Everyone leaves; the last one out removes the room
    pub async fn shutdown(self) {
        for p in self.participants.iter().rev() {
            if let Err(e) = p.handle.leave().await {
                warn!("{} failed to leave: {}", p.name, e);
            }
        }
    }

    async fn perform(&mut self, cue: Cue) {
        let Some(host) = self.participants.first() else {
            return;
        };
        let result = match cue {
            Cue::Play => host.handle.play().await,
            Cue::Pause => host.handle.pause().await,
            Cue::Seek => {
                let jump = self.rng.gen_range(30.0..120.0);
                let target = (host.player.position() + jump).min(MEDIA_LENGTH - 60.0).floor();
                host.handle.seek(target).await
            }
            Cue::Chat => {
                let line = CHATTER[self.rng.gen_range(0..CHATTER.len())];
                host.handle.send_message(line).await.map(|_| true)
            }
        };
        match result {
            Ok(applied) => info!("Host cue {:?} (applied: {})", cue, applied),
            Err(e) => {
                warn!("Host cue {:?} failed: {}", cue, e);
                self.metrics
                    .write()
                    .log(LogLevel::Warning, format!("Host cue {:?} failed: {}", cue, e));
            }
        }
    }

    fn refresh(&mut self) {
        let host_position = self.participants.first().map(|p| p.player.position());
        let mut m = self.metrics.write();
        let mut rows = Vec::with_capacity(self.participants.len());

        for (i, p) in self.participants.iter_mut().enumerate() {
            let (seeks, target) = p.player.seeks();
            // Seeks on viewers come from their sync engine
            if i > 0 && seeks > p.seen_seeks {
                m.correction_issued(&p.name, target);
            }
            p.seen_seeks = seeks;

            let is_host = p.handle.is_host();
            rows.push(ParticipantRow {
                name: p.name.clone(),
                is_host,
                dialect: p.player.dialect().name(),
                status: p.handle.sync_status(),
                position: p.player.position(),
                playing: p.player.is_playing(),
                stalled: p.player.is_stalled(),
                drift: match (is_host, host_position) {
                    (false, Some(host)) => Some(p.player.position() - host),
                    _ => None,
                },
                corrections: if i > 0 { seeks } else { 0 },
            });
        }
        m.update_participants(rows);
    }
}

/// Run until the task is dropped
pub async fn run(metrics: Arc<RwLock<Metrics>>, options: SimOptions) -> Result<(), PartyError> {
    let mut sim = match Simulation::start(metrics.clone(), options).await {
        Ok(sim) => sim,
        Err(e) => {
            let mut m = metrics.write();
            m.status = SimStatus::Error;
            m.log(LogLevel::Warning, format!("Simulation failed to start: {}", e));
            return Err(e);
        }
    };

    let mut ticker = tokio::time::interval(TICK);
    loop {
        ticker.tick().await;
        sim.step(Instant::now()).await;
    }
}

fn named_identity(name: &str) -> Arc<SessionIdentity> {
    let identity = SessionIdentity::in_memory();
    identity.update_name(name);
    Arc::new(identity)
}

async fn join(
    coordinator: &Coordinator,
    room_id: &str,
    name: &str,
    dialect: Dialect,
    rate: f64,
    metrics: &Arc<RwLock<Metrics>>,
) -> Result<Participant, PartyError> {
    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
    let player = Arc::new(SimulatedPlayer::new(dialect, rate, reports_tx, Instant::now()));
    let (handle, events) = coordinator.join(room_id, player.clone()).await?;
    let handle = Arc::new(handle);

    // The player lives inside the handle's bridge, so hold the handle weakly
    let weak: Weak<PartyHandle> = Arc::downgrade(&handle);
    tokio::spawn(async move {
        while let Some(report) = reports_rx.recv().await {
            match weak.upgrade() {
                Some(handle) => handle.handle_player_message(report),
                None => break,
            }
        }
    });
    tokio::spawn(watch_events(name.to_string(), events, metrics.clone()));

    info!("{} joined ({} dialect, rate {:.3})", name, dialect.name(), rate);
    Ok(Participant {
        name: name.to_string(),
        handle,
        player,
        seen_seeks: 0,
    })
}

async fn watch_events(name: String, mut events: PartyEvents, metrics: Arc<RwLock<Metrics>>) {
    let mut last_message = None;
    while let Some(event) = events.recv().await {
        match event {
            PartyEvent::Messages(messages) => {
                // Only the host's view logs chat, once per message
                if name != "Host" {
                    continue;
                }
                let Some(newest) = messages.last() else {
                    continue;
                };
                if last_message.as_ref() == Some(&newest.id) {
                    continue;
                }
                last_message = Some(newest.id.clone());
                metrics
                    .write()
                    .log(LogLevel::Chat, format!("{}: {}", newest.user_name, newest.text));
            }
            PartyEvent::SyncStatus(status) => {
                if status != SyncStatus::Synced {
                    metrics
                        .write()
                        .log(LogLevel::Sync, format!("{} is {}", name, status.as_str()));
                }
            }
            PartyEvent::HostChanged { host_id, is_self } => {
                if is_self {
                    metrics.write().log(LogLevel::Info, format!("{} is the host", name));
                } else if host_id.is_none() {
                    metrics.write().log(LogLevel::Warning, format!("{} sees no host", name));
                }
            }
            PartyEvent::SourceChanged { episode, server, .. } => {
                info!("{} loads episode {} on server {}", name, episode, server);
            }
            PartyEvent::RoomClosed => {
                metrics.write().log(LogLevel::Info, format!("{}: room closed", name));
                break;
            }
            PartyEvent::Error(message) => {
                metrics.write().log(LogLevel::Warning, format!("{}: {}", name, message));
            }
            PartyEvent::RoomUpdated(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchparty_core::bridge::{default_encoders, CommandEncoder, PlayerReport, ReportEvent};

    fn player(dialect: Dialect) -> (SimulatedPlayer, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SimulatedPlayer::new(dialect, 1.0, tx, Instant::now()), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Value>) -> Vec<PlayerReport> {
        let mut reports = Vec::new();
        while let Ok(value) = rx.try_recv() {
            reports.extend(PlayerReport::from_message(&value));
        }
        reports
    }

    #[test]
    fn test_options_from_args() {
        let args: Vec<String> = ["sim", "--viewers", "5", "--latency", "40", "--skew", "2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let options = SimOptions::from_args(&args);
        assert_eq!(options.viewers, 5);
        assert_eq!(options.latency, Duration::from_millis(40));
        assert_eq!(options.jitter, SimOptions::default().jitter);
        assert_eq!(options.max_skew, 0.5);
    }

    #[tokio::test]
    async fn test_player_speaks_one_dialect() {
        for dialect in Dialect::ALL {
            let (player, mut rx) = player(dialect);
            let mut applied = 0;
            for encoder in default_encoders() {
                player.post(&encoder.encode(&PlayerCommand::Seek(42.0))).unwrap();
                let (seeks, _) = player.seeks();
                applied = seeks;
            }
            assert_eq!(applied, 1, "{}", dialect.name());
            assert_eq!(player.position(), 42.0);
            let reports = drain(&mut rx);
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].event, ReportEvent::Seeked);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_clock_and_stall() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let player = SimulatedPlayer::new(Dialect::Structured, 1.0, tx, start);
        player.apply(PlayerCommand::Play, start);

        player.tick(start + Duration::from_secs(4));
        assert!((player.position() - 4.0).abs() < 1e-9);

        player.stall(Duration::from_secs(3), start + Duration::from_secs(4));
        player.tick(start + Duration::from_secs(6));
        assert!((player.position() - 4.0).abs() < 1e-9);
        assert!(player.is_stalled());

        player.tick(start + Duration::from_secs(9));
        assert!(!player.is_stalled());
        assert!((player.position() - 6.0).abs() < 1e-9);

        let reports = drain(&mut rx);
        assert_eq!(reports[0].event, ReportEvent::Play);
        assert!(reports.iter().any(|r| r.event == ReportEvent::Buffering && r.buffering));
        assert!(reports.iter().any(|r| r.event == ReportEvent::Heartbeat));
    }

    #[tokio::test]
    async fn test_player_stops_at_end() {
        let (player, mut rx) = player(Dialect::Action);
        let start = Instant::now();
        player.apply(PlayerCommand::Seek(MEDIA_LENGTH - 1.0), start);
        player.apply(PlayerCommand::Play, start);
        player.tick(start + Duration::from_secs(5));

        assert_eq!(player.position(), MEDIA_LENGTH);
        assert!(!player.is_playing());
        let last = drain(&mut rx).pop().unwrap();
        assert!(last.is_at_end());
    }

    #[tokio::test]
    async fn test_viewer_follows_host_play() {
        let metrics = Arc::new(RwLock::new(Metrics::new(20, 0)));
        let options = SimOptions {
            viewers: 1,
            latency: Duration::from_millis(20),
            jitter: Duration::ZERO,
            stall_rate: 0.0,
            max_skew: 0.0,
        };
        let mut sim = Simulation::start(metrics.clone(), options).await.unwrap();

        for _ in 0..30 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            sim.step(Instant::now()).await;
        }

        {
            let m = metrics.read();
            assert_eq!(m.participants.len(), 2);
            let viewer = &m.participants[1];
            assert!(!viewer.is_host);
            assert!(viewer.playing);
            assert!(viewer.drift.map(|d| d.abs() < 3.0).unwrap_or(false));
            assert!(m.participants[0].is_host);
        }
        sim.shutdown().await;
    }
}
