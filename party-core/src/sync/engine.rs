//! Per-participant sync state machine
//!
//! The engine does no I/O. It is fed room snapshots, player reports and
//! heartbeat ticks (each with the current wall clock) and answers with the
//! actions the coordinator should carry out: player commands, playback
//! writes, notices.

use tracing::{debug, info};

use crate::bridge::{PlayerCommand, PlayerReport, ReportEvent};
use crate::config::SyncConfig;

use super::buffer::BufferDetector;
use super::drift::{check_drift, estimate_host_time};
use super::protocol::{ParticipantId, PlaybackState, Room};
use super::state::{Authority, SyncStatus};

/// What this participant currently is with respect to the room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Viewer,
}

/// Work for the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Send to the local player
    Player(PlayerCommand),
    /// Write the shared playback record (host only)
    Publish(PlaybackState),
    /// Host's own player stalled; the group was paused
    HostStalled,
    /// Local sync status changed
    StatusChanged(SyncStatus),
    /// Shared episode/server differs from what is loaded locally
    LoadSource { episode: u32, server: u32 },
    /// Host's media played through to the end
    Ended,
}

/// Sync state of one participant
#[derive(Debug)]
pub struct SyncEngine {
    config: SyncConfig,
    self_id: ParticipantId,
    role: Role,
    host_id: Option<ParticipantId>,
    /// Waiting, Synced or Drifted; buffering is an overlay on top
    phase: SyncStatus,
    buffering: bool,
    status: SyncStatus,
    /// Latest accepted playback snapshot
    playback: Option<PlaybackState>,
    /// Newest `updatedAt` accepted from the current host
    watermark: u64,
    /// Last player report and when it arrived
    last_report: Option<(PlayerReport, u64)>,
    /// Reports and snapshots before this instant are not treated as intent or drift
    suppress_until: u64,
    /// When the last correction was issued
    corrected_at: Option<u64>,
    buffer: BufferDetector,
    source: Option<(u32, u32)>,
    host_stalled: bool,
    autoplay_pending: bool,
    ended: bool,
    last_published: u64,
}

impl SyncEngine {
    pub fn new(self_id: impl Into<ParticipantId>, config: SyncConfig, now_ms: u64) -> Self {
        let buffer = BufferDetector::with_limits(now_ms, config.buffer_timeout_ms, config.progress_epsilon);
        Self {
            config,
            self_id: self_id.into(),
            role: Role::Viewer,
            host_id: None,
            phase: SyncStatus::Waiting,
            buffering: false,
            status: SyncStatus::Waiting,
            playback: None,
            watermark: 0,
            last_report: None,
            suppress_until: 0,
            corrected_at: None,
            buffer,
            source: None,
            host_stalled: false,
            autoplay_pending: false,
            ended: false,
            last_published: 0,
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn playback(&self) -> Option<&PlaybackState> {
        self.playback.as_ref()
    }

    /// Currently loaded (episode, server)
    pub fn source(&self) -> Option<(u32, u32)> {
        self.source
    }

    /// Whether programmatic-command suppression is active
    pub fn is_guarded(&self, now_ms: u64) -> bool {
        now_ms < self.suppress_until
    }

    /// Start the re-entrancy guard after a programmatic player command
    pub fn note_programmatic(&mut self, now_ms: u64) {
        self.suppress_until = now_ms + self.config.correction_guard_ms;
    }

    /// Where the host should be right now, from the latest snapshot
    pub fn estimated_host_time(&self, now_ms: u64) -> Option<f64> {
        self.playback.as_ref().map(|pb| {
            estimate_host_time(
                pb.current_time,
                pb.updated_at,
                pb.is_playing,
                now_ms,
                self.config.extrapolation_cap,
            )
        })
    }

    /// Where the local player should be right now, from its last report
    pub fn local_position(&self, now_ms: u64) -> Option<f64> {
        self.last_report.as_ref().map(|(report, at)| {
            if report.paused || report.buffering {
                report.current_time
            } else {
                let elapsed = now_ms.saturating_sub(*at) as f64 / 1000.0;
                report.current_time + elapsed.min(self.config.extrapolation_cap)
            }
        })
    }

    /// Feed a full room snapshot
    pub fn on_room(&mut self, room: &Room, now_ms: u64) -> Vec<EngineAction> {
        self.on_playback(&room.playback, &room.authority(), now_ms)
    }

    /// Feed a playback snapshot together with the authority it was read under.
    ///
    /// Snapshots may arrive in any order; older ones from the same host are
    /// dropped so a late delivery can't rewind the group.
    pub fn on_playback(
        &mut self,
        playback: &PlaybackState,
        authority: &Authority,
        now_ms: u64,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        self.apply_authority(authority, playback);

        if playback.updated_at < self.watermark {
            debug!(
                "Ignoring stale playback ({} < {})",
                playback.updated_at, self.watermark
            );
            self.refresh_status(&mut actions);
            return actions;
        }
        self.watermark = playback.updated_at;

        let source = (playback.episode, playback.server);
        if self.source != Some(source) {
            if self.source.is_some() {
                info!("Source changed to episode {} server {}", source.0, source.1);
                // Reports from the previous media say nothing about the new one
                self.last_report = None;
                self.corrected_at = None;
                self.ended = false;
                self.buffer.reset(now_ms);
                self.buffering = false;
                self.phase = SyncStatus::Waiting;
            }
            self.source = Some(source);
            actions.push(EngineAction::LoadSource {
                episode: source.0,
                server: source.1,
            });
        }

        self.playback = Some(playback.clone());

        if self.role == Role::Viewer && authority.host_id().is_some() && !self.is_guarded(now_ms) {
            self.evaluate(now_ms, &mut actions);
        }

        self.refresh_status(&mut actions);
        actions
    }

    /// Feed a report from the local player
    pub fn on_report(&mut self, report: PlayerReport, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if report.paused {
            self.buffer.hold(now_ms);
        } else {
            self.buffer.report_progress(report.current_time, now_ms);
        }
        let guarded = self.is_guarded(now_ms);
        self.last_report = Some((report.clone(), now_ms));

        match self.role {
            Role::Host => {
                self.phase = SyncStatus::Synced;

                if self.autoplay_pending {
                    self.autoplay_pending = false;
                    if report.paused {
                        actions.push(EngineAction::Player(PlayerCommand::Play));
                        self.note_programmatic(now_ms);
                    }
                } else if self.host_stalled || self.buffering {
                    // The group stays paused until a heartbeat sees progress again
                    if is_intent(report.event) {
                        debug!("Host stalled, holding {:?} at {:.2}", report.event, report.current_time);
                    }
                } else if !guarded && is_intent(report.event) {
                    debug!("Host {:?} at {:.2}", report.event, report.current_time);
                    let update = self.publish(report.current_time, !report.paused, now_ms);
                    actions.push(EngineAction::Publish(update));
                }

                if report.is_at_end() && !self.ended {
                    self.ended = true;
                    actions.push(EngineAction::Ended);
                }
            }
            Role::Viewer => {
                if !guarded && self.host_id.is_some() {
                    self.evaluate(now_ms, &mut actions);
                }
            }
        }

        self.buffering = self.buffer.check(now_ms) && self.expects_progress();
        self.refresh_status(&mut actions);
        actions
    }

    /// Heartbeat: probe the player, detect stalls, let the host broadcast
    pub fn on_tick(&mut self, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = vec![EngineAction::Player(PlayerCommand::GetTime)];

        if self.last_report.is_none() {
            // Nothing to judge yet; a silent surface stays `waiting`
            self.buffer.hold(now_ms);
            self.refresh_status(&mut actions);
            return actions;
        }

        if !self.expects_progress() {
            self.buffer.hold(now_ms);
        }
        self.buffering = self.buffer.check(now_ms);

        if self.role == Role::Host {
            if self.buffering {
                if !self.host_stalled {
                    info!("Host player stalled, pausing the group");
                    self.host_stalled = true;
                    // A stalled player is stuck at its last reported position
                    let position = self
                        .last_report
                        .as_ref()
                        .map(|(report, _)| report.current_time)
                        .unwrap_or(0.0);
                    let update = self.publish(position, false, now_ms);
                    actions.push(EngineAction::Publish(update));
                    actions.push(EngineAction::HostStalled);
                }
            } else {
                if self.host_stalled {
                    info!("Host player recovered");
                    self.host_stalled = false;
                }
                if !self.is_guarded(now_ms) {
                    if let Some(update) = self.heartbeat_update(now_ms) {
                        actions.push(EngineAction::Publish(update));
                    }
                }
            }
        }

        self.refresh_status(&mut actions);
        actions
    }

    /// Host-initiated play
    pub fn host_play(&mut self, now_ms: u64) -> Vec<EngineAction> {
        self.host_set_playing(true, now_ms)
    }

    /// Host-initiated pause
    pub fn host_pause(&mut self, now_ms: u64) -> Vec<EngineAction> {
        self.host_set_playing(false, now_ms)
    }

    pub fn host_toggle(&mut self, now_ms: u64) -> Vec<EngineAction> {
        let playing = match &self.last_report {
            Some((report, _)) => !report.paused,
            None => self.playback.as_ref().map(|pb| pb.is_playing).unwrap_or(false),
        };
        self.host_set_playing(!playing, now_ms)
    }

    /// Host-initiated seek to an absolute position
    pub fn host_seek(&mut self, position: f64, now_ms: u64) -> Vec<EngineAction> {
        let position = position.max(0.0);
        let is_playing = match &self.last_report {
            Some((report, _)) => !report.paused,
            None => self.playback.as_ref().map(|pb| pb.is_playing).unwrap_or(false),
        };
        self.note_programmatic(now_ms);
        let update = self.publish(position, is_playing, now_ms);
        vec![
            EngineAction::Player(PlayerCommand::Seek(position)),
            EngineAction::Publish(update),
        ]
    }

    /// Host switches episode or server: restart from 0 and autoplay
    pub fn host_change_source(&mut self, episode: u32, server: u32, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        self.source = Some((episode, server));
        self.last_report = None;
        self.corrected_at = None;
        self.ended = false;
        self.host_stalled = false;
        self.buffering = false;
        self.buffer.reset(now_ms);
        self.phase = SyncStatus::Waiting;
        self.autoplay_pending = true;
        self.note_programmatic(now_ms);

        let updated_at = self.next_timestamp(now_ms);
        let update = PlaybackState {
            current_time: 0.0,
            is_playing: true,
            episode,
            server,
            updated_at,
        };
        self.accept_own(&update);

        actions.push(EngineAction::LoadSource { episode, server });
        actions.push(EngineAction::Publish(update));
        self.refresh_status(&mut actions);
        actions
    }

    fn host_set_playing(&mut self, playing: bool, now_ms: u64) -> Vec<EngineAction> {
        let position = self
            .local_position(now_ms)
            .or_else(|| self.estimated_host_time(now_ms))
            .unwrap_or(0.0);
        self.note_programmatic(now_ms);
        self.host_stalled = false;
        let update = self.publish(position, playing, now_ms);
        vec![
            EngineAction::Player(PlayerCommand::for_playing(playing)),
            EngineAction::Publish(update),
        ]
    }

    fn heartbeat_update(&mut self, now_ms: u64) -> Option<PlaybackState> {
        let playing = self.last_report.as_ref().map(|(report, _)| !report.paused)?;
        let position = self.local_position(now_ms)?;
        Some(self.publish(position, playing, now_ms))
    }

    fn publish(&mut self, current_time: f64, is_playing: bool, now_ms: u64) -> PlaybackState {
        let (episode, server) = self
            .source
            .or_else(|| self.playback.as_ref().map(|pb| (pb.episode, pb.server)))
            .unwrap_or((0, 0));
        let update = PlaybackState {
            current_time,
            is_playing,
            episode,
            server,
            updated_at: self.next_timestamp(now_ms),
        };
        self.accept_own(&update);
        update
    }

    /// `updatedAt` must strictly increase even if the clock doesn't
    fn next_timestamp(&mut self, now_ms: u64) -> u64 {
        let ts = now_ms.max(self.last_published + 1);
        self.last_published = ts;
        ts
    }

    fn accept_own(&mut self, update: &PlaybackState) {
        self.watermark = self.watermark.max(update.updated_at);
        self.playback = Some(update.clone());
    }

    fn apply_authority(&mut self, authority: &Authority, playback: &PlaybackState) {
        let host_id = authority.host_id().map(str::to_string);
        if host_id != self.host_id {
            debug!("Authority changed: {:?} -> {:?}", self.host_id, host_id);
            self.host_id = host_id;
            self.watermark = 0;
        }

        let role = if authority.is(&self.self_id) {
            Role::Host
        } else {
            Role::Viewer
        };
        if role != self.role {
            info!("Role is now {:?}", role);
            self.role = role;
            self.host_stalled = false;
            self.autoplay_pending = false;
            self.corrected_at = None;
            if role == Role::Host {
                self.last_published = self.last_published.max(playback.updated_at);
                self.phase = if self.last_report.is_some() {
                    SyncStatus::Synced
                } else {
                    SyncStatus::Waiting
                };
            }
        }
    }

    /// Viewer drift evaluation against the latest snapshot
    fn evaluate(&mut self, now_ms: u64, actions: &mut Vec<EngineAction>) {
        let (Some(host_time), Some(local_time)) =
            (self.estimated_host_time(now_ms), self.local_position(now_ms))
        else {
            self.phase = SyncStatus::Waiting;
            return;
        };
        let Some(host_playing) = self.playback.as_ref().map(|pb| pb.is_playing) else {
            return;
        };
        let Some((report, report_at)) = self.last_report.as_ref() else {
            return;
        };
        let local_paused = report.paused;

        // Don't judge a correction by a report that predates it
        if let Some(corrected_at) = self.corrected_at {
            if *report_at < corrected_at && now_ms < corrected_at + self.config.heartbeat_ms {
                return;
            }
        }

        let check = check_drift(local_time, host_time, self.config.drift_threshold);
        if check.needs_sync {
            info!(
                "Drift {:.2}s (local {:.2}, host {:.2}), seeking",
                check.drift, local_time, host_time
            );
            actions.push(EngineAction::Player(PlayerCommand::Seek(host_time)));
            actions.push(EngineAction::Player(PlayerCommand::for_playing(host_playing)));
            self.phase = SyncStatus::Drifted;
            self.corrected_at = Some(now_ms);
            self.note_programmatic(now_ms);
            return;
        }

        self.phase = SyncStatus::Synced;
        if local_paused == host_playing {
            debug!("Play state mismatch, host playing={}", host_playing);
            actions.push(EngineAction::Player(PlayerCommand::for_playing(host_playing)));
            self.note_programmatic(now_ms);
        }
    }

    fn expects_progress(&self) -> bool {
        match self.role {
            Role::Host => self
                .last_report
                .as_ref()
                .map(|(report, _)| !report.paused)
                .unwrap_or(false),
            Role::Viewer => self.playback.as_ref().map(|pb| pb.is_playing).unwrap_or(false),
        }
    }

    fn refresh_status(&mut self, actions: &mut Vec<EngineAction>) {
        let status = if self.buffering {
            SyncStatus::Buffering
        } else {
            self.phase
        };
        if status != self.status {
            debug!("Sync status {} -> {}", self.status.as_str(), status.as_str());
            self.status = status;
            actions.push(EngineAction::StatusChanged(status));
        }
    }
}

fn is_intent(event: ReportEvent) -> bool {
    matches!(event, ReportEvent::Play | ReportEvent::Pause | ReportEvent::Seeked)
}
