//! Metrics tracking for the simulator

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use watchparty_core::SyncStatus;

/// Maximum number of log entries to keep
const MAX_LOG_ENTRIES: usize = 100;

/// A log entry for the dashboard
#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Warning,
    Sync,
    Chat,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Sync => "SYNC",
            LogLevel::Chat => "CHAT",
        }
    }
}

/// One simulated participant as the dashboard shows it
#[derive(Clone)]
pub struct ParticipantRow {
    pub name: String,
    pub is_host: bool,
    /// Which command shape this player understands
    pub dialect: &'static str,
    pub status: SyncStatus,
    /// Local player position in seconds
    pub position: f64,
    pub playing: bool,
    pub stalled: bool,
    /// Local position minus the host's, when there is a host to compare with
    pub drift: Option<f64>,
    pub corrections: u64,
}

#[derive(Clone, Copy, PartialEq)]
pub enum SimStatus {
    Starting,
    Running,
    Error,
}

/// Simulation metrics
pub struct Metrics {
    pub start_time: DateTime<Local>,

    pub room_id: Option<String>,

    /// Simulated channel delay
    pub latency_ms: u64,
    pub jitter_ms: u64,

    pub participants: Vec<ParticipantRow>,

    /// Seeks issued by sync engines to pull players back in line
    pub total_corrections: u64,

    /// Player stalls injected so far
    pub total_stalls: u64,

    /// Largest absolute drift seen since start
    pub peak_drift: f64,

    pub logs: VecDeque<LogEntry>,

    pub status: SimStatus,
}

impl Metrics {
    pub fn new(latency_ms: u64, jitter_ms: u64) -> Self {
        Self {
            start_time: Local::now(),
            room_id: None,
            latency_ms,
            jitter_ms,
            participants: Vec::new(),
            total_corrections: 0,
            total_stalls: 0,
            peak_drift: 0.0,
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            status: SimStatus::Starting,
        }
    }

    /// Add a log entry
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    /// Replace the participant table, folding drift into the running peak
    pub fn update_participants(&mut self, rows: Vec<ParticipantRow>) {
        for row in &rows {
            if let Some(drift) = row.drift {
                self.peak_drift = self.peak_drift.max(drift.abs());
            }
        }
        self.participants = rows;
    }

    pub fn correction_issued(&mut self, name: &str, target: f64) {
        self.total_corrections += 1;
        self.log(LogLevel::Sync, format!("{} corrected to {:.1}s", name, target));
    }

    pub fn stall_injected(&mut self, name: &str, seconds: f64) {
        self.total_stalls += 1;
        self.log(LogLevel::Warning, format!("{} stalls for {:.1}s", name, seconds));
    }

    /// Participants currently within tolerance
    pub fn synced_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.status == SyncStatus::Synced)
            .count()
    }

    /// Get uptime as formatted string
    pub fn uptime(&self) -> String {
        let duration = Local::now().signed_duration_since(self.start_time);
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            let hours = secs / 3600;
            let mins = (secs % 3600) / 60;
            format!("{}h {}m", hours, mins)
        }
    }
}

/// Position as m:ss.t
pub fn format_position(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0).floor() as u64;
    format!("{}:{:04.1}", minutes, seconds - (minutes * 60) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, drift: Option<f64>, status: SyncStatus) -> ParticipantRow {
        ParticipantRow {
            name: name.to_string(),
            is_host: drift.is_none(),
            dialect: "structured",
            status,
            position: 0.0,
            playing: true,
            stalled: false,
            drift,
            corrections: 0,
        }
    }

    #[test]
    fn test_log_is_bounded() {
        let mut m = Metrics::new(0, 0);
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            m.log(LogLevel::Info, format!("entry {}", i));
        }
        assert_eq!(m.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(m.logs.front().map(|e| e.message.as_str()), Some("entry 5"));
    }

    #[test]
    fn test_peak_drift_and_synced_count() {
        let mut m = Metrics::new(200, 100);
        m.update_participants(vec![
            row("host", None, SyncStatus::Synced),
            row("a", Some(-4.5), SyncStatus::Drifted),
            row("b", Some(0.2), SyncStatus::Synced),
        ]);
        assert_eq!(m.peak_drift, 4.5);
        assert_eq!(m.synced_count(), 2);

        m.update_participants(vec![row("b", Some(0.1), SyncStatus::Synced)]);
        assert_eq!(m.peak_drift, 4.5);
    }

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(0.0), "0:00.0");
        assert_eq!(format_position(75.3), "1:15.3");
        assert_eq!(format_position(9.0), "0:09.0");
    }
}
