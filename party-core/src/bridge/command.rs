//! Abstract player commands

use std::fmt;

/// Commands understood by every player adapter, whatever the concrete player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    Play,
    Pause,
    /// Absolute position in seconds
    Seek(f64),
    /// Ask the adapter for an immediate state report
    GetTime,
}

impl PlayerCommand {
    /// Name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            PlayerCommand::Play => "play",
            PlayerCommand::Pause => "pause",
            PlayerCommand::Seek(_) => "seek",
            PlayerCommand::GetTime => "getTime",
        }
    }

    /// Payload, if the command carries one
    pub fn value(&self) -> Option<f64> {
        match self {
            PlayerCommand::Seek(seconds) => Some(*seconds),
            _ => None,
        }
    }

    /// Rebuild a command from its wire name and optional payload
    pub fn from_parts(name: &str, value: Option<f64>) -> Option<Self> {
        match name {
            "play" => Some(PlayerCommand::Play),
            "pause" => Some(PlayerCommand::Pause),
            "seek" => value.filter(|v| v.is_finite()).map(PlayerCommand::Seek),
            "getTime" => Some(PlayerCommand::GetTime),
            _ => None,
        }
    }

    /// Play or pause, whichever matches `is_playing`
    pub fn for_playing(is_playing: bool) -> Self {
        if is_playing {
            PlayerCommand::Play
        } else {
            PlayerCommand::Pause
        }
    }
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerCommand::Seek(seconds) => write!(f, "seek({:.2})", seconds),
            other => write!(f, "{}", other.name()),
        }
    }
}
