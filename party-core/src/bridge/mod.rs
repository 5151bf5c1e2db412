//! Player Bridge
//!
//! Fire-and-forget command channel into an embedded, non-introspectable player
//! surface, plus decoding of the state reports the in-player adapter sends
//! back. There is no acknowledgement: a command that the surface ignores is
//! only visible as a sync status that never settles.

mod command;
mod encoder;
mod report;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use command::PlayerCommand;
pub use encoder::{
    decode_command, default_encoders, ActionEncoder, CommandEncoder, JsonTextEncoder,
    StructuredEncoder,
};
pub use report::{PlayerReport, ReportEvent, REPORT_TAG};

/// One concrete cross-boundary message
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    /// Posted as a structured-cloneable object
    Structured(Value),
    /// Posted as a plain string
    Text(String),
}

impl BridgeMessage {
    /// Single JSON value view, for surfaces that only carry strings or values
    pub fn to_value(&self) -> Value {
        match self {
            BridgeMessage::Structured(value) => value.clone(),
            BridgeMessage::Text(text) => Value::String(text.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Player surface is not attached")]
    Detached,
    #[error("Player surface rejected message: {0}")]
    Rejected(String),
}

/// Whatever actually delivers a message into the player (an iframe's
/// `postMessage`, a native player wrapper, a simulator)
pub trait PlayerSurface: Send + Sync {
    fn post(&self, message: &BridgeMessage) -> Result<(), BridgeError>;
}

/// Sends abstract commands through every registered encoder
pub struct PlayerBridge {
    surface: Arc<dyn PlayerSurface>,
    encoders: Vec<Box<dyn CommandEncoder>>,
}

impl PlayerBridge {
    /// Bridge using the default redundant message shapes
    pub fn new(surface: Arc<dyn PlayerSurface>) -> Self {
        Self::with_encoders(surface, default_encoders())
    }

    pub fn with_encoders(
        surface: Arc<dyn PlayerSurface>,
        encoders: Vec<Box<dyn CommandEncoder>>,
    ) -> Self {
        Self { surface, encoders }
    }

    /// Add support for another player family
    pub fn register(&mut self, encoder: Box<dyn CommandEncoder>) {
        self.encoders.push(encoder);
    }

    /// Broadcast a command. Returns how many shapes the surface accepted;
    /// failures are logged and never propagated.
    pub fn send(&self, command: &PlayerCommand) -> usize {
        let mut delivered = 0;
        for encoder in &self.encoders {
            match self.surface.post(&encoder.encode(command)) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Bridge {} dropped {}: {}", encoder.name(), command, e),
            }
        }
        delivered
    }
}

/// JavaScript adapter a host app injects into the player surface.
///
/// It understands every default outbound shape and reports back tagged with
/// [`REPORT_TAG`] on a 2 s timer and on play/pause/seeked/waiting.
pub fn adapter_script() -> &'static str {
    include_str!("adapter.js")
}
