//! Sync Engine
//!
//! Wire documents shared through the room store, room authority, drift
//! estimation, buffering detection and the per-participant state machine.

mod buffer;
mod drift;
mod engine;
mod protocol;
mod state;

pub use buffer::*;
pub use drift::*;
pub use engine::*;
pub use protocol::*;
pub use state::*;
