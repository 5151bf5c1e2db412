//! Watch Party - Core Library
//!
//! Keeps independently running video players showing the same frame under
//! one host's control, over a best-effort realtime database channel.

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod ffi;
pub mod identity;
pub mod party;
pub mod store;
pub mod sync;

// Re-exports for convenience
pub use bridge::{PlayerBridge, PlayerCommand, PlayerReport, PlayerSurface};
pub use config::{PartyConfig, SyncConfig};
pub use identity::{SessionIdentity, SessionStorage};
pub use party::{Coordinator, PartyEvent, PartyHandle};
pub use store::{FirebaseStore, MemoryStore, RoomStore};
pub use sync::{Room, SyncEngine, SyncStatus};

/// Current time in milliseconds since UNIX epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
