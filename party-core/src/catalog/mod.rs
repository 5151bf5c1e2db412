//! Movie catalog collaborator
//!
//! Only the detail lookup is used: it maps a room's episode/server indices to
//! something the local player can load.

mod client;
mod types;

pub use client::*;
pub use types::*;
