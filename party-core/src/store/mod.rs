//! Room Store
//!
//! The shared realtime channel. Backends implement [`RoomStore`]; everything
//! above this module only sees paths and JSON values.

mod firebase;
mod memory;
pub(crate) mod tree;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Room store is not available")]
    Unavailable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned status {0}: {1}")]
    Status(u16, String),

    #[error("Failed to decode store value: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Subscription closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed realtime document store.
///
/// Mutations are single-path and idempotent. There is no ordering guarantee
/// between different paths.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Set the value at `path`, replacing whatever was there
    async fn create(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Append under `path` with a fresh time-ordered key; returns the key
    async fn push(&self, path: &str, value: Value) -> StoreResult<String>;

    /// Merge `patch` into `path`. Keys may be nested paths (`members/a/isHost`),
    /// `null` values delete.
    async fn update(&self, path: &str, patch: Map<String, Value>) -> StoreResult<()>;

    async fn remove(&self, path: &str) -> StoreResult<()>;

    async fn read(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Current value at `path` now, then again on every change
    async fn subscribe(&self, path: &str) -> StoreResult<Subscription>;
}

/// Value slot shared between a backend and one subscription
#[derive(Debug, Clone, Default)]
pub(crate) struct Versioned {
    seq: u64,
    value: Option<Value>,
}

/// Last-value subscription. Late readers see the latest state, never a
/// backlog. Dropping it unsubscribes.
pub struct Subscription {
    rx: watch::Receiver<Versioned>,
    primed: bool,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(rx: watch::Receiver<Versioned>, task: Option<JoinHandle<()>>) -> Self {
        Self {
            rx,
            primed: false,
            task,
        }
    }

    /// Wait for the next value. The first call returns immediately once the
    /// backend has produced an initial value. `None` once the backend is gone.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        if !self.primed {
            self.primed = true;
            if self.rx.borrow().seq > 0 {
                return Some(self.rx.borrow_and_update().value.clone());
            }
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().value.clone())
    }

    /// Latest value without waiting
    pub fn current(&self) -> Option<Value> {
        self.rx.borrow().value.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Publishes into a subscription slot, dropping deliveries older than what
/// the subscriber already has
pub(crate) fn deliver(tx: &watch::Sender<Versioned>, seq: u64, value: Option<Value>) -> bool {
    tx.send_if_modified(|slot| {
        if seq <= slot.seq {
            return false;
        }
        let initial = slot.seq == 0;
        slot.seq = seq;
        if !initial && slot.value == value {
            return false;
        }
        slot.value = value;
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscription_initial_then_changes() {
        let (tx, rx) = watch::channel(Versioned::default());
        let mut sub = Subscription::new(rx, None);

        deliver(&tx, 1, Some(json!(1)));
        assert_eq!(sub.next().await, Some(Some(json!(1))));

        deliver(&tx, 2, Some(json!(2)));
        deliver(&tx, 3, None);
        // Last value only, intermediate states are skipped
        assert_eq!(sub.next().await, Some(None));
    }

    #[tokio::test]
    async fn test_older_delivery_is_dropped() {
        let (tx, rx) = watch::channel(Versioned::default());
        let sub = Subscription::new(rx, None);

        assert!(deliver(&tx, 5, Some(json!("new"))));
        assert!(!deliver(&tx, 4, Some(json!("old"))));
        assert_eq!(sub.current(), Some(json!("new")));
    }

    #[tokio::test]
    async fn test_closed_backend_ends_subscription() {
        let (tx, rx) = watch::channel(Versioned::default());
        let mut sub = Subscription::new(rx, None);
        deliver(&tx, 1, None);
        assert_eq!(sub.next().await, Some(None));
        drop(tx);
        assert_eq!(sub.next().await, None);
    }
}
