//! In-process room store
//!
//! Used by tests and the simulator. Delivery to subscribers can be delayed by
//! a fixed latency plus random jitter to mimic a remote channel; deliveries on
//! different paths then race each other, deliveries on one path stay ordered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::debug;

use super::tree;
use super::{deliver, RoomStore, StoreError, StoreResult, Subscription, Versioned};

const PUSH_CHARS: &[u8] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

struct Subscriber {
    path: String,
    tx: Arc<watch::Sender<Versioned>>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    seq: u64,
    push_seq: u64,
}

type Delivery = (Arc<watch::Sender<Versioned>>, u64, Option<Value>);

impl Inner {
    /// Snapshot every subscriber that can observe a change at `path`
    fn collect(&mut self, path: &str) -> Vec<Delivery> {
        self.subscribers.retain(|s| !s.tx.is_closed());
        let mut deliveries = Vec::new();
        for sub in &self.subscribers {
            if tree::overlaps(&sub.path, path) {
                self.seq += 1;
                let value = tree::get(&self.root, &sub.path).cloned();
                deliveries.push((sub.tx.clone(), self.seq, value));
            }
        }
        deliveries
    }
}

/// Shared JSON tree with realtime-database semantics
pub struct MemoryStore {
    inner: Mutex<Inner>,
    latency: Duration,
    jitter: Duration,
    online: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store with immediate delivery
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO, Duration::ZERO)
    }

    /// Store whose change notifications arrive after `latency` plus up to `jitter`
    pub fn with_latency(latency: Duration, jitter: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            latency,
            jitter,
            online: AtomicBool::new(true),
        }
    }

    /// Simulate the backend dropping off (every operation fails) or coming back
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// The whole tree, for assertions
    pub fn snapshot(&self) -> Value {
        self.inner.lock().root.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn mutate(&self, path: &str, apply: impl FnOnce(&mut Value)) -> StoreResult<()> {
        self.check_online()?;
        let deliveries = {
            let mut inner = self.inner.lock();
            apply(&mut inner.root);
            inner.collect(path)
        };
        self.dispatch(deliveries);
        Ok(())
    }

    fn dispatch(&self, deliveries: Vec<Delivery>) {
        if self.latency.is_zero() && self.jitter.is_zero() {
            for (tx, seq, value) in deliveries {
                deliver(&tx, seq, value);
            }
            return;
        }

        let mut rng = rand::thread_rng();
        for (tx, seq, value) in deliveries {
            let jitter_ms = self.jitter.as_millis() as u64;
            let extra = if jitter_ms > 0 { rng.gen_range(0..=jitter_ms) } else { 0 };
            let delay = self.latency + Duration::from_millis(extra);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !deliver(&tx, seq, value) {
                    debug!("Delivery {} superseded", seq);
                }
            });
        }
    }
}

/// Time-ordered unique key, lexicographically sortable like server push ids
fn push_key(now_ms: u64, seq: u64) -> String {
    let mut key = Vec::with_capacity(20);
    let mut ts = now_ms;
    let mut time_chars = [0u8; 8];
    for slot in time_chars.iter_mut().rev() {
        *slot = PUSH_CHARS[(ts % 64) as usize];
        ts /= 64;
    }
    key.extend_from_slice(&time_chars);

    let mut n = seq;
    let mut seq_chars = [0u8; 12];
    for slot in seq_chars.iter_mut().rev() {
        *slot = PUSH_CHARS[(n % 64) as usize];
        n /= 64;
    }
    key.extend_from_slice(&seq_chars);

    key.into_iter().map(char::from).collect()
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn create(&self, path: &str, value: Value) -> StoreResult<()> {
        self.mutate(path, |root| tree::set(root, path, value))
    }

    async fn push(&self, path: &str, value: Value) -> StoreResult<String> {
        self.check_online()?;
        let key = {
            let mut inner = self.inner.lock();
            inner.push_seq += 1;
            push_key(crate::now_ms(), inner.push_seq)
        };
        let child = tree::join(path, &key);
        self.mutate(&child, |root| tree::set(root, &child, value))?;
        Ok(key)
    }

    async fn update(&self, path: &str, patch: Map<String, Value>) -> StoreResult<()> {
        self.mutate(path, |root| tree::patch(root, path, &patch))
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        self.mutate(path, |root| tree::set(root, path, Value::Null))
    }

    async fn read(&self, path: &str) -> StoreResult<Option<Value>> {
        self.check_online()?;
        Ok(tree::get(&self.inner.lock().root, path).cloned())
    }

    async fn subscribe(&self, path: &str) -> StoreResult<Subscription> {
        self.check_online()?;
        let (tx, rx) = watch::channel(Versioned::default());
        let tx = Arc::new(tx);
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        let value = tree::get(&inner.root, path).cloned();
        deliver(&tx, seq, value);
        inner.subscribers.push(Subscriber {
            path: path.to_string(),
            tx,
        });
        Ok(Subscription::new(rx, None))
    }
}
