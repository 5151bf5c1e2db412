//! Session identity
//!
//! A stable pseudonymous participant identity per client storage scope. The
//! identity is created on first use and persisted through an injected
//! [`SessionStorage`], so tests can run against an in-memory one.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const SESSION_KEY: &str = "watchparty_session";

const ADJECTIVES: &[&str] = &["Happy", "Brave", "Sleepy", "Swift", "Cool", "Lucky", "Cozy"];
const NOUNS: &[&str] = &["Otter", "Panda", "Fox", "Rabbit", "Dragon", "Tiger", "Owl"];

/// Key-value persistence port
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
}

/// Storage that lives as long as the process
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One file per key inside a directory
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)
    }
}

/// The persisted identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: u64,
}

/// Signed-in user, when the host app has one
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub uid: String,
    pub display_name: Option<String>,
}

/// Identity service over a storage port
pub struct SessionIdentity {
    storage: Arc<dyn SessionStorage>,
    cached: Mutex<Option<Session>>,
}

impl SessionIdentity {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            cached: Mutex::new(None),
        }
    }

    /// Identity backed by process memory only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::default()))
    }

    /// Current identity, created and persisted on first call
    pub fn get_session(&self) -> Session {
        let mut cached = self.cached.lock();
        if let Some(session) = cached.as_ref() {
            return session.clone();
        }

        let session = match self.load() {
            Some(session) => session,
            None => {
                let session = Session {
                    id: generate_id(crate::now_ms()),
                    name: generate_name(),
                    created_at: crate::now_ms(),
                };
                info!("Created session {} ({})", session.id, session.name);
                self.persist(&session);
                session
            }
        };
        *cached = Some(session.clone());
        session
    }

    /// Change the display name; the id never changes
    pub fn update_name(&self, name: &str) -> Session {
        let mut session = self.get_session();
        session.name = name.to_string();
        self.persist(&session);
        *self.cached.lock() = Some(session.clone());
        session
    }

    /// A signed-in user's display name wins over the generated one
    pub fn apply_auth(&self, user: &AuthUser) -> Session {
        let session = self.get_session();
        match user.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && name != session.name => {
                debug!("Using display name of {}", user.uid);
                self.update_name(name)
            }
            _ => session,
        }
    }

    fn load(&self) -> Option<Session> {
        let raw = self.storage.get(SESSION_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Discarding unreadable session: {}", e);
                None
            }
        }
    }

    fn persist(&self, session: &Session) {
        let result = serde_json::to_string(session)
            .map_err(io::Error::from)
            .and_then(|raw| self.storage.set(SESSION_KEY, &raw));
        if let Err(e) = result {
            warn!("Failed to persist session: {}", e);
        }
    }
}

/// `user_<ms>_<6 base36 chars>`
fn generate_id(now_ms: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("user_{}_{}", now_ms, suffix)
}

fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    format!("{}{}{}", adjective, noun, rng.gen_range(0..100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_is_stable() {
        let identity = SessionIdentity::in_memory();
        let first = identity.get_session();
        let second = identity.get_session();
        assert_eq!(first, second);
        assert!(first.id.starts_with("user_"));
        assert_eq!(first.id.rsplit('_').next().map(str::len), Some(6));
        assert!(!first.name.is_empty());
    }

    #[test]
    fn test_session_survives_new_instance_on_same_storage() {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::default());
        let first = SessionIdentity::new(storage.clone()).get_session();
        let again = SessionIdentity::new(storage).get_session();
        assert_eq!(first, again);
    }

    #[test]
    fn test_update_name_keeps_id() {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::default());
        let identity = SessionIdentity::new(storage.clone());
        let before = identity.get_session();
        let after = identity.update_name("Movie Buff");

        assert_eq!(after.id, before.id);
        assert_eq!(after.name, "Movie Buff");
        assert_eq!(SessionIdentity::new(storage).get_session().name, "Movie Buff");
    }

    #[test]
    fn test_corrupt_storage_creates_fresh_session() {
        let storage = Arc::new(MemoryStorage::default());
        storage.set(SESSION_KEY, "{not json").unwrap();
        let session = SessionIdentity::new(storage).get_session();
        assert!(session.id.starts_with("user_"));
    }

    #[test]
    fn test_auth_display_name_overrides() {
        let identity = SessionIdentity::in_memory();
        let id = identity.get_session().id;

        let session = identity.apply_auth(&AuthUser {
            uid: "firebase-uid".to_string(),
            display_name: Some("Ann".to_string()),
        });
        assert_eq!(session.name, "Ann");
        assert_eq!(session.id, id);

        let unchanged = identity.apply_auth(&AuthUser {
            uid: "firebase-uid".to_string(),
            display_name: Some("  ".to_string()),
        });
        assert_eq!(unchanged.name, "Ann");
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = std::env::temp_dir().join(format!("watchparty-identity-{}", generate_id(0)));
        let storage = FileStorage::new(&dir);
        assert_eq!(storage.get("k"), None);
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").as_deref(), Some("v"));
        let _ = fs::remove_dir_all(&dir);
    }
}
