//! Runtime configuration
//!
//! Everything has a usable default; `PartyConfig::from_env` overlays
//! `WATCHPARTY_*` environment variables on top.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::sync::{BUFFER_TIMEOUT_MS, DRIFT_THRESHOLD_SECONDS, EXTRAPOLATION_CAP_SECONDS, PROGRESS_EPSILON_SECONDS};

pub const DEFAULT_CATALOG_URL: &str = "https://ophim1.com";

/// Connection settings for the realtime database
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// e.g. `https://my-app-default-rtdb.firebaseio.com`
    pub database_url: String,
    /// Database secret or ID token appended as `?auth=`
    pub secret: Option<String>,
}

impl StoreConfig {
    /// `None` for empty or placeholder URLs, which means the channel is
    /// not configured at all.
    pub fn new(database_url: &str, secret: Option<&str>) -> Option<Self> {
        let url = database_url.trim().trim_end_matches('/');
        if url.is_empty() || is_placeholder(url) || !url.starts_with("http") {
            return None;
        }
        Some(Self {
            database_url: url.to_string(),
            secret: secret
                .map(str::trim)
                .filter(|s| !s.is_empty() && !is_placeholder(s))
                .map(str::to_string),
        })
    }
}

fn is_placeholder(value: &str) -> bool {
    let lower = value.to_lowercase();
    lower.contains("your-") || lower.contains("your_") || lower.contains("placeholder") || lower.contains("xxx")
}

/// Movie catalog API settings
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CATALOG_URL.to_string(),
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Tuning knobs for the sync engine and the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Drift (seconds) beyond which a viewer is force-seeked
    pub drift_threshold: f64,
    /// Max extrapolation of a playback record (seconds)
    pub extrapolation_cap: f64,
    /// Re-entrancy guard after a programmatic player command (ms)
    pub correction_guard_ms: u64,
    /// Host broadcast and player probe interval (ms)
    pub heartbeat_ms: u64,
    /// No-progress window before a player counts as buffering (ms)
    pub buffer_timeout_ms: u64,
    pub progress_epsilon: f64,
    /// Most recent messages handed to the UI
    pub chat_window: usize,
    pub chat_text_limit: usize,
    pub name_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_threshold: DRIFT_THRESHOLD_SECONDS,
            extrapolation_cap: EXTRAPOLATION_CAP_SECONDS,
            correction_guard_ms: 750,
            heartbeat_ms: 3000,
            buffer_timeout_ms: BUFFER_TIMEOUT_MS,
            progress_epsilon: PROGRESS_EPSILON_SECONDS,
            chat_window: 100,
            chat_text_limit: 500,
            name_limit: 20,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartyConfig {
    /// `None` when no database is configured
    pub store: Option<StoreConfig>,
    pub catalog: CatalogConfig,
    pub sync: SyncConfig,
}

impl PartyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("WATCHPARTY_DATABASE_URL") {
            let secret = lookup("WATCHPARTY_DATABASE_SECRET");
            config.store = StoreConfig::new(&url, secret.as_deref());
            if config.store.is_none() {
                warn!("WATCHPARTY_DATABASE_URL is not a usable database URL; watch party disabled");
            }
        }

        if let Some(url) = lookup("WATCHPARTY_CATALOG_URL").filter(|u| !u.trim().is_empty()) {
            config.catalog.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "WATCHPARTY_CATALOG_TIMEOUT_MS") {
            config.catalog.timeout = Duration::from_millis(ms);
        }

        if let Some(threshold) = parse_var::<f64>(&lookup, "WATCHPARTY_DRIFT_THRESHOLD") {
            if threshold.is_finite() && threshold > 0.0 {
                config.sync.drift_threshold = threshold;
            }
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "WATCHPARTY_HEARTBEAT_MS").filter(|ms| *ms > 0) {
            config.sync.heartbeat_ms = ms;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "WATCHPARTY_BUFFER_TIMEOUT_MS").filter(|ms| *ms > 0) {
            config.sync.buffer_timeout_ms = ms;
        }

        config
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
