//! Firebase Realtime Database backend
//!
//! Plain REST for mutations and reads, server-sent events for subscriptions.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::StoreConfig;

use super::tree;
use super::{deliver, RoomStore, StoreError, StoreResult, Subscription, Versioned};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Applies to plain requests only; event streams stay open indefinitely
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

/// Client for one database
#[derive(Debug, Clone)]
pub struct FirebaseStore {
    http: Client,
    base_url: String,
    secret: Option<String>,
}

impl FirebaseStore {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: config.database_url.trim_end_matches('/').to_string(),
            secret: config.secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.http.request(method, self.url(path));
        if let Some(secret) = &self.secret {
            req = req.query(&[("auth", secret)]);
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> StoreResult<Response> {
        let resp = req.timeout(REQUEST_TIMEOUT).send().await?;
        check_status(resp).await
    }
}

async fn check_status(resp: Response) -> StoreResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Status(status.as_u16(), body))
}

#[async_trait]
impl RoomStore for FirebaseStore {
    #[instrument(skip(self, value))]
    async fn create(&self, path: &str, value: Value) -> StoreResult<()> {
        self.send(self.request(Method::PUT, path).json(&value)).await?;
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn push(&self, path: &str, value: Value) -> StoreResult<String> {
        let resp = self.send(self.request(Method::POST, path).json(&value)).await?;
        let body: PushResponse = resp.json().await?;
        Ok(body.name)
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, path: &str, patch: Map<String, Value>) -> StoreResult<()> {
        self.send(self.request(Method::PATCH, path).json(&patch)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, path: &str) -> StoreResult<()> {
        self.send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    async fn read(&self, path: &str) -> StoreResult<Option<Value>> {
        let resp = self.send(self.request(Method::GET, path)).await?;
        let value: Value = resp.json().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn subscribe(&self, path: &str) -> StoreResult<Subscription> {
        let (tx, rx) = watch::channel(Versioned::default());
        let req = self
            .request(Method::GET, path)
            .header(ACCEPT, "text/event-stream");
        let path = path.to_string();
        let task = tokio::spawn(async move {
            run_stream(req, &path, tx).await;
        });
        Ok(Subscription::new(rx, Some(task)))
    }
}

enum StreamEnd {
    /// Server closed the stream or revoked auth; reconnect
    Reconnect,
    /// Server cancelled the listen (permissions); stop
    Cancelled,
}

/// Keep one event stream alive until every receiver is gone
async fn run_stream(req: RequestBuilder, path: &str, tx: watch::Sender<Versioned>) {
    let mut backoff = RECONNECT_MIN;
    let mut seq = 0u64;

    loop {
        if tx.is_closed() {
            return;
        }
        let Some(attempt) = req.try_clone() else {
            warn!("Stream request for {} cannot be retried", path);
            return;
        };

        let mut cache = Value::Null;
        match open_stream(attempt, &tx, &mut cache, &mut seq).await {
            Ok(StreamEnd::Cancelled) => {
                warn!("Listen on {} cancelled by server", path);
                return;
            }
            Ok(StreamEnd::Reconnect) => {
                debug!("Stream on {} ended, reconnecting", path);
                backoff = RECONNECT_MIN;
            }
            Err(e) => {
                warn!("Stream on {} failed: {} (retry in {:?})", path, e, backoff);
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(RECONNECT_MAX);
    }
}

async fn open_stream(
    req: RequestBuilder,
    tx: &watch::Sender<Versioned>,
    cache: &mut Value,
    seq: &mut u64,
) -> StoreResult<StreamEnd> {
    let resp = check_status(req.send().await?).await?;
    info!("Event stream connected");

    let mut body = resp.bytes_stream();
    let mut parser = SseParser::default();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for event in parser.feed(&chunk) {
            match apply_event(cache, &event)? {
                StreamEvent::Changed => {
                    *seq += 1;
                    let value = if cache.is_null() { None } else { Some(cache.clone()) };
                    deliver(tx, *seq, value);
                }
                StreamEvent::KeepAlive => {}
                StreamEvent::Cancel => return Ok(StreamEnd::Cancelled),
                StreamEvent::AuthRevoked => return Ok(StreamEnd::Reconnect),
            }
        }
        if tx.is_closed() {
            return Ok(StreamEnd::Reconnect);
        }
    }

    Ok(StreamEnd::Reconnect)
}

#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental `text/event-stream` line parser
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');

            if line.is_empty() {
                if self.event.is_some() || !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take().unwrap_or_else(|| "message".to_string()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event = Some(name.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.trim_start().to_string());
            }
            // comments (":") and unknown fields are ignored
        }

        events
    }
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Changed,
    KeepAlive,
    Cancel,
    AuthRevoked,
}

#[derive(Deserialize)]
struct ChangeEvent {
    path: String,
    data: Value,
}

/// Fold one server event into the cached value at the subscribed path
fn apply_event(cache: &mut Value, event: &SseEvent) -> StoreResult<StreamEvent> {
    match event.event.as_str() {
        "put" => {
            let change: ChangeEvent = serde_json::from_str(&event.data)?;
            tree::set(cache, &change.path, change.data);
            Ok(StreamEvent::Changed)
        }
        "patch" => {
            let change: ChangeEvent = serde_json::from_str(&event.data)?;
            match change.data {
                Value::Object(map) => tree::patch(cache, &change.path, &map),
                other => tree::set(cache, &change.path, other),
            }
            Ok(StreamEvent::Changed)
        }
        "cancel" => Ok(StreamEvent::Cancel),
        "auth_revoked" => Ok(StreamEvent::AuthRevoked),
        _ => Ok(StreamEvent::KeepAlive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, data: Value) -> SseEvent {
        SseEvent {
            event: name.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_parser_handles_split_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: put\nda").is_empty());
        let events = parser.feed(b"ta: {\"path\":\"/\",\"data\":1}\r\n\r\nevent: keep-alive\ndata: null\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent { event: "put".into(), data: "{\"path\":\"/\",\"data\":1}".into() },
                SseEvent { event: "keep-alive".into(), data: "null".into() },
            ]
        );
    }

    #[test]
    fn test_put_and_patch_fold_into_cache() {
        let mut cache = Value::Null;

        let initial = event("put", json!({ "path": "/", "data": { "hostId": "a", "playback": { "currentTime": 1.0 } } }));
        assert_eq!(apply_event(&mut cache, &initial).unwrap(), StreamEvent::Changed);

        let nested = event("put", json!({ "path": "/playback/currentTime", "data": 7.5 }));
        apply_event(&mut cache, &nested).unwrap();

        let patch = event("patch", json!({ "path": "/", "data": { "hostId": "b", "members/b/isHost": true } }));
        apply_event(&mut cache, &patch).unwrap();

        assert_eq!(
            cache,
            json!({ "hostId": "b", "playback": { "currentTime": 7.5 }, "members": { "b": { "isHost": true } } })
        );

        let deleted = event("put", json!({ "path": "/", "data": null }));
        apply_event(&mut cache, &deleted).unwrap();
        assert_eq!(cache, Value::Null);
    }

    #[test]
    fn test_control_events() {
        let mut cache = Value::Null;
        assert_eq!(apply_event(&mut cache, &event("keep-alive", Value::Null)).unwrap(), StreamEvent::KeepAlive);
        assert_eq!(apply_event(&mut cache, &event("cancel", Value::Null)).unwrap(), StreamEvent::Cancel);
        assert_eq!(
            apply_event(&mut cache, &event("auth_revoked", json!("expired"))).unwrap(),
            StreamEvent::AuthRevoked
        );
    }

    #[test]
    fn test_url_and_auth() {
        let config = StoreConfig::new("https://demo.firebaseio.com/", Some("tok")).unwrap();
        let store = FirebaseStore::new(&config).unwrap();
        assert_eq!(store.url("/rooms/r1/"), "https://demo.firebaseio.com/rooms/r1.json");
        assert_eq!(store.url(""), "https://demo.firebaseio.com/.json");

        let req = store.request(Method::GET, "rooms").build().unwrap();
        assert_eq!(req.url().query(), Some("auth=tok"));
    }
}
