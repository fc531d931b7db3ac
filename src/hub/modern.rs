//! Modern hub adapter: JSON hub protocol v1 over a WebSocket.
//!
//! Negotiate, open, handshake, then read `0x1E`-separated records until the
//! socket drops. Drops and failed attempts are retried on a fixed interval
//! for as long as the [`ReconnectPolicy`] allows (forever by default). The
//! only way out of [`ModernHub::run`] is the shutdown signal or a bounded
//! policy running out of attempts.
//!
//! Lifecycle hooks fire on every open, close and error. A reconnect fires
//! `on_open` again, so anything attached there must be idempotent.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, warn};
use url::Url;

use super::transport::{Socket, Transport, endpoint, websocket_url};
use super::{Lifecycle, wait_for_shutdown};
use crate::config::secrets::redact_url;
use crate::error::{Error, Result};
use crate::model::{ConnectionState, EventEnvelope};
use crate::telemetry::metrics;

const SERVER: &str = "movie";

/// Hub path under the server's base URL.
pub const HUB_PATH: &str = "signalr/messages";
/// The one message the movie server sends.
pub const MESSAGE_TARGET: &str = "receiveMessage";

const RECORD_SEPARATOR: char = '\u{1e}';
const HANDSHAKE: &str = r#"{"protocol":"json","version":1}"#;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// How the wait between reconnect attempts is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same wait every time.
    Interval,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub kind: Backoff,
    /// Ping period. Three silent periods count as a dropped connection.
    pub keep_alive_interval: Duration,
    pub reconnect_interval: Duration,
    /// Consecutive failed attempts allowed before giving up. `0` = unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            kind: Backoff::Interval,
            keep_alive_interval: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// May the `attempt`-th consecutive reconnect (1-based) go ahead?
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }

    pub fn delay(&self, _attempt: u32) -> Duration {
        match self.kind {
            Backoff::Interval => self.reconnect_interval,
        }
    }

    pub fn server_timeout(&self) -> Duration {
        self.keep_alive_interval * 3
    }
}

// ---------------------------------------------------------------------------
// Lifecycle hooks
// ---------------------------------------------------------------------------

pub type Hook = Arc<dyn Fn() + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

/// Observability callbacks. A panicking hook is logged and skipped; it never
/// stops the reconnect loop.
#[derive(Clone)]
pub struct LifecycleHooks {
    on_open: Vec<Hook>,
    on_close: Vec<Hook>,
    on_error: Vec<ErrorHook>,
}

impl Default for LifecycleHooks {
    fn default() -> Self {
        let opened: Hook = Arc::new(|| info!(server = SERVER, "connected to movie hub"));
        let closed: Hook = Arc::new(|| info!(server = SERVER, "disconnected from movie hub"));
        let failed: ErrorHook =
            Arc::new(|e: &Error| warn!(server = SERVER, error = %e, "movie hub error"));
        Self {
            on_open: vec![opened],
            on_close: vec![closed],
            on_error: vec![failed],
        }
    }
}

impl LifecycleHooks {
    fn fire_open(&self) {
        for hook in &self.on_open {
            guarded("on_open", || hook());
        }
    }

    fn fire_close(&self) {
        for hook in &self.on_close {
            guarded("on_close", || hook());
        }
    }

    fn fire_error(&self, error: &Error) {
        for hook in &self.on_error {
            guarded("on_error", || hook(error));
        }
    }
}

fn guarded(name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(server = SERVER, hook = name, "lifecycle hook panicked");
    }
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// Turns an invocation's arguments into an envelope. `None` = unknown shape.
pub type Decoder = fn(Vec<Value>) -> Option<EventEnvelope>;

/// `receiveMessage` carries the message object(s) as its arguments; the
/// first one names the topic.
fn decode_message(arguments: Vec<Value>) -> Option<EventEnvelope> {
    EventEnvelope::from_message(Value::Array(arguments))
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "allowReconnect")]
    allow_reconnect: bool,
}

#[derive(Debug, PartialEq)]
pub(crate) enum HubRecord {
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    Other(u8),
    Malformed,
}

impl HubRecord {
    pub(crate) fn parse(record: &str) -> Self {
        let Ok(raw) = serde_json::from_str::<RawRecord>(record) else {
            return HubRecord::Malformed;
        };
        match raw.kind {
            1 => match raw.target {
                Some(target) => HubRecord::Invocation {
                    target,
                    arguments: raw.arguments,
                },
                None => HubRecord::Malformed,
            },
            6 => HubRecord::Ping,
            7 => HubRecord::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect,
            },
            other => HubRecord::Other(other),
        }
    }
}

/// Split a frame into its non-empty records.
pub(crate) fn split_records(frame: &str) -> Vec<String> {
    frame
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn ping_record() -> String {
    format!(r#"{{"type":6}}{RECORD_SEPARATOR}"#)
}

fn close_record() -> String {
    format!(r#"{{"type":7}}{RECORD_SEPARATOR}"#)
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

enum SessionEnd {
    Shutdown,
    Dropped(Option<Error>),
}

pub struct ModernHub {
    base_url: Url,
    api_key: SecretString,
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<EventEnvelope>,
    policy: ReconnectPolicy,
    hooks: LifecycleHooks,
    handlers: HashMap<String, Decoder>,
    lifecycle: Lifecycle,
}

impl ModernHub {
    /// Adapter with the default policy, logging hooks and the
    /// `receiveMessage` handler registered.
    pub fn new(
        base_url: Url,
        api_key: SecretString,
        transport: Arc<dyn Transport>,
        events: mpsc::Sender<EventEnvelope>,
    ) -> Self {
        Self {
            base_url,
            api_key,
            transport,
            events,
            policy: ReconnectPolicy::default(),
            hooks: LifecycleHooks::default(),
            handlers: HashMap::new(),
            lifecycle: Lifecycle::new(SERVER),
        }
        .on(MESSAGE_TARGET, decode_message)
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register a handler for an invocation target. Targets match case-insensitively.
    pub fn on(mut self, target: &str, decoder: Decoder) -> Self {
        self.handlers.insert(target.to_ascii_lowercase(), decoder);
        self
    }

    pub fn on_open(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_open.push(Arc::new(hook));
        self
    }

    pub fn on_close(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_close.push(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.hooks.on_error.push(Arc::new(hook));
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.current()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.lifecycle.subscribe()
    }

    /// Connect and keep reconnecting until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let span = self.lifecycle.span().clone();
        async move {
            let mut attempt: u32 = 0;
            loop {
                self.lifecycle.advance(ConnectionState::Connecting);
                let connected = tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => None,
                    result = self.connect() => Some(result),
                };
                let Some(connected) = connected else {
                    self.lifecycle.advance(ConnectionState::Closed);
                    return;
                };

                match connected {
                    Ok((socket, pending)) => {
                        attempt = 0;
                        self.lifecycle.advance(ConnectionState::Live);
                        self.hooks.fire_open();
                        let end = self.pump(socket, pending, &mut shutdown).await;
                        self.hooks.fire_close();
                        match end {
                            SessionEnd::Shutdown => {
                                self.lifecycle.advance(ConnectionState::Closed);
                                return;
                            }
                            SessionEnd::Dropped(Some(e)) => self.hooks.fire_error(&e),
                            SessionEnd::Dropped(None) => {}
                        }
                    }
                    Err(e) => self.hooks.fire_error(&e),
                }

                attempt += 1;
                if !self.policy.allows(attempt) {
                    warn!(server = SERVER, attempt, "reconnect attempts exhausted");
                    self.lifecycle.advance(ConnectionState::Closed);
                    return;
                }
                self.lifecycle.advance(ConnectionState::Retrying);
                metrics::reconnect_attempts().add(1, &[KeyValue::new("server", SERVER)]);
                let delay = self.policy.delay(attempt);
                debug!(server = SERVER, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => {
                        self.lifecycle.advance(ConnectionState::Closed);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Negotiate, open and handshake. Returns the socket plus any records
    /// that arrived in the same frame as the handshake reply.
    async fn connect(&self) -> Result<(Box<dyn Socket>, Vec<String>)> {
        let key = self.api_key.expose_secret();

        let mut negotiate = endpoint(&self.base_url, &format!("{HUB_PATH}/negotiate"))?;
        negotiate
            .query_pairs_mut()
            .append_pair("access_token", key)
            .append_pair("negotiateVersion", "1");
        let reply = self.transport.post_json(&negotiate).await?;
        if let Some(error) = reply.get("error").and_then(Value::as_str) {
            return Err(Error::Handshake(error.to_string()));
        }
        let token = reply
            .get("connectionToken")
            .or_else(|| reply.get("connectionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("negotiate response has no connection token".into()))?
            .to_string();

        let mut url = websocket_url(endpoint(&self.base_url, HUB_PATH)?)?;
        url.query_pairs_mut()
            .append_pair("id", &token)
            .append_pair("access_token", key);
        debug!(server = SERVER, url = %redact_url(&url), "opening socket");
        let mut socket = self.transport.open(&url).await?;
        match handshake(&mut socket).await {
            Ok(pending) => Ok((socket, pending)),
            Err(e) => {
                socket.close().await;
                Err(e)
            }
        }
    }

    async fn pump(
        &self,
        mut socket: Box<dyn Socket>,
        pending: Vec<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        for record in pending {
            if let Some(end) = self.handle_record(&record).await {
                socket.close().await;
                return end;
            }
        }

        let timeout = self.policy.server_timeout();
        let mut keep_alive = tokio::time::interval(self.policy.keep_alive_interval);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keep_alive.tick().await;
        let mut last_heard = Instant::now();

        loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => {
                    let _ = socket.send(close_record()).await;
                    socket.close().await;
                    return SessionEnd::Shutdown;
                }
                _ = keep_alive.tick() => {
                    if last_heard.elapsed() > timeout {
                        socket.close().await;
                        return SessionEnd::Dropped(Some(Error::Transport(format!(
                            "no traffic from server for {}s",
                            timeout.as_secs()
                        ))));
                    }
                    if let Err(e) = socket.send(ping_record()).await {
                        return SessionEnd::Dropped(Some(e));
                    }
                }
                frame = socket.recv() => match frame {
                    None => return SessionEnd::Dropped(None),
                    Some(Err(e)) => return SessionEnd::Dropped(Some(e)),
                    Some(Ok(text)) => {
                        last_heard = Instant::now();
                        for record in split_records(&text) {
                            if let Some(end) = self.handle_record(&record).await {
                                socket.close().await;
                                return end;
                            }
                        }
                    }
                },
            }
        }
    }

    async fn handle_record(&self, record: &str) -> Option<SessionEnd> {
        match HubRecord::parse(record) {
            HubRecord::Invocation { target, arguments } => {
                self.deliver(&target, arguments).await;
                None
            }
            HubRecord::Ping => None,
            HubRecord::Close {
                error,
                allow_reconnect,
            } => {
                info!(server = SERVER, ?error, allow_reconnect, "server closed the hub connection");
                Some(SessionEnd::Dropped(
                    error.map(|e| Error::Transport(format!("server closed connection: {e}"))),
                ))
            }
            HubRecord::Other(kind) => {
                debug!(server = SERVER, kind, "ignoring hub record");
                None
            }
            HubRecord::Malformed => {
                debug!(server = SERVER, record, "malformed hub record");
                None
            }
        }
    }

    async fn deliver(&self, target: &str, arguments: Vec<Value>) {
        let Some(decode) = self.handlers.get(&target.to_ascii_lowercase()) else {
            debug!(server = SERVER, target, "no handler for target");
            return;
        };
        let Some(envelope) = decode(arguments) else {
            debug!(server = SERVER, target, "unrecognized message shape");
            return;
        };
        metrics::events_received().add(
            1,
            &[
                KeyValue::new("server", SERVER),
                KeyValue::new("topic", envelope.topic.to_string()),
            ],
        );
        if self.events.send(envelope).await.is_err() {
            warn!(server = SERVER, "dispatcher gone, dropping event");
        }
    }
}

async fn handshake(socket: &mut Box<dyn Socket>) -> Result<Vec<String>> {
    socket.send(format!("{HANDSHAKE}{RECORD_SEPARATOR}")).await?;
    let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, socket.recv())
        .await
        .map_err(|_| Error::Handshake("timed out waiting for handshake reply".into()))?;
    let text = match reply {
        Some(Ok(text)) => text,
        Some(Err(e)) => return Err(e),
        None => return Err(Error::Handshake("socket closed during handshake".into())),
    };

    let mut records = split_records(&text).into_iter();
    let first = records
        .next()
        .ok_or_else(|| Error::Handshake("empty handshake reply".into()))?;
    let reply: Value = serde_json::from_str(&first)
        .map_err(|e| Error::Handshake(format!("malformed handshake reply: {e}")))?;
    if let Some(error) = reply.get("error").and_then(Value::as_str) {
        return Err(Error::Handshake(error.to_string()));
    }
    Ok(records.collect())
}
