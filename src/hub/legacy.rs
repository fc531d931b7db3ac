//! Legacy hub adapter: callback-channel protocol (`clientProtocol=1.5`).
//!
//! Bring-up is negotiate, open the socket, wait for the init frame and then
//! `start`. A single attempt is made per [`LegacyHub::start`]; the adapter
//! never retries on its own. A failed start reports
//! [`ConnectResult::Failed`] and leaves everything untouched so the host can
//! call `start` again whenever it likes.
//!
//! Every entry that arrives on a registered channel becomes an
//! [`EventEnvelope`] whose topic is the channel name.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{Instrument, debug, info, warn};
use url::Url;

use super::transport::{Socket, Transport, endpoint, websocket_url};
use super::{ConnectResult, Lifecycle, wait_for_shutdown};
use crate::config::secrets::redact_url;
use crate::error::{Error, Result};
use crate::model::job::JobKind;
use crate::model::{ConnectionState, EventEnvelope, Payload};
use crate::scheduler::SchedulerHook;
use crate::telemetry::metrics;

const SERVER: &str = "series";
const CLIENT_PROTOCOL: &str = "1.5";
const CONNECTION_DATA: &str = r#"[{"name":""}]"#;
const INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Channels the series server publishes catalog changes on.
pub const CHANNELS: [&str; 2] = ["series", "episode"];

/// One legacy hub connection.
pub struct LegacyHub {
    base_url: Url,
    api_key: SecretString,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn SchedulerHook>,
    events: mpsc::Sender<EventEnvelope>,
    channels: Vec<String>,
    lifecycle: Lifecycle,
    socket: Option<Box<dyn Socket>>,
}

impl LegacyHub {
    pub fn new(
        base_url: Url,
        api_key: SecretString,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn SchedulerHook>,
        events: mpsc::Sender<EventEnvelope>,
    ) -> Self {
        Self {
            base_url,
            api_key,
            transport,
            scheduler,
            events,
            channels: CHANNELS.iter().map(|c| c.to_string()).collect(),
            lifecycle: Lifecycle::new(SERVER),
            socket: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.current()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.lifecycle.subscribe()
    }

    /// Attempt to connect once.
    ///
    /// On success the two bulk resync jobs are queued, compensating for
    /// whatever was missed while the bridge was dark. On failure nothing is
    /// queued and the reason comes back as a value, never as an error.
    pub async fn start(&mut self) -> ConnectResult {
        let span = self.lifecycle.span().clone();
        async {
            self.lifecycle.advance(ConnectionState::Connecting);
            match self.connect().await {
                Ok(socket) => {
                    self.socket = Some(socket);
                    self.lifecycle.advance(ConnectionState::Live);
                    info!(server = SERVER, "connected to series hub");
                    self.scheduler
                        .enqueue(JobKind::FullSeriesSync, "series-hub/connected");
                    self.scheduler
                        .enqueue(JobKind::FullEpisodeSync, "series-hub/connected");
                    ConnectResult::Connected
                }
                Err(e) => {
                    debug!(server = SERVER, error = %e, "series hub unreachable");
                    self.lifecycle.advance(ConnectionState::Closed);
                    ConnectResult::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Forward frames until the server goes away or `shutdown` flips to true.
    ///
    /// Returns immediately if [`start`](Self::start) has not connected.
    pub async fn run(&mut self, shutdown: &mut watch::Receiver<bool>) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => {
                    socket.close().await;
                    break;
                }
                frame = socket.recv() => match frame {
                    Some(Ok(text)) => self.forward(&text).await,
                    Some(Err(e)) => {
                        warn!(server = SERVER, error = %e, "series hub socket error");
                        break;
                    }
                    None => break,
                },
            }
        }
        info!(server = SERVER, "disconnected from series hub");
        self.lifecycle.advance(ConnectionState::Closed);
    }

    async fn connect(&self) -> Result<Box<dyn Socket>> {
        let negotiate = self.transport.get_json(&self.url("negotiate", &[])?).await?;
        let token = negotiate
            .get("ConnectionToken")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("negotiate response has no ConnectionToken".into()))?
            .to_string();
        if negotiate.get("TryWebSockets").and_then(Value::as_bool) == Some(false) {
            return Err(Error::Protocol("server does not offer websockets".into()));
        }

        let connect = websocket_url(self.url(
            "connect",
            &[("transport", "webSockets"), ("connectionToken", &token)],
        )?)?;
        debug!(server = SERVER, url = %redact_url(&connect), "opening socket");
        let mut socket = self.transport.open(&connect).await?;
        if let Err(e) = wait_for_init(&mut socket).await {
            socket.close().await;
            return Err(e);
        }

        let started = self
            .transport
            .get_json(&self.url(
                "start",
                &[("transport", "webSockets"), ("connectionToken", &token)],
            )?)
            .await;
        match started {
            Ok(reply) if reply.get("Response").and_then(Value::as_str) == Some("started") => {
                Ok(socket)
            }
            Ok(reply) => {
                socket.close().await;
                Err(Error::Handshake(format!("unexpected start reply: {reply}")))
            }
            Err(e) => {
                socket.close().await;
                Err(e)
            }
        }
    }

    fn url(&self, action: &str, extra: &[(&str, &str)]) -> Result<Url> {
        let mut url = endpoint(&self.base_url, &format!("signalr/{action}"))?;
        url.query_pairs_mut()
            .append_pair("clientProtocol", CLIENT_PROTOCOL)
            .append_pair("connectionData", CONNECTION_DATA)
            .extend_pairs(extra.iter().copied())
            .append_pair("apikey", self.api_key.expose_secret());
        Ok(url)
    }

    async fn forward(&self, text: &str) {
        for (channel, payload) in decode_frame(text) {
            if !self.channels.iter().any(|c| c.eq_ignore_ascii_case(&channel)) {
                debug!(server = SERVER, %channel, "dropping unregistered channel");
                continue;
            }
            let envelope = EventEnvelope::from_channel(&channel.to_ascii_lowercase(), payload);
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
}

/// The server confirms the socket with an init frame (`"S": 1`) before `start`.
async fn wait_for_init(socket: &mut Box<dyn Socket>) -> Result<()> {
    let wait = async {
        loop {
            match socket.recv().await {
                Some(Ok(text)) => {
                    let frame: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    if frame.get("S").and_then(Value::as_i64) == Some(1) {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(Error::Transport("socket closed before init".into())),
            }
        }
    };
    tokio::time::timeout(INIT_TIMEOUT, wait)
        .await
        .map_err(|_| Error::Handshake("no init frame from series hub".into()))?
}

/// Split one transport frame into `(channel, payload)` pairs.
///
/// Hub invocations (`{"H","M","A"}`) use the method name as the channel and
/// the arguments as payload. Persistent-connection messages (`{"name","body"}`)
/// use their `name`. Anything else, including keep-alive `{}` frames, yields
/// nothing.
pub(crate) fn decode_frame(text: &str) -> Vec<(String, Payload)> {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };
    let Some(messages) = frame.get("M").and_then(Value::as_array) else {
        return Vec::new();
    };
    messages
        .iter()
        .filter_map(|message| {
            if let Some(method) = message.get("M").and_then(Value::as_str) {
                let mut args = message
                    .get("A")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let payload = if args.len() == 1 {
                    Payload::Single(args.remove(0))
                } else {
                    Payload::Sequence(args)
                };
                Some((method.to_string(), payload))
            } else {
                let name = message.get("name").and_then(Value::as_str)?;
                Some((name.to_string(), Payload::Single(message.clone())))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keep_alive_frame_is_empty() {
        assert!(decode_frame("{}").is_empty());
        assert!(decode_frame("not json").is_empty());
    }

    #[test]
    fn hub_invocation_uses_method_as_channel() {
        let frame = json!({
            "C": "d-1",
            "M": [{"H": "MessageHub", "M": "episode", "A": [{"body": {"resource": {"id": 4}}}]}]
        });
        let decoded = decode_frame(&frame.to_string());
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].0, "episode");
        assert_eq!(
            decoded[0].1,
            Payload::Single(json!({"body": {"resource": {"id": 4}}}))
        );
    }

    #[test]
    fn persistent_message_uses_name_as_channel() {
        let frame = json!({
            "C": "d-2",
            "M": [
                {"name": "series", "body": {"action": "updated"}},
                {"name": "health", "body": {}}
            ]
        });
        let channels: Vec<String> = decode_frame(&frame.to_string())
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        assert_eq!(channels, vec!["series", "health"]);
    }

    #[test]
    fn multi_argument_invocation_is_a_sequence() {
        let frame = json!({"M": [{"H": "h", "M": "series", "A": [1, 2]}]});
        let decoded = decode_frame(&frame.to_string());
        assert_eq!(decoded[0].1, Payload::Sequence(vec![json!(1), json!(2)]));
    }
}
