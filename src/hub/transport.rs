//! Transport session: HTTP negotiation plus a text-frame WebSocket.
//!
//! Both hub protocols need the same two primitives, a JSON request/response
//! round trip for negotiation and a long-lived socket carrying text frames.
//! One [`HttpTransport`] is built per server and reused across every
//! reconnect attempt, so connection pooling and TLS setup happen once.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, Result};

/// Negotiation requests are single-shot; don't let a wedged server hold one forever.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on the WebSocket TCP connect plus upgrade handshake.
pub const CONNECT_TIMEOUT: Duration = HTTP_TIMEOUT;

/// Connection primitives a hub adapter is built on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET` a JSON document.
    async fn get_json(&self, url: &Url) -> Result<Value>;

    /// `POST` with an empty body and read a JSON document back.
    async fn post_json(&self, url: &Url) -> Result<Value>;

    /// Open a WebSocket.
    async fn open(&self, url: &Url) -> Result<Box<dyn Socket>>;
}

/// An open text-frame socket.
///
/// Adapters hold their socket while borrowed across awaits, so it must be
/// `Sync` for the adapter futures to stay `Send`.
#[async_trait]
pub trait Socket: Send + Sync {
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next text frame. `None` once the peer has closed the socket.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close politely. Errors are irrelevant at this point and swallowed.
    async fn close(&mut self);
}

/// reqwest + tokio-tungstenite implementation of [`Transport`].
pub struct HttpTransport {
    http: reqwest::Client,
    tls: native_tls::TlsConnector,
    connect_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport. With `verify_tls = false` certificate and hostname
    /// checks are off for both HTTP and WebSocket traffic; servers on a
    /// trusted LAN commonly run self-signed certificates.
    pub fn new(verify_tls: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(HTTP_TIMEOUT)
            .build()?;
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .danger_accept_invalid_hostnames(!verify_tls)
            .build()
            .map_err(|e| Error::Transport(format!("tls setup failed: {e}")))?;
        Ok(Self {
            http,
            tls,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    /// Override how long [`Transport::open`] waits for the socket to come up.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &Url) -> Result<Value> {
        let response = self.http.get(url.clone()).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json(&self, url: &Url) -> Result<Value> {
        let response = self
            .http
            .post(url.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn open(&self, url: &Url) -> Result<Box<dyn Socket>> {
        let connect = tokio_tungstenite::connect_async_tls_with_config(
            url.as_str(),
            None,
            false,
            Some(Connector::NativeTls(self.tls.clone())),
        );
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                Error::Transport(format!(
                    "websocket connect to {} timed out after {:?}",
                    url.host_str().unwrap_or("?"),
                    self.connect_timeout
                ))
            })??;
        Ok(Box::new(WsSocket { ws }))
    }
}

struct WsSocket {
    ws: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl Socket for WsSocket {
    async fn send(&mut self, text: String) -> Result<()> {
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            let msg = match self.ws.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e.into())),
            };
            match msg {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::debug!("dropping non-utf8 binary frame"),
                },
                Message::Close(frame) => {
                    tracing::debug!(?frame, "socket closed by peer");
                    return None;
                }
                // tungstenite answers pings on its own.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Append `path` to the base URL's path, dropping any query or fragment.
pub fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Swap `http(s)` for `ws(s)`.
pub fn websocket_url(url: Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::Transport(format!("unsupported scheme: {other}"))),
    };
    let mut url = url;
    url.set_scheme(scheme)
        .map_err(|_| Error::Transport(format!("cannot use scheme {scheme} for {url}")))?;
    Ok(url)
}
