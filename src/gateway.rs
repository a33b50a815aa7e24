//! [`ChatClient`] backed by an out-of-process chat gateway.
//!
//! The gateway owns the protocol session and its store. It is reached over
//! plain HTTP:
//!
//! - `GET  /session`          - `{"paired": bool}`
//! - `POST /session/connect`  - open the protocol connection
//! - `GET  /session/qr`       - NDJSON stream of `{"event": "code", "code": ".."}`
//! - `GET  /events`           - NDJSON stream of `{"type": "message", ..}` etc.
//! - `GET  /media/{id}`       - raw media bytes
//! - `POST /messages`         - `{"to", "text"}` -> `{"id"}`

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::{ChatClient, ChatEvent, IncomingMessage, Jid, LoginEvent, MediaHandle};
use crate::error::BridgeError;

/// Buffered events between the stream reader and its consumer
const STREAM_BUFFER: usize = 64;

pub struct GatewayClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct SessionStatus {
    paired: bool,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Deserialize)]
struct WireLoginEvent {
    event: String,
    #[serde(default)]
    code: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-success response to [`BridgeError::Gateway`].
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BridgeError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(BridgeError::Gateway { status, message })
    }

    /// Open a streaming GET and forward each decoded line into a channel.
    async fn open_stream<T, F>(&self, path: &str, decode: F) -> Result<mpsc::Receiver<T>, BridgeError>
    where
        T: Send + 'static,
        F: Fn(&str) -> Result<T, BridgeError> + Send + 'static,
    {
        let response = Self::check(self.http.get(self.url(path)).send().await?).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let path = path.to_string();

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Gateway stream {} failed: {}", path, e);
                        break;
                    }
                };
                buf.extend_from_slice(&chunk);

                for line in drain_lines(&mut buf) {
                    match decode(&line) {
                        Ok(item) => {
                            if tx.send(item).await.is_err() {
                                // Consumer hung up
                                return;
                            }
                        }
                        Err(e) => warn!("Skipping undecodable line on {}: {}", path, e),
                    }
                }
            }
            debug!("Gateway stream {} closed", path);
        });

        Ok(rx)
    }
}

/// Split complete lines off the front of `buf`, leaving any partial tail.
/// Blank lines are dropped.
pub fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if !text.is_empty() {
            lines.push(text.to_string());
        }
    }
    lines
}

pub fn decode_login_event(line: &str) -> Result<LoginEvent, BridgeError> {
    let wire: WireLoginEvent = serde_json::from_str(line)?;
    Ok(match (wire.event.as_str(), wire.code) {
        ("code", Some(code)) => LoginEvent::Code(code),
        _ => LoginEvent::Other(wire.event),
    })
}

pub fn decode_chat_event(line: &str) -> Result<ChatEvent, BridgeError> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(match kind.as_str() {
        "message" => ChatEvent::Message(Box::new(serde_json::from_value::<IncomingMessage>(value)?)),
        "connected" => ChatEvent::Connected,
        "offline_sync_completed" => ChatEvent::OfflineSyncCompleted,
        "logged_out" => ChatEvent::LoggedOut,
        "disconnected" => ChatEvent::Disconnected,
        _ => ChatEvent::Unhandled(kind),
    })
}

#[async_trait]
impl ChatClient for GatewayClient {
    async fn is_paired(&self) -> Result<bool, BridgeError> {
        let response = Self::check(self.http.get(self.url("/session")).send().await?).await?;
        let status: SessionStatus = response.json().await?;
        Ok(status.paired)
    }

    async fn login_codes(&self) -> Result<mpsc::Receiver<LoginEvent>, BridgeError> {
        self.open_stream("/session/qr", decode_login_event).await
    }

    async fn connect(&self) -> Result<(), BridgeError> {
        Self::check(self.http.post(self.url("/session/connect")).send().await?).await?;
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::Receiver<ChatEvent>, BridgeError> {
        self.open_stream("/events", decode_chat_event).await
    }

    async fn download(&self, media: &MediaHandle) -> Result<Vec<u8>, BridgeError> {
        let url = self.url(&format!("/media/{}", urlencoding::encode(&media.id)));
        let response = Self::check(self.http.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn send_text(&self, to: &Jid, text: &str) -> Result<String, BridgeError> {
        let response = Self::check(
            self.http
                .post(self.url("/messages"))
                .json(&serde_json::json!({ "to": to, "text": text }))
                .send()
                .await?,
        )
        .await?;
        let sent: SendResponse = response.json().await?;
        Ok(sent.id)
    }
}
