//! The seam between the bridge and the chat protocol client.
//!
//! The protocol handshake, encryption and session storage all live behind
//! [`ChatClient`]. The bridge only asks whether a session exists, connects,
//! consumes login codes and events, downloads media and sends text.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::BridgeError;

/// Server used when a send target is a bare phone number
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

// ============================================================================
// Addressing
// ============================================================================

/// A chat address of the form `user@server`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Parse an HTTP send target: a full `user@server` JID is kept as-is,
    /// anything else is treated as a user on the default server.
    pub fn parse_target(target: &str) -> Self {
        let target = target.trim();
        match target.split_once('@') {
            Some((user, server)) if !server.is_empty() => Self::new(user, server),
            _ => Self::new(target.trim_end_matches('@'), DEFAULT_USER_SERVER),
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl From<String> for Jid {
    fn from(s: String) -> Self {
        match s.split_once('@') {
            Some((user, server)) => Self::new(user, server),
            None => Self::new("", s),
        }
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

// ============================================================================
// Inbound message shapes
// ============================================================================

/// Opaque reference the client resolves back into media bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaHandle {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub id: String,
    pub sender: Jid,
    #[serde(default)]
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedTextMessage {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMessage {
    #[serde(default)]
    pub caption: Option<String>,
    pub media: MediaHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMessage {
    #[serde(default)]
    pub caption: Option<String>,
    pub media: MediaHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMessage {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    pub media: MediaHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMessage {
    /// Push-to-talk voice note rather than an attached audio file
    #[serde(default)]
    pub ptt: bool,
    pub media: MediaHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMessage {
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMessage {
    pub degrees_latitude: f64,
    pub degrees_longitude: f64,
}

/// Message body as delivered by the protocol. Any combination of fields may
/// be set; the classifier decides which one wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProtoMessage {
    pub conversation: Option<String>,
    pub extended_text_message: Option<ExtendedTextMessage>,
    pub image_message: Option<ImageMessage>,
    pub video_message: Option<VideoMessage>,
    pub document_message: Option<DocumentMessage>,
    pub audio_message: Option<AudioMessage>,
    pub contact_message: Option<ContactMessage>,
    pub location_message: Option<LocationMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub info: MessageInfo,
    pub message: ProtoMessage,
}

// ============================================================================
// Event streams
// ============================================================================

/// Everything the client reports after connecting.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message(Box<IncomingMessage>),
    Connected,
    OfflineSyncCompleted,
    LoggedOut,
    Disconnected,
    /// Any event the bridge does not act on, by its wire name
    Unhandled(String),
}

/// Items of the login-code stream opened before pairing.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginEvent {
    Code(String),
    /// Terminal results such as `success` or `timeout`
    Other(String),
}

// ============================================================================
// Client trait
// ============================================================================

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Whether a paired session already exists in the client's store
    async fn is_paired(&self) -> Result<bool, BridgeError>;

    /// Open the login-code stream. Must be called before [`ChatClient::connect`]
    /// on an unpaired session; the receiver closes when pairing finishes.
    async fn login_codes(&self) -> Result<mpsc::Receiver<LoginEvent>, BridgeError>;

    async fn connect(&self) -> Result<(), BridgeError>;

    async fn events(&self) -> Result<mpsc::Receiver<ChatEvent>, BridgeError>;

    async fn download(&self, media: &MediaHandle) -> Result<Vec<u8>, BridgeError>;

    /// Send a plain text message, returning the protocol message id
    async fn send_text(&self, to: &Jid, text: &str) -> Result<String, BridgeError>;
}

// ============================================================================
// In-memory client for tests
// ============================================================================
