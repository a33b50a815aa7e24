//! Inbound message classification and persistence.
//!
//! Every inbound message maps to exactly one [`ContentKind`]. Predicates are
//! checked in a fixed order and the first match wins, so a message carrying
//! both a conversation text and an image is logged as `text`.
//!
//! Media kinds are downloaded and written to the [`MediaStore`] before the
//! log row is appended; if either step fails nothing is appended.

use std::sync::Arc;

use tracing::{debug, info};

use crate::client::{
    AudioMessage, ChatClient, ContactMessage, DocumentMessage, ImageMessage, IncomingMessage,
    LocationMessage, MediaHandle, ProtoMessage, VideoMessage,
};
use crate::error::BridgeError;
use crate::media::MediaStore;
use crate::message_log::{LogRecord, MessageLog};

/// Summary written for messages of a shape the bridge does not understand
pub const UNKNOWN_SUMMARY: &str = "unsupported message type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    ExtendedText,
    Image,
    Video,
    Document,
    Audio,
    Contact,
    Location,
    Unknown,
}

impl ContentKind {
    /// Value of the `type` column and the media subdirectory name
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::ExtendedText => "extended_text",
            ContentKind::Image => "image",
            ContentKind::Video => "video",
            ContentKind::Document => "document",
            ContentKind::Audio => "audio",
            ContentKind::Contact => "contact",
            ContentKind::Location => "location",
            ContentKind::Unknown => "unknown",
        }
    }
}

/// The winning shape of a message, borrowing the part that matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classified<'a> {
    Text(&'a str),
    ExtendedText(&'a str),
    Image(&'a ImageMessage),
    Video(&'a VideoMessage),
    Document(&'a DocumentMessage),
    Audio(&'a AudioMessage),
    Contact(&'a ContactMessage),
    Location(&'a LocationMessage),
    Unknown,
}

impl Classified<'_> {
    pub fn kind(&self) -> ContentKind {
        match self {
            Classified::Text(_) => ContentKind::Text,
            Classified::ExtendedText(_) => ContentKind::ExtendedText,
            Classified::Image(_) => ContentKind::Image,
            Classified::Video(_) => ContentKind::Video,
            Classified::Document(_) => ContentKind::Document,
            Classified::Audio(_) => ContentKind::Audio,
            Classified::Contact(_) => ContentKind::Contact,
            Classified::Location(_) => ContentKind::Location,
            Classified::Unknown => ContentKind::Unknown,
        }
    }
}

/// Pick the single content kind of `msg`.
pub fn classify(msg: &ProtoMessage) -> Classified<'_> {
    if let Some(text) = msg.conversation.as_deref().filter(|t| !t.is_empty()) {
        return Classified::Text(text);
    }
    if let Some(ext) = &msg.extended_text_message {
        return Classified::ExtendedText(&ext.text);
    }
    if let Some(image) = &msg.image_message {
        return Classified::Image(image);
    }
    if let Some(video) = &msg.video_message {
        return Classified::Video(video);
    }
    if let Some(doc) = &msg.document_message {
        return Classified::Document(doc);
    }
    if let Some(audio) = &msg.audio_message {
        return Classified::Audio(audio);
    }
    if let Some(contact) = &msg.contact_message {
        return Classified::Contact(contact);
    }
    if let Some(location) = &msg.location_message {
        return Classified::Location(location);
    }
    Classified::Unknown
}

/// `"<label> (<path>)"`, or just the path when there is no label
fn media_summary(label: Option<&str>, path: &std::path::Path) -> String {
    match label.filter(|l| !l.is_empty()) {
        Some(label) => format!("{} ({})", label, path.display()),
        None => path.display().to_string(),
    }
}

fn location_summary(location: &LocationMessage) -> String {
    format!(
        "{:.6},{:.6}",
        location.degrees_latitude, location.degrees_longitude
    )
}

// ============================================================================
// Handler
// ============================================================================

/// Turns inbound messages into log rows, saving their media on the way.
pub struct InboundHandler {
    client: Arc<dyn ChatClient>,
    media: MediaStore,
    log: Arc<MessageLog>,
}

impl InboundHandler {
    pub fn new(client: Arc<dyn ChatClient>, media: MediaStore, log: Arc<MessageLog>) -> Self {
        Self { client, media, log }
    }

    /// Classify, persist media if any, and append exactly one record.
    pub async fn handle(&self, incoming: &IncomingMessage) -> Result<LogRecord, BridgeError> {
        let sender = incoming.info.sender.to_string();
        let classified = classify(&incoming.message);
        let kind = classified.kind();

        let text = match classified {
            Classified::Text(text) | Classified::ExtendedText(text) => text.to_string(),
            Classified::Image(image) => {
                let path = self.store_media(kind, &image.media).await?;
                media_summary(image.caption.as_deref(), &path)
            }
            Classified::Video(video) => {
                let path = self.store_media(kind, &video.media).await?;
                media_summary(video.caption.as_deref(), &path)
            }
            Classified::Document(doc) => {
                let path = self.store_media(kind, &doc.media).await?;
                let label = doc.file_name.as_deref().or(doc.caption.as_deref());
                media_summary(label, &path)
            }
            Classified::Audio(audio) => {
                let path = self.store_media(kind, &audio.media).await?;
                media_summary(audio.ptt.then_some("voice note"), &path)
            }
            Classified::Contact(contact) => contact.display_name.clone(),
            Classified::Location(location) => location_summary(location),
            Classified::Unknown => UNKNOWN_SUMMARY.to_string(),
        };

        info!(
            "Received {} message from {} ({}): {}",
            kind.as_str(),
            sender,
            incoming.info.push_name.as_deref().unwrap_or("-"),
            text
        );

        let record = LogRecord {
            sender,
            kind: kind.as_str().to_string(),
            text,
            timestamp: incoming.info.timestamp,
        };
        self.log.append(&record)?;
        Ok(record)
    }

    async fn store_media(
        &self,
        kind: ContentKind,
        handle: &MediaHandle,
    ) -> Result<std::path::PathBuf, BridgeError> {
        let bytes = self.client.download(handle).await?;
        debug!(
            "Downloaded {} bytes for media {} ({})",
            bytes.len(),
            handle.id,
            handle.mime_type.as_deref().unwrap_or("unknown type")
        );
        self.media.save(kind, &bytes).await
    }
}
