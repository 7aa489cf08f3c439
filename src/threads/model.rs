//! Message thread data model.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConversationError;

/// Sender tag marking a system/outbound message.
pub const SYSTEM_SENDER: &str = "1";

/// Kind of message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    Document,
    Link,
    Contact,
    Location,
    Sticker,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
            Self::Link => "link",
            Self::Contact => "contact",
            Self::Location => "location",
            Self::Sticker => "sticker",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            "link" => Ok(Self::Link),
            "contact" => Ok(Self::Contact),
            "location" => Ok(Self::Location),
            "sticker" => Ok(Self::Sticker),
            _ => Err(format!("Unknown message type: {}", s)),
        }
    }
}

/// Optional media attachment details. Stored as one JSON column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_thumbnail_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl MediaMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A stored thread entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub external_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// `"1"` for system/outbound messages, otherwise the sender (usually the
    /// contact id).
    pub sender_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaMetadata>,
}

impl Message {
    pub fn is_outbound(&self) -> bool {
        self.sender_tag == SYSTEM_SENDER
    }
}

/// A message to append. Missing fields are filled in at append time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub sender_tag: String,
    #[serde(default)]
    pub media: Option<MediaMetadata>,
}

impl NewMessage {
    /// Plain text message from `sender_tag`.
    pub fn text(text: impl Into<String>, sender_tag: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender_tag: sender_tag.into(),
            ..Self::default()
        }
    }

    /// Outbound text message recorded by the system.
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(text, SYSTEM_SENDER)
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Reject a text message without text.
    pub fn validate(&self) -> Result<(), ConversationError> {
        if self.message_type == MessageType::Text && self.text.trim().is_empty() {
            return Err(ConversationError::Validation(
                "text is required for text messages".into(),
            ));
        }
        Ok(())
    }

    /// Resolve defaults into a storable message.
    ///
    /// Timestamps are truncated to millisecond precision, the resolution the
    /// store orders by. A missing external id becomes a system token.
    pub fn into_message(self, now: DateTime<Utc>) -> Message {
        let timestamp = truncate_to_millis(self.timestamp.unwrap_or(now));
        let external_id = self
            .external_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| system_external_id(now));
        Message {
            id: Uuid::new_v4(),
            external_id,
            text: self.text,
            timestamp,
            message_type: self.message_type,
            sender_tag: self.sender_tag,
            media: self.media.filter(|m| !m.is_empty()),
        }
    }
}

/// Generate a `system_<millis>_<random>` external id.
pub fn system_external_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("system_{}_{}", now.timestamp_millis(), suffix)
}

pub(crate) fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Order a thread by timestamp, keeping insertion order among equal
/// timestamps.
pub fn sort_thread(messages: &mut [Message]) {
    // sort_by_key is stable
    messages.sort_by_key(|m| m.timestamp);
}

/// How the owning contact's last-message cache fared during an append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CacheStatus {
    /// Cache now reflects the appended message.
    Updated,
    /// An older message was appended; the cache already points at a newer one.
    Unchanged,
    /// The message was stored but the cache write failed.
    Degraded { reason: String },
}

/// Result of a successful append.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendedMessage {
    pub message: Message,
    pub cache: CacheStatus,
}

impl AppendedMessage {
    pub fn is_degraded(&self) -> bool {
        matches!(self.cache, CacheStatus::Degraded { .. })
    }
}
