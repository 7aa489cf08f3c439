//! Event types carried by the bus to live dashboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a bus event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    /// An inbound message was appended to a thread.
    NewMessage,
    /// A system/outbound message was recorded or content was published.
    MessageSent,
    /// A contact record changed.
    ContactUpdated,
    /// The external AI responder produced a reply that was sent.
    AiResponse,
    /// A scheduler wake finished processing items.
    JobCompleted,
    /// Periodic keep-alive emitted by the bus itself.
    Heartbeat,
    /// First event every new listener receives.
    Connected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "newMessage",
            Self::MessageSent => "messageSent",
            Self::ContactUpdated => "contactUpdated",
            Self::AiResponse => "aiResponse",
            Self::JobCompleted => "jobCompleted",
            Self::Heartbeat => "heartbeat",
            Self::Connected => "connected",
        }
    }

    /// Bus-internal kinds that consumers filter out before acting.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Heartbeat | Self::Connected)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transient notification published on the bus. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_handle: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            contact_id: None,
            channel_handle: None,
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn connected() -> Self {
        Self::new(EventType::Connected)
    }

    pub fn heartbeat() -> Self {
        Self::new(EventType::Heartbeat)
    }

    /// Scope the event to a contact.
    pub fn for_contact(mut self, contact_id: Uuid, channel_handle: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id);
        self.channel_handle = Some(channel_handle.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
