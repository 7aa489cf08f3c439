//! External collaborators: outbound message transports, the content
//! publisher, and the subscription renewer.
//!
//! The core talks to providers only through these traits. HTTP
//! implementations live in the submodules; tests inject doubles.

pub mod instagram;
pub mod renewal;
pub mod whatsapp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contacts::model::Channel;
use crate::error::TransportError;

pub use instagram::{InstagramPublisher, InstagramTransport};
pub use renewal::HttpSubscriptionRenewer;
pub use whatsapp::WhatsAppTransport;

/// Provider acknowledgement of a sent or published item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub external_id: String,
}

/// Sends text to a contact on one channel.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, channel_handle: &str, text: &str) -> Result<SendReceipt, TransportError>;
}

/// Publishes scheduled content (media plus caption).
#[async_trait]
pub trait ContentPublisher: Send + Sync {
    async fn publish(&self, media_ref: &str, caption: &str) -> Result<SendReceipt, TransportError>;
}

/// Renews an external subscription. `Ok(false)` means the provider declined.
#[async_trait]
pub trait SubscriptionRenewer: Send + Sync {
    async fn renew(&self, owner_id: &str) -> Result<bool, TransportError>;
}

/// Outbound transports keyed by channel.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<Channel, Arc<dyn MessageTransport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transport` under its own channel, replacing any previous one.
    pub fn register(&mut self, transport: Arc<dyn MessageTransport>) {
        self.transports.insert(transport.channel(), transport);
    }

    pub fn with(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.register(transport);
        self
    }

    pub fn get(&self, channel: Channel) -> Result<Arc<dyn MessageTransport>, TransportError> {
        self.transports
            .get(&channel)
            .cloned()
            .ok_or_else(|| TransportError::NotConfigured {
                channel: channel.to_string(),
            })
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.transports.keys().copied().collect();
        channels.sort();
        channels
    }
}

/// Read a provider error body without failing the caller.
pub(crate) async fn error_body(resp: reqwest::Response) -> String {
    resp.text().await.unwrap_or_default()
}

/// Pull a string `id` field out of a provider response.
pub(crate) fn extract_id(
    service: &str,
    body: &serde_json::Value,
    pointer: &str,
) -> Result<String, TransportError> {
    body.pointer(pointer)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| TransportError::InvalidResponse {
            service: service.to_string(),
            reason: format!("missing {pointer} in response"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Channel);

    #[async_trait]
    impl MessageTransport for Fixed {
        fn channel(&self) -> Channel {
            self.0
        }
        async fn send(&self, _: &str, _: &str) -> Result<SendReceipt, TransportError> {
            Ok(SendReceipt {
                external_id: "x".into(),
            })
        }
    }

    #[test]
    fn registry_lookup() {
        let registry = TransportRegistry::new().with(Arc::new(Fixed(Channel::Whatsapp)));
        assert!(registry.get(Channel::Whatsapp).is_ok());
        assert!(matches!(
            registry.get(Channel::Instagram),
            Err(TransportError::NotConfigured { ref channel }) if channel == "instagram"
        ));
        assert_eq!(registry.channels(), vec![Channel::Whatsapp]);
    }

    #[test]
    fn extract_id_reports_missing_field() {
        let body = serde_json::json!({"messages": [{"id": "wamid.1"}]});
        assert_eq!(extract_id("wa", &body, "/messages/0/id").unwrap(), "wamid.1");
        assert!(matches!(
            extract_id("wa", &body, "/id"),
            Err(TransportError::InvalidResponse { .. })
        ));
    }
}
