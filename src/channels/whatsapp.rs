//! WhatsApp Cloud API text transport.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::channels::{MessageTransport, SendReceipt, error_body, extract_id};
use crate::contacts::model::Channel;
use crate::error::TransportError;

const SERVICE: &str = "whatsapp";

/// Sends text messages through a WhatsApp Business phone number.
pub struct WhatsAppTransport {
    client: reqwest::Client,
    base_url: String,
    phone_number_id: String,
    access_token: SecretString,
}

impl WhatsAppTransport {
    pub fn new(
        base_url: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: SecretString,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::RequestFailed {
                service: SERVICE.into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.into(),
            access_token,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.base_url, self.phone_number_id)
    }
}

#[async_trait]
impl MessageTransport for WhatsAppTransport {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send(&self, channel_handle: &str, text: &str) -> Result<SendReceipt, TransportError> {
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": channel_handle,
            "type": "text",
            "text": { "body": text },
        });

        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed {
                service: SERVICE.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = error_body(resp).await;
            warn!(status = %status, "WhatsApp send rejected");
            return Err(TransportError::Rejected {
                service: SERVICE.into(),
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value =
            resp.json().await.map_err(|e| TransportError::InvalidResponse {
                service: SERVICE.into(),
                reason: e.to_string(),
            })?;
        let external_id = extract_id(SERVICE, &json, "/messages/0/id")?;
        debug!(external_id = %external_id, "WhatsApp message sent");
        Ok(SendReceipt { external_id })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn transport(base: &str) -> WhatsAppTransport {
        WhatsAppTransport::new(base, "1234", SecretString::from("wa-token")).unwrap()
    }

    #[tokio::test]
    async fn send_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1234/messages"))
            .and(header("authorization", "Bearer wa-token"))
            .and(body_partial_json(serde_json::json!({
                "to": "+15550100",
                "text": { "body": "hello" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messaging_product": "whatsapp",
                "messages": [{ "id": "wamid.ABC" }]
            })))
            .mount(&server)
            .await;

        let receipt = transport(&server.uri())
            .send("+15550100", "hello")
            .await
            .unwrap();
        assert_eq!(receipt.external_id, "wamid.ABC");
    }

    #[tokio::test]
    async fn provider_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let err = transport(&server.uri())
            .send("+1", "hi")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Rejected { status: 401, ref body, .. } if body == "bad token"
        ));
    }

    #[tokio::test]
    async fn response_without_id_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = transport(&server.uri())
            .send("+1", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse { .. }));
    }
}
