//! Instagram Graph API: direct-message transport and content publisher.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::{ContentPublisher, MessageTransport, SendReceipt, error_body, extract_id};
use crate::contacts::model::Channel;
use crate::error::TransportError;

const SERVICE: &str = "instagram";

/// Shared Graph API client for one Instagram business account.
#[derive(Clone)]
struct GraphClient {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    access_token: SecretString,
}

impl GraphClient {
    fn new(
        base_url: String,
        account_id: String,
        access_token: SecretString,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| TransportError::RequestFailed {
                service: SERVICE.into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id,
            access_token,
        })
    }

    fn url(&self, edge: &str) -> String {
        format!("{}/{}/{edge}", self.base_url, self.account_id)
    }

    /// POST a JSON body to an account edge and return the parsed response.
    async fn post(
        &self,
        edge: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let resp = self
            .client
            .post(self.url(edge))
            .bearer_auth(self.access_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed {
                service: SERVICE.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = error_body(resp).await;
            warn!(status = %status, edge, "Instagram request rejected");
            return Err(TransportError::Rejected {
                service: SERVICE.into(),
                status: status.as_u16(),
                body,
            });
        }

        resp.json().await.map_err(|e| TransportError::InvalidResponse {
            service: SERVICE.into(),
            reason: e.to_string(),
        })
    }
}

/// Sends direct messages to Instagram users.
pub struct InstagramTransport {
    graph: GraphClient,
}

impl InstagramTransport {
    pub fn new(
        base_url: impl Into<String>,
        account_id: impl Into<String>,
        access_token: SecretString,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            graph: GraphClient::new(base_url.into(), account_id.into(), access_token)?,
        })
    }
}

#[async_trait]
impl MessageTransport for InstagramTransport {
    fn channel(&self) -> Channel {
        Channel::Instagram
    }

    async fn send(&self, channel_handle: &str, text: &str) -> Result<SendReceipt, TransportError> {
        let body = serde_json::json!({
            "recipient": { "id": channel_handle },
            "message": { "text": text },
        });
        let json = self.graph.post("messages", &body).await?;
        let external_id = extract_id(SERVICE, &json, "/message_id")?;
        debug!(external_id = %external_id, "Instagram message sent");
        Ok(SendReceipt { external_id })
    }
}

/// Publishes scheduled images to the account feed.
///
/// Publishing is two calls: create a media container, then publish it.
pub struct InstagramPublisher {
    graph: GraphClient,
}

impl InstagramPublisher {
    pub fn new(
        base_url: impl Into<String>,
        account_id: impl Into<String>,
        access_token: SecretString,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            graph: GraphClient::new(base_url.into(), account_id.into(), access_token)?,
        })
    }
}

#[async_trait]
impl ContentPublisher for InstagramPublisher {
    async fn publish(&self, media_ref: &str, caption: &str) -> Result<SendReceipt, TransportError> {
        let container = self
            .graph
            .post(
                "media",
                &serde_json::json!({ "image_url": media_ref, "caption": caption }),
            )
            .await?;
        let creation_id = extract_id(SERVICE, &container, "/id")?;

        let published = self
            .graph
            .post(
                "media_publish",
                &serde_json::json!({ "creation_id": creation_id }),
            )
            .await?;
        let external_id = extract_id(SERVICE, &published, "/id")?;
        info!(external_id = %external_id, "Instagram content published");
        Ok(SendReceipt { external_id })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn token() -> SecretString {
        SecretString::from("ig-token")
    }

    #[tokio::test]
    async fn send_direct_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/99/messages"))
            .and(body_partial_json(serde_json::json!({
                "recipient": { "id": "user.handle" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "recipient_id": "user.handle",
                "message_id": "mid.1"
            })))
            .mount(&server)
            .await;

        let transport = InstagramTransport::new(server.uri(), "99", token()).unwrap();
        let receipt = transport.send("user.handle", "hello").await.unwrap();
        assert_eq!(receipt.external_id, "mid.1");
        assert_eq!(transport.channel(), Channel::Instagram);
    }

    #[tokio::test]
    async fn publish_creates_then_publishes_container() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/99/media"))
            .and(body_partial_json(serde_json::json!({
                "image_url": "https://cdn.example/p.jpg",
                "caption": "launch day"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "container-7" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/99/media_publish"))
            .and(body_partial_json(serde_json::json!({ "creation_id": "container-7" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "post-42" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let publisher = InstagramPublisher::new(server.uri(), "99", token()).unwrap();
        let receipt = publisher
            .publish("https://cdn.example/p.jpg", "launch day")
            .await
            .unwrap();
        assert_eq!(receipt.external_id, "post-42");
    }

    #[tokio::test]
    async fn container_failure_stops_publish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/99/media"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad image"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/99/media_publish"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let publisher = InstagramPublisher::new(server.uri(), "99", token()).unwrap();
        let err = publisher.publish("x", "y").await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { status: 400, .. }));
    }
}
