//! HTTP subscription renewer.
//!
//! POSTs `{"ownerId": ...}` to a configured endpoint. A 2xx answer means
//! renewed; any other status means the provider declined.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::channels::{SubscriptionRenewer, error_body};
use crate::error::TransportError;

const SERVICE: &str = "subscription-renewal";

pub struct HttpSubscriptionRenewer {
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
}

impl HttpSubscriptionRenewer {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<SecretString>,
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
            endpoint: endpoint.into(),
            token,
        })
    }
}

#[async_trait]
impl SubscriptionRenewer for HttpSubscriptionRenewer {
    async fn renew(&self, owner_id: &str) -> Result<bool, TransportError> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "ownerId": owner_id }));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }

        let resp = req.send().await.map_err(|e| TransportError::RequestFailed {
            service: SERVICE.into(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            debug!(owner_id, "Subscription renewed");
            return Ok(true);
        }
        let body = error_body(resp).await;
        warn!(owner_id, status = %status, body = %body, "Subscription renewal declined");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn success_status_means_renewed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/renew"))
            .and(header("authorization", "Bearer r-token"))
            .and(body_json(serde_json::json!({ "ownerId": "acct-1" })))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let renewer = HttpSubscriptionRenewer::new(
            format!("{}/renew", server.uri()),
            Some(SecretString::from("r-token")),
        )
        .unwrap();
        assert!(renewer.renew("acct-1").await.unwrap());
    }

    #[tokio::test]
    async fn error_status_means_declined() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let renewer = HttpSubscriptionRenewer::new(server.uri(), None).unwrap();
        assert!(!renewer.renew("acct-1").await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_error() {
        // Port 9 (discard) on localhost is not listening in test environments.
        let renewer = HttpSubscriptionRenewer::new("http://127.0.0.1:9/renew", None).unwrap();
        let err = renewer.renew("acct-1").await.unwrap_err();
        assert!(matches!(err, TransportError::RequestFailed { .. }));
    }
}
