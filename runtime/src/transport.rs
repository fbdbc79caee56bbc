//! HTTPS delivery of reply documents.
//!
//! The orchestrator hands every request a pre-signed callback URL. The reply document is
//! PUT there exactly once with an exact `Content-Length` and an empty `Content-Type`;
//! pre-signed URLs are signed without a content type, so sending one breaks the
//! signature.

use crate::config::TransportConfig;
use cfn_resource_core::environment::{ResponseTransport, TransportError};
use cfn_resource_core::reply::ReplyDocument;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Url};
use std::future::Future;
use std::pin::Pin;

/// [`ResponseTransport`] backed by `reqwest`.
///
/// Certificate validation is skipped only for hosts listed in
/// [`TransportConfig::insecure_hosts`]; every other host gets a strict client.
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    strict: Client,
    lenient: Client,
    insecure_hosts: Vec<String>,
}

impl HttpsTransport {
    /// Build both clients from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] when the TLS backend cannot be initialised.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let build = |accept_invalid_certs: bool| {
            Client::builder()
                .timeout(config.timeout)
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
                .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))
        };

        Ok(Self {
            strict: build(false)?,
            lenient: build(true)?,
            insecure_hosts: config.insecure_hosts.clone(),
        })
    }

    fn client_for(&self, url: &Url) -> &Client {
        match url.host_str() {
            Some(host) if self.insecure_hosts.iter().any(|insecure| insecure == host) => {
                &self.lenient
            }
            _ => &self.strict,
        }
    }

    async fn put(&self, url: &str, reply: &ReplyDocument) -> Result<u16, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        let body = serde_json::to_vec(reply)?;

        let response = self
            .client_for(&url)
            .put(url.clone())
            .header(CONTENT_TYPE, "")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        tracing::info!(status, "STATUS");
        tracing::info!(headers = ?response.headers(), "HEADERS");

        // Drain the body so the connection is released cleanly.
        if let Err(error) = response.bytes().await {
            tracing::debug!(%error, "Failed to read reply response body");
        }

        Ok(status)
    }
}

impl ResponseTransport for HttpsTransport {
    fn send<'a>(
        &'a self,
        url: &'a str,
        reply: &'a ReplyDocument,
    ) -> Pin<Box<dyn Future<Output = Result<u16, TransportError>> + Send + 'a>> {
        Box::pin(self.put(url, reply))
    }
}
