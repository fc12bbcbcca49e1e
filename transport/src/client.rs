//! HTTP client for the request/response endpoint of remote nodes.

use agentmesh_messages::Envelope;
use reqwest::StatusCode;
use std::time::Duration;

use crate::TransportError;

/// Default timeout for one envelope exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts envelopes to `POST http://{addr}/envelope`.
#[derive(Clone)]
pub struct EnvelopeClient {
    /// HTTP client (reusable connection pool).
    http_client: reqwest::Client,
    timeout: Duration,
}

impl EnvelopeClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            timeout,
        }
    }

    /// Deliver `envelope` and return the peer's reply, if it sent one.
    ///
    /// `204 No Content` means the peer accepted the envelope without a reply.
    pub async fn post(
        &self,
        addr: &str,
        envelope: &Envelope,
    ) -> Result<Option<Envelope>, TransportError> {
        let url = format!("http://{addr}/envelope");
        let response = self
            .http_client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| self.classify(addr, e))?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await.map_err(|e| self.classify(addr, e))?;
                Ok(Some(Envelope::from_slice(&body)?))
            }
            status => Err(TransportError::Status {
                addr: addr.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    /// `GET /health`. `true` only for a 200 answer.
    pub async fn health(&self, addr: &str) -> Result<bool, TransportError> {
        let response = self
            .http_client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .map_err(|e| self.classify(addr, e))?;
        Ok(response.status() == StatusCode::OK)
    }

    fn classify(&self, addr: &str, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                addr: addr.to_string(),
                after: self.timeout,
            }
        } else if e.is_connect() {
            TransportError::Unreachable(addr.to_string())
        } else {
            TransportError::Request {
                addr: addr.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl Default for EnvelopeClient {
    fn default() -> Self {
        Self::new()
    }
}
