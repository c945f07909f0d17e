//! Transport boundary for lookup requests, plus a reqwest-backed implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{LocatorError, LocatorResult};

pub const DEFAULT_ENDPOINT: &str = "http://api.lbs.yandex.net/geolocation";

/// A completed HTTP exchange with a success status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection, DNS, TLS or body read failure.
    Network,
    /// The server answered with a non-success status.
    Status(u16),
    /// The call was cancelled before it completed.
    Cancelled,
}

/// A transport-level failure. The body is kept for error classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
    pub body: Vec<u8>,
}

impl TransportFailure {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            message: message.into(),
            body: Vec::new(),
        }
    }

    pub fn status(status: u16, body: Vec<u8>) -> Self {
        Self {
            kind: FailureKind::Status(status),
            message: format!("server replied with HTTP {status}"),
            body,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "operation canceled".to_string(),
            body: Vec::new(),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportFailure {}

/// Carries a serialized lookup request to the service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, body: Vec<u8>) -> Result<TransportReply, TransportFailure>;
}

/// HTTP transport posting JSON to the lookup endpoint.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport for `endpoint`. `timeout` is a hard ceiling; the
    /// request lifecycle enforces its own, shorter deadline.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> LocatorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lbs-locator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LocatorError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, body: Vec<u8>) -> Result<TransportReply, TransportFailure> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportFailure::network(e.to_string()))?;

        let status = resp.status().as_u16();
        let success = resp.status().is_success();
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportFailure::network(e.to_string()))?
            .to_vec();

        if success {
            Ok(TransportReply { status, body })
        } else {
            Err(TransportFailure::status(status, body))
        }
    }
}
