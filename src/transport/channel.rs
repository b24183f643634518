//! Duplex channel seam between the transport client and the network

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// A single message on the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl WireMessage {
    /// Payload as bytes; text is delivered as its UTF-8 encoding.
    pub fn into_bytes(self) -> Bytes {
        match self {
            WireMessage::Text(text) => Bytes::from(text),
            WireMessage::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where to connect and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>`
    pub token: Option<String>,
}

impl ConnectRequest {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }
}

/// An open bidirectional message channel.
///
/// `send` and `recv` may be called concurrently from different tasks.
#[async_trait]
pub trait DuplexChannel: Send + Sync {
    async fn send(&self, message: WireMessage) -> Result<()>;

    /// Wait for the next data message. Any error is terminal for the channel.
    async fn recv(&self) -> Result<WireMessage>;

    /// Close with "going away" and the given reason.
    async fn close(&self, reason: &str) -> Result<()>;
}

/// Opens duplex channels.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, request: &ConnectRequest) -> Result<Arc<dyn DuplexChannel>>;
}
