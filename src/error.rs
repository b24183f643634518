//! Error taxonomy shared by the encoders, the transport and the coordinator.
//!
//! Only `Configuration` is fatal, and only to the component that raised it.
//! Every other variant describes a single dropped unit, chunk or message, or a
//! transport event that is reported through callbacks.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An encoder or format converter cannot be built for the requested formats.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single frame or block failed to encode and was dropped.
    #[error("encode error: {0}")]
    Encode(String),

    /// Opening the duplex channel failed.
    #[error("connect failed: {0}")]
    TransportConnect(String),

    /// The receive loop hit a terminal failure.
    #[error("receive failed: {0}")]
    TransportReceive(String),

    /// A best-effort send failed.
    #[error("send failed: {0}")]
    Send(String),

    /// An inbound message does not match the expected schema.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedMessage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
