//! Duplex transport to the analysis service
//!
//! [`TransportClient`] owns the connection state machine and reconnection;
//! the network itself sits behind the [`Connector`] / [`DuplexChannel`] seam,
//! implemented for WebSockets by [`WebSocketConnector`].

pub mod channel;
pub mod client;
pub mod state;
pub mod websocket;

pub use channel::{ConnectRequest, Connector, DuplexChannel, WireMessage};
pub use client::{TransportClient, TransportOptions};
pub use state::{ConnectionState, RetryPolicy};
pub use websocket::WebSocketConnector;
