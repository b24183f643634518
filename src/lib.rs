//! Streams live camera and microphone data to a remote emotion analysis
//! service over a WebSocket and relays its results back.
//!
//! The pieces, leaves first:
//! - [`encoder`]: raw frames to H.264 units, raw PCM to ADTS-framed chunks
//! - [`protocol`]: JSON envelopes out, result messages in
//! - [`transport`]: duplex connection with reconnection
//! - [`pipeline`]: the [`StreamCoordinator`](pipeline::StreamCoordinator) tying them together

pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};
