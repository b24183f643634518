//! Wire protocol spoken with the analysis service
//!
//! Outbound media travels as JSON [`Envelope`]s, one per encoded unit or
//! chunk. Inbound messages are [`ResultMessage`]s folded into an
//! [`EmotionSnapshot`].

pub mod envelope;
pub mod result;

pub use envelope::{Envelope, EnvelopeEncoding};
pub use result::{EmotionSnapshot, ResultMessage, dominant_emotion};
