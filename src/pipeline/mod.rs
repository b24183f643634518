//! Streaming pipeline
//!
//! - `coordinator`: wires sources, encoders and the transport together
//! - `health`: counters and the periodic health report
//! - `state`: coordinator lifecycle

pub mod coordinator;
pub mod health;
pub mod state;

pub use coordinator::{ResultCallback, StreamCoordinator};
pub use health::{HealthSummary, PipelineHealth};
pub use state::PipelineState;
