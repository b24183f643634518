//! Traits for capture sources

use crate::media::{RawAudioBlock, RawVideoFrame};
use std::sync::Arc;

/// Receives each captured frame; the frame is only valid for the call.
pub type FrameCallback = Arc<dyn Fn(&RawVideoFrame<'_>) + Send + Sync>;

/// Receives each captured audio block; the block is only valid for the call.
pub type BlockCallback = Arc<dyn Fn(&RawAudioBlock<'_>) + Send + Sync>;

/// A producer of raw video frames
pub trait VideoSource: Send {
    /// Frame geometry and rate the source delivers: (width, height, fps)
    fn format(&self) -> (u32, u32, u32);

    fn set_on_frame(&mut self, callback: FrameCallback);

    fn start(&mut self) -> anyhow::Result<()>;

    /// Stop delivering; no callback runs after this returns.
    fn stop(&mut self);
}

/// A producer of raw PCM blocks
pub trait AudioSource: Send {
    fn set_on_block(&mut self, callback: BlockCallback);

    fn start(&mut self) -> anyhow::Result<()>;

    /// Stop delivering; no callback runs after this returns.
    fn stop(&mut self);
}
