//! Media buffers and the pure conversions between them

pub mod convert;
pub mod types;

pub use convert::{YuvPicture, to_i420};
pub use types::{
    AudioFormat, EncodedAudioChunk, EncodedVideoUnit, PixelFormat, RawAudioBlock,
    RawVideoFrame, SampleFormat,
};
