//! Video and audio encoders
//!
//! - `video`: asynchronous H.264 session over a [`VideoCodec`] backend
//! - `audio`: synchronous PCM to ADTS-framed chunk encoder

pub mod adts;
pub mod audio;
pub mod bitstream;
pub mod codec;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod pcm_h264;
pub mod resample;
pub mod video;

pub use adts::{AdtsHeader, split_chunks};
pub use audio::AudioEncoder;
pub use codec::{CodecPacket, CodecSettings, VideoBackend, VideoCodec, open_codec};
pub use resample::FormatConverter;
pub use video::{CodecFactory, DroppedCallback, EncodedCallback, VideoEncoder};
