//! Codec backend seam for the video encoder session

use crate::error::Result;
use crate::media::YuvPicture;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Parameters a codec is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    /// Maximum distance between two keyframes, in frames
    pub keyframe_interval: u32,
}

impl CodecSettings {
    pub fn new(width: u32, height: u32, fps: u32, bitrate: u32) -> Self {
        Self {
            width,
            height,
            fps,
            bitrate,
            keyframe_interval: fps.saturating_mul(2).max(1),
        }
    }
}

/// One compressed access unit as produced by a backend.
#[derive(Debug, Clone)]
pub struct CodecPacket {
    pub data: Bytes,
    pub is_keyframe: bool,
    pub pts: u64,
}

/// A compression session. Fed in presentation order from a single thread.
pub trait VideoCodec: Send {
    fn name(&self) -> &str;

    /// Compress one picture. May return zero packets if the backend buffers.
    fn encode(
        &mut self,
        picture: &YuvPicture,
        pts: u64,
        force_keyframe: bool,
    ) -> Result<Vec<CodecPacket>>;

    /// Drain every buffered packet.
    fn flush(&mut self) -> Result<Vec<CodecPacket>>;
}

/// Selects which codec implementation backs a video session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoBackend {
    /// Built-in H.264 writer, always available
    #[default]
    Software,
    /// System FFmpeg (hardware encoders first), requires the `ffmpeg` feature
    Ffmpeg,
}

/// Open a codec for the given backend and settings.
pub fn open_codec(backend: VideoBackend, settings: CodecSettings) -> Result<Box<dyn VideoCodec>> {
    match backend {
        VideoBackend::Software => Ok(Box::new(super::pcm_h264::PcmH264Codec::new(settings)?)),
        #[cfg(feature = "ffmpeg")]
        VideoBackend::Ffmpeg => Ok(Box::new(super::ffmpeg::FfmpegCodec::new(settings)?)),
        #[cfg(not(feature = "ffmpeg"))]
        VideoBackend::Ffmpeg => Err(crate::error::Error::Configuration(
            "ffmpeg backend requested but the `ffmpeg` feature is disabled".into(),
        )),
    }
}
