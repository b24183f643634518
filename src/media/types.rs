//! Raw and encoded media types exchanged between capture, encoders and transport

use bytes::Bytes;
use std::time::Duration;

/// Pixel layout of a raw frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit B, G, R, A (camera default)
    Bgra,
    /// Packed 8-bit R, G, B, A
    Rgba,
    /// Y plane followed by interleaved UV plane, 4:2:0
    Nv12,
    /// Y, U and V planes, 4:2:0
    I420,
}

impl PixelFormat {
    /// Number of bytes a tightly packed `width x height` frame occupies.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Bgra | PixelFormat::Rgba => w * h * 4,
            PixelFormat::Nv12 | PixelFormat::I420 => {
                let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
                w * h + 2 * cw * ch
            }
        }
    }
}

/// A raw frame as delivered by the capture collaborator.
///
/// The buffer is borrowed for the duration of one `encode` call.
pub struct RawVideoFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
    /// Monotonic frame index assigned by the producer
    pub timestamp: u64,
}

impl<'a> RawVideoFrame<'a> {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: &'a [u8], timestamp: u64) -> Self {
        Self {
            width,
            height,
            format,
            data,
            timestamp,
        }
    }
}

impl std::fmt::Debug for RawVideoFrame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawVideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("size", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// One compressed video unit (an Annex B access unit).
#[derive(Clone)]
pub struct EncodedVideoUnit {
    pub data: Bytes,
    pub is_keyframe: bool,
    /// Presentation index assigned by the encoder, starting at 0
    pub pts: u64,
    pub duration: Duration,
}

impl EncodedVideoUnit {
    /// Get the size of the unit in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for EncodedVideoUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedVideoUnit")
            .field("pts", &self.pts)
            .field("is_keyframe", &self.is_keyframe)
            .field("size", &self.size())
            .finish()
    }
}

/// Sample representation of a PCM buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// 32-bit float, nominal range -1.0..=1.0
    F32,
    /// Signed 16-bit little endian
    I16,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::I16 => 2,
        }
    }
}

/// Fixed description of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// 16 kHz mono float, the format the analysis service expects
    pub fn speech() -> Self {
        Self::new(16_000, 1, SampleFormat::F32)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::speech()
    }
}

/// A block of interleaved float samples as delivered by the capture collaborator.
///
/// Borrowed for the duration of one `encode` call.
pub struct RawAudioBlock<'a> {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: &'a [f32],
}

impl<'a> RawAudioBlock<'a> {
    pub fn new(sample_rate: u32, channels: u16, samples: &'a [f32]) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// Number of frames (samples per channel) in the block
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }
}

impl std::fmt::Debug for RawAudioBlock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawAudioBlock")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("frames", &self.frame_count())
            .finish()
    }
}

/// A self-framed audio chunk: 7-byte header followed by the payload.
#[derive(Clone)]
pub struct EncodedAudioChunk {
    pub data: Bytes,
}

impl EncodedAudioChunk {
    /// Header length in bytes
    pub const HEADER_LEN: usize = 7;

    pub fn header(&self) -> &[u8] {
        &self.data[..Self::HEADER_LEN]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[Self::HEADER_LEN..]
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for EncodedAudioChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedAudioChunk")
            .field("size", &self.size())
            .finish()
    }
}
