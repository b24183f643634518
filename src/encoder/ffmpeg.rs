//! FFmpeg-backed H.264 codec (cargo feature `ffmpeg`).

use crate::encoder::bitstream::{contains_nal_type, nal};
use crate::encoder::codec::{CodecPacket, CodecSettings, VideoCodec};
use crate::error::{Error, Result};
use crate::media::YuvPicture;
use ac_ffmpeg::codec::video::frame::{PictureType, get_pixel_format};
use ac_ffmpeg::codec::video::{PixelFormat, VideoEncoder, VideoFrame, VideoFrameMut};
use ac_ffmpeg::codec::Encoder;
use ac_ffmpeg::time::{TimeBase, Timestamp};
use bytes::Bytes;
use std::collections::VecDeque;

/// Encoder fallback chain: hardware encoders first, then libx264.
/// Bitrate and GOP length are appended from the session settings.
const ENCODER_CHAIN: &[(&str, &[(&str, &str)])] = &[
    (
        "h264_nvenc",
        &[
            ("preset", "p2"),
            ("tune", "ll"),
            ("zerolatency", "1"),
            ("rc", "vbr"),
            ("delay", "0"),
            ("forced-idr", "1"),
        ],
    ),
    ("h264_qsv", &[("preset", "fast"), ("low_power", "0")]),
    (
        "h264_amf",
        &[("usage", "lowlatency"), ("quality", "balanced")],
    ),
    (
        "libx264",
        &[
            ("profile", "baseline"),
            ("preset", "veryfast"),
            ("tune", "zerolatency"),
            ("forced-idr", "1"),
            ("bframes", "0"),
        ],
    ),
];

/// Spare input frames kept around for reuse
const POOL_SIZE: usize = 4;

pub struct FfmpegCodec {
    encoder: VideoEncoder,
    codec_name: String,
    settings: CodecSettings,
    width: usize,
    height: usize,
    time_base: TimeBase,
    pixel_format: PixelFormat,
    free_frames: VecDeque<VideoFrame>,
    /// Presentation indices of frames pushed but not yet returned
    pending_pts: VecDeque<u64>,
    /// Set after `flush`; the encoder is reopened before the next frame
    drained: bool,
}

// SAFETY: the codec is only ever driven from the encoder worker thread.
unsafe impl Send for FfmpegCodec {}

impl FfmpegCodec {
    pub fn new(settings: CodecSettings) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 || settings.fps == 0 {
            return Err(Error::Configuration(format!(
                "invalid video settings {}x{} @ {} fps",
                settings.width, settings.height, settings.fps
            )));
        }
        let width = settings.width.next_multiple_of(2) as usize;
        let height = settings.height.next_multiple_of(2) as usize;
        let time_base = TimeBase::new(1, settings.fps as i32);
        let pixel_format = get_pixel_format("yuv420p");

        let (encoder, codec_name) =
            Self::open_encoder(&settings, width, height, time_base, pixel_format)?;
        log::info!("FfmpegCodec: using {}", codec_name);

        Ok(Self {
            encoder,
            codec_name,
            settings,
            width,
            height,
            time_base,
            pixel_format,
            free_frames: VecDeque::with_capacity(POOL_SIZE),
            pending_pts: VecDeque::new(),
            drained: false,
        })
    }

    fn open_encoder(
        settings: &CodecSettings,
        width: usize,
        height: usize,
        time_base: TimeBase,
        pixel_format: PixelFormat,
    ) -> Result<(VideoEncoder, String)> {
        let bitrate = settings.bitrate.to_string();
        let maxrate = (settings.bitrate as u64 * 3 / 2).to_string();
        let gop = settings.keyframe_interval.to_string();

        for (codec, options) in ENCODER_CHAIN {
            let mut builder = match VideoEncoder::builder(codec) {
                Ok(b) => b,
                Err(e) => {
                    log::debug!("FfmpegCodec: {} not available: {}", codec, e);
                    continue;
                }
            };
            builder = builder
                .pixel_format(pixel_format)
                .width(width)
                .height(height)
                .time_base(time_base)
                .set_option("b", &bitrate)
                .set_option("maxrate", &maxrate)
                .set_option("g", &gop);
            for (k, v) in *options {
                builder = builder.set_option(k, v);
            }
            match builder.build() {
                Ok(encoder) => return Ok((encoder, codec.to_string())),
                Err(e) => log::debug!("FfmpegCodec: {} failed to initialize: {}", codec, e),
            }
        }
        Err(Error::Configuration(format!(
            "no H.264 encoder accepts {}x{}",
            width, height
        )))
    }

    fn take_frame(&mut self) -> VideoFrameMut {
        for _ in 0..self.free_frames.len() {
            let Some(frame) = self.free_frames.pop_front() else {
                break;
            };
            match frame.try_into_mut() {
                Ok(frame) => return frame,
                Err(frame) => self.free_frames.push_back(frame),
            }
        }
        VideoFrameMut::black(self.pixel_format, self.width, self.height)
            .with_time_base(self.time_base)
    }

    fn recycle_frame(&mut self, frame: VideoFrame) {
        if self.free_frames.len() < POOL_SIZE {
            self.free_frames.push_back(frame);
        }
    }

    fn write_planes(&self, frame: &mut VideoFrameMut, picture: &YuvPicture) {
        let mut planes = frame.planes_mut();
        let (cw, ch) = (self.width / 2, self.height / 2);
        let dims = [(self.width, self.height), (cw, ch), (cw, ch)];

        for (index, (plane_w, plane_h)) in dims.into_iter().enumerate() {
            let dst = planes[index].data_mut();
            let line_size = dst.len() / plane_h;
            for row in 0..plane_h {
                let line = &mut dst[row * line_size..row * line_size + plane_w];
                for (col, sample) in line.iter_mut().enumerate() {
                    *sample = match index {
                        0 => picture.luma_at(col, row),
                        1 => picture.chroma_at(col, row).0,
                        _ => picture.chroma_at(col, row).1,
                    };
                }
            }
        }
    }

    fn drain(&mut self) -> Result<Vec<CodecPacket>> {
        let mut packets = Vec::new();
        while let Some(packet) = self
            .encoder
            .take()
            .map_err(|e| Error::Encode(e.to_string()))?
        {
            let data = Bytes::copy_from_slice(packet.data());
            let pts = self.pending_pts.pop_front().unwrap_or_default();
            packets.push(CodecPacket {
                is_keyframe: contains_nal_type(&data, nal::IDR),
                data,
                pts,
            });
        }
        Ok(packets)
    }
}

impl VideoCodec for FfmpegCodec {
    fn name(&self) -> &str {
        &self.codec_name
    }

    fn encode(
        &mut self,
        picture: &YuvPicture,
        pts: u64,
        force_keyframe: bool,
    ) -> Result<Vec<CodecPacket>> {
        if self.drained {
            let (encoder, _) = Self::open_encoder(
                &self.settings,
                self.width,
                self.height,
                self.time_base,
                self.pixel_format,
            )?;
            self.encoder = encoder;
            self.drained = false;
        }

        let picture_type = if force_keyframe {
            PictureType::I
        } else {
            PictureType::None
        };
        let mut frame = self
            .take_frame()
            .with_pts(Timestamp::new(pts as i64, self.time_base))
            .with_picture_type(picture_type);
        self.write_planes(&mut frame, picture);

        let frame = frame.freeze();
        self.encoder
            .push(frame.clone())
            .map_err(|e| Error::Encode(e.to_string()))?;
        self.recycle_frame(frame);
        self.pending_pts.push_back(pts);

        self.drain()
    }

    fn flush(&mut self) -> Result<Vec<CodecPacket>> {
        if self.drained {
            return Ok(Vec::new());
        }
        self.encoder
            .flush()
            .map_err(|e| Error::Encode(e.to_string()))?;
        self.drained = true;
        let packets = self.drain()?;
        self.pending_pts.clear();
        Ok(packets)
    }
}
