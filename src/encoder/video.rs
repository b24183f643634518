//! Video encoder session.
//!
//! [`VideoEncoder`] owns one codec session at a time. Frames are converted to
//! I420 on the caller's thread (so the caller's buffer is released as soon as
//! `encode` returns) and handed to a dedicated worker thread that drives the
//! codec and delivers [`EncodedVideoUnit`]s through the registered callback.

use crate::encoder::codec::{CodecPacket, CodecSettings, VideoBackend, VideoCodec, open_codec};
use crate::error::{Error, Result};
use crate::media::{EncodedVideoUnit, RawVideoFrame, YuvPicture, to_i420};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

/// Callback receiving every encoded unit, invoked on the encoder's worker thread.
pub type EncodedCallback = Arc<dyn Fn(EncodedVideoUnit) + Send + Sync>;

/// Callback receiving the pts of every frame the codec failed on, invoked on the worker thread.
pub type DroppedCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Opens a codec for each new session.
pub type CodecFactory = Arc<dyn Fn(CodecSettings) -> Result<Box<dyn VideoCodec>> + Send + Sync>;

enum Command {
    Encode {
        picture: YuvPicture,
        pts: u64,
        force_keyframe: bool,
    },
    Flush(mpsc::Sender<()>),
    Stop,
}

struct Session {
    tx: mpsc::Sender<Command>,
    worker: Option<JoinHandle<()>>,
    settings: CodecSettings,
    next_pts: u64,
    /// Frames submitted since the last forced keyframe, `None` before the first
    frames_since_keyframe: Option<u32>,
}

pub struct VideoEncoder {
    codec_factory: CodecFactory,
    bitrate: u32,
    on_encoded: Arc<Mutex<Option<EncodedCallback>>>,
    on_dropped: Arc<Mutex<Option<DroppedCallback>>>,
    keyframe_requested: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    session: Option<Session>,
}

impl VideoEncoder {
    pub fn new(backend: VideoBackend, bitrate: u32) -> Self {
        Self::with_codec_factory(
            Arc::new(move |settings: CodecSettings| open_codec(backend, settings)),
            bitrate,
        )
    }

    /// Build an encoder whose sessions are backed by codecs from `codec_factory`.
    pub fn with_codec_factory(codec_factory: CodecFactory, bitrate: u32) -> Self {
        Self {
            codec_factory,
            bitrate,
            on_encoded: Arc::new(Mutex::new(None)),
            on_dropped: Arc::new(Mutex::new(None)),
            keyframe_requested: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            session: None,
        }
    }

    /// Register the consumer of encoded units. Replaces any previous callback.
    pub fn set_on_encoded<F>(&self, callback: F)
    where
        F: Fn(EncodedVideoUnit) + Send + Sync + 'static,
    {
        let mut slot = self
            .on_encoded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(callback));
    }

    /// Register the observer of frames lost to codec errors. Replaces any previous one.
    pub fn set_on_dropped<F>(&self, callback: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let mut slot = self
            .on_dropped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(callback));
    }

    pub fn is_configured(&self) -> bool {
        self.session.is_some()
    }

    /// Open a codec session. Returns `true` if a session is (already) open.
    pub fn configure(&mut self, width: u32, height: u32, fps: u32) -> bool {
        if self.session.is_some() {
            return true;
        }

        let settings = CodecSettings::new(width, height, fps, self.bitrate);
        let codec = match (self.codec_factory)(settings) {
            Ok(codec) => codec,
            Err(e) => {
                log::error!(
                    "VideoEncoder: cannot open codec at {}x{}@{}: {}",
                    width,
                    height,
                    fps,
                    e
                );
                return false;
            }
        };
        log::info!(
            "VideoEncoder: configured {} {}x{} @ {} fps, keyframe every {} frames",
            codec.name(),
            width,
            height,
            fps,
            settings.keyframe_interval
        );

        let (tx, rx) = mpsc::channel();
        let on_encoded = self.on_encoded.clone();
        let on_dropped = self.on_dropped.clone();
        let dropped = self.dropped.clone();
        let frame_duration = Duration::from_secs_f64(1.0 / fps as f64);
        let worker = std::thread::Builder::new()
            .name("video-encoder".into())
            .spawn(move || run_worker(codec, rx, on_encoded, on_dropped, dropped, frame_duration));

        match worker {
            Ok(handle) => {
                self.keyframe_requested.store(false, Ordering::Relaxed);
                self.session = Some(Session {
                    tx,
                    worker: Some(handle),
                    settings,
                    next_pts: 0,
                    frames_since_keyframe: None,
                });
                true
            }
            Err(e) => {
                log::error!("VideoEncoder: failed to spawn worker: {}", e);
                false
            }
        }
    }

    /// Submit one frame. Returns as soon as the frame has been queued.
    pub fn encode(&mut self, frame: &RawVideoFrame<'_>) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(Error::Encode("encoder is not configured".into()));
        };
        if frame.width != session.settings.width || frame.height != session.settings.height {
            return Err(Error::Encode(format!(
                "frame {}x{} does not match configured {}x{}",
                frame.width, frame.height, session.settings.width, session.settings.height
            )));
        }

        let picture = to_i420(frame)?;

        let requested = self.keyframe_requested.swap(false, Ordering::Relaxed);
        let force_keyframe = match session.frames_since_keyframe {
            None => true,
            Some(n) => requested || n >= session.settings.keyframe_interval,
        };
        session.frames_since_keyframe = Some(match session.frames_since_keyframe {
            Some(n) if !force_keyframe => n + 1,
            _ => 1,
        });

        let pts = session.next_pts;
        session.next_pts += 1;

        session
            .tx
            .send(Command::Encode {
                picture,
                pts,
                force_keyframe,
            })
            .map_err(|_| Error::Encode("encoder worker has exited".into()))
    }

    /// Block until every frame submitted so far has been delivered.
    pub fn flush(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if session.tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Flush, tear down the session and reset the frame counter.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if session.tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
        let _ = session.tx.send(Command::Stop);
        if let Some(worker) = session.worker.take() {
            if worker.join().is_err() {
                log::error!("VideoEncoder: worker panicked");
            }
        }
        log::info!("VideoEncoder: stopped after {} frames", session.next_pts);
    }

    /// Make the next submitted frame a keyframe.
    pub fn request_keyframe(&self) {
        self.keyframe_requested.store(true, Ordering::Relaxed);
    }

    /// Frames whose output was lost to codec errors.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    mut codec: Box<dyn VideoCodec>,
    rx: mpsc::Receiver<Command>,
    on_encoded: Arc<Mutex<Option<EncodedCallback>>>,
    on_dropped: Arc<Mutex<Option<DroppedCallback>>>,
    dropped: Arc<AtomicU64>,
    frame_duration: Duration,
) {
    log::debug!("VideoEncoder: worker started");

    let deliver = |packets: Vec<CodecPacket>| {
        if packets.is_empty() {
            return;
        }
        let callback = on_encoded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for packet in packets {
            let unit = EncodedVideoUnit {
                data: packet.data,
                is_keyframe: packet.is_keyframe,
                pts: packet.pts,
                duration: frame_duration,
            };
            match &callback {
                Some(callback) => callback(unit),
                None => log::debug!("VideoEncoder: no consumer, unit {} discarded", unit.pts),
            }
        }
    };

    while let Ok(command) = rx.recv() {
        match command {
            Command::Encode {
                picture,
                pts,
                force_keyframe,
            } => match codec.encode(&picture, pts, force_keyframe) {
                Ok(packets) => deliver(packets),
                Err(e) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    log::error!("VideoEncoder: frame {} dropped: {}", pts, e);
                    let callback = on_dropped
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .clone();
                    if let Some(callback) = callback {
                        callback(pts);
                    }
                }
            },
            Command::Flush(ack) => {
                match codec.flush() {
                    Ok(packets) => deliver(packets),
                    Err(e) => log::error!("VideoEncoder: flush failed: {}", e),
                }
                let _ = ack.send(());
            }
            Command::Stop => break,
        }
    }

    log::debug!("VideoEncoder: worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::bitstream::{contains_nal_type, nal};
    use crate::media::PixelFormat;

    fn collecting_encoder() -> (VideoEncoder, Arc<Mutex<Vec<EncodedVideoUnit>>>) {
        let encoder = VideoEncoder::new(VideoBackend::Software, 500_000);
        let units = Arc::new(Mutex::new(Vec::new()));
        let sink = units.clone();
        encoder.set_on_encoded(move |unit| sink.lock().unwrap().push(unit));
        (encoder, units)
    }

    fn bgra(width: u32, height: u32, shade: u8) -> Vec<u8> {
        vec![shade; (width * height * 4) as usize]
    }

    #[test]
    fn test_single_frame_is_keyframe() {
        let (mut encoder, units) = collecting_encoder();
        assert!(encoder.configure(640, 480, 30));

        let data = bgra(640, 480, 80);
        encoder
            .encode(&RawVideoFrame::new(640, 480, PixelFormat::Bgra, &data, 0))
            .unwrap();
        encoder.flush();

        let units = units.lock().unwrap();
        assert_eq!(units.len(), 1);
        assert!(units[0].is_keyframe);
        assert!(contains_nal_type(&units[0].data, nal::SPS));
        assert!(contains_nal_type(&units[0].data, nal::IDR));
        assert_eq!(units[0].duration, Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn test_keyframe_cadence() {
        let (mut encoder, units) = collecting_encoder();
        let fps = 5;
        assert!(encoder.configure(32, 32, fps));

        let frames = 53;
        for i in 0..frames {
            let data = bgra(32, 32, i as u8);
            encoder
                .encode(&RawVideoFrame::new(32, 32, PixelFormat::Bgra, &data, i))
                .unwrap();
        }
        encoder.flush();

        let units = units.lock().unwrap();
        assert!(units.len() <= frames as usize);
        assert!(units[0].is_keyframe);
        assert!(units.windows(2).all(|w| w[0].pts <= w[1].pts));

        let window = (2 * fps) as usize;
        for chunk in units.windows(window) {
            assert!(chunk.iter().any(|u| u.is_keyframe));
        }
    }

    #[test]
    fn test_request_keyframe() {
        let (mut encoder, units) = collecting_encoder();
        assert!(encoder.configure(16, 16, 30));
        let data = bgra(16, 16, 1);
        for i in 0..4 {
            if i == 2 {
                encoder.request_keyframe();
            }
            encoder
                .encode(&RawVideoFrame::new(16, 16, PixelFormat::Bgra, &data, i))
                .unwrap();
        }
        encoder.flush();

        let flags: Vec<bool> = units.lock().unwrap().iter().map(|u| u.is_keyframe).collect();
        assert_eq!(flags, vec![true, false, true, false]);
    }

    #[test]
    fn test_configure_is_idempotent_until_stop() {
        let (mut encoder, units) = collecting_encoder();
        assert!(encoder.configure(32, 32, 30));
        assert!(encoder.configure(64, 64, 30));

        let small = bgra(32, 32, 7);
        let large = bgra(64, 64, 7);
        encoder
            .encode(&RawVideoFrame::new(32, 32, PixelFormat::Bgra, &small, 0))
            .unwrap();
        assert!(
            encoder
                .encode(&RawVideoFrame::new(64, 64, PixelFormat::Bgra, &large, 1))
                .is_err()
        );

        encoder.stop();
        assert!(!encoder.is_configured());
        assert!(encoder.configure(64, 64, 30));
        encoder
            .encode(&RawVideoFrame::new(64, 64, PixelFormat::Bgra, &large, 2))
            .unwrap();
        encoder.stop();

        let units = units.lock().unwrap();
        assert_eq!(units.len(), 2);
        // counter restarts with the new session
        assert_eq!(units[1].pts, 0);
        assert!(units[1].is_keyframe);
    }

    #[test]
    fn test_encode_before_configure() {
        let (mut encoder, units) = collecting_encoder();
        let data = bgra(16, 16, 0);
        assert!(matches!(
            encoder.encode(&RawVideoFrame::new(16, 16, PixelFormat::Bgra, &data, 0)),
            Err(Error::Encode(_))
        ));
        assert!(units.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_resolution() {
        let (mut encoder, _) = collecting_encoder();
        assert!(!encoder.configure(0, 480, 30));
        assert!(!encoder.configure(16384, 16384, 30));
        assert!(!encoder.is_configured());
    }

    /// Fails on the frames listed in `fail_on`, emits a one-byte unit otherwise.
    struct FlakyCodec {
        fail_on: Vec<u64>,
    }

    impl VideoCodec for FlakyCodec {
        fn name(&self) -> &str {
            "flaky"
        }

        fn encode(
            &mut self,
            _picture: &YuvPicture,
            pts: u64,
            force_keyframe: bool,
        ) -> Result<Vec<CodecPacket>> {
            if self.fail_on.contains(&pts) {
                return Err(Error::Encode(format!("codec rejected frame {}", pts)));
            }
            Ok(vec![CodecPacket {
                data: bytes::Bytes::from_static(&[0]),
                is_keyframe: force_keyframe,
                pts,
            }])
        }

        fn flush(&mut self) -> Result<Vec<CodecPacket>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_codec_failure_drops_only_that_frame() {
        let mut encoder = VideoEncoder::with_codec_factory(
            Arc::new(|_: CodecSettings| -> Result<Box<dyn VideoCodec>> {
                Ok(Box::new(FlakyCodec { fail_on: vec![1] }))
            }),
            500_000,
        );
        let units = Arc::new(Mutex::new(Vec::new()));
        let sink = units.clone();
        encoder.set_on_encoded(move |unit| sink.lock().unwrap().push(unit.pts));
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let sink = dropped.clone();
        encoder.set_on_dropped(move |pts| sink.lock().unwrap().push(pts));

        assert!(encoder.configure(16, 16, 30));
        let data = bgra(16, 16, 3);
        for i in 0..3 {
            encoder
                .encode(&RawVideoFrame::new(16, 16, PixelFormat::Bgra, &data, i))
                .unwrap();
        }
        encoder.flush();

        assert_eq!(*units.lock().unwrap(), vec![0, 2]);
        assert_eq!(*dropped.lock().unwrap(), vec![1]);
        assert_eq!(encoder.dropped_frames(), 1);
        assert!(encoder.is_configured());
    }
}
