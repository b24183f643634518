//! Stream coordinator: capture sources -> encoders -> envelopes -> transport,
//! and inbound results -> snapshot.
//!
//! The coordinator is built once at the composition root. Every callback it
//! registers (on sources, the video encoder and the transport) holds only a
//! `Weak` reference back to the shared state, so dropping the coordinator
//! tears the whole graph down.

use crate::capture::{AudioSource, VideoSource};
use crate::config::StreamConfig;
use crate::encoder::{AudioEncoder, CodecFactory, CodecSettings, VideoEncoder, open_codec};
use crate::error::{Error, Result};
use crate::media::{EncodedVideoUnit, RawAudioBlock, RawVideoFrame};
use crate::pipeline::health::{PipelineHealth, report_periodically};
use crate::pipeline::state::PipelineState;
use crate::protocol::{EmotionSnapshot, Envelope, EnvelopeEncoding, ResultMessage};
use crate::transport::{ConnectionState, Connector, TransportClient};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Receives the snapshot after every decoded result message.
pub type ResultCallback = Arc<dyn Fn(&EmotionSnapshot) + Send + Sync>;

struct Lifecycle {
    state: PipelineState,
    video_source: Option<Box<dyn VideoSource>>,
    audio_source: Option<Box<dyn AudioSource>>,
    health_cancel: Option<CancellationToken>,
}

impl Lifecycle {
    fn set_state(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }
}

struct Shared {
    config: StreamConfig,
    video: Mutex<VideoEncoder>,
    /// `None` when audio is disabled or its formats could not be bridged
    audio: Option<Mutex<AudioEncoder>>,
    transport: TransportClient,
    encoding: EnvelopeEncoding,
    health: Arc<PipelineHealth>,
    snapshot: watch::Sender<EmotionSnapshot>,
    on_result: RwLock<Option<ResultCallback>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Shared {
    fn video(&self) -> MutexGuard<'_, VideoEncoder> {
        self.video
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn encode_frame(&self, frame: &RawVideoFrame<'_>) {
        if !self.config.video.enabled {
            return;
        }
        if let Err(e) = self.video().encode(frame) {
            log::warn!("StreamCoordinator: frame {} dropped: {}", frame.timestamp, e);
            self.health.record_drop();
        }
    }

    fn encode_block(&self, block: &RawAudioBlock<'_>) {
        let Some(audio) = &self.audio else {
            return;
        };
        let chunk = {
            let encoder = audio.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            encoder.encode(block)
        };
        match chunk {
            Ok(chunk) => {
                let size = chunk.size();
                if self.send_envelope(&Envelope::audio(&chunk)) {
                    self.health.record_audio_chunk(size);
                }
            }
            Err(e) => {
                log::warn!("StreamCoordinator: audio block dropped: {}", e);
                self.health.record_drop();
            }
        }
    }

    fn on_video_unit(&self, unit: EncodedVideoUnit) {
        log::debug!("StreamCoordinator: {:?}", unit);
        if self.send_envelope(&Envelope::video(&unit)) {
            self.health.record_video_unit(unit.size(), unit.is_keyframe);
        }
    }

    /// Serialize and hand to the transport. Anything not accepted counts as a drop.
    fn send_envelope(&self, envelope: &Envelope) -> bool {
        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                log::error!("StreamCoordinator: {} not serialized: {}", envelope.type_name(), e);
                self.health.record_drop();
                return false;
            }
        };
        let sent = match self.encoding {
            EnvelopeEncoding::Text => self.transport.send_text(json),
            EnvelopeEncoding::Binary => self.transport.send_binary(Bytes::from(json.into_bytes())),
        };
        if !sent {
            self.health.record_drop();
        }
        sent
    }

    fn on_message(&self, data: Bytes) {
        let message = match ResultMessage::parse(&data) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("StreamCoordinator: ignoring inbound message: {}", e);
                self.health.record_malformed();
                return;
            }
        };
        self.health.record_result();
        self.snapshot.send_if_modified(|snapshot| snapshot.apply(&message));

        let callback = self
            .on_result
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(callback) = callback {
            let snapshot = self.snapshot.borrow().clone();
            callback(&snapshot);
        }
    }

    fn on_connected(&self) {
        // the server may have missed every reference frame so far
        self.video().request_keyframe();
    }

    fn on_video_dropped(&self, pts: u64) {
        log::debug!("StreamCoordinator: frame {} lost in the codec", pts);
        self.health.record_drop();
    }

    fn on_disconnected(&self, error: Option<&Error>) {
        if let Some(e) = error {
            log::warn!("StreamCoordinator: connection lost: {}", e);
            self.health.record_network_error();
        }
    }
}

pub struct StreamCoordinator {
    shared: Arc<Shared>,
}

impl StreamCoordinator {
    pub fn new(config: StreamConfig, connector: Arc<dyn Connector>) -> Self {
        let backend = config.video.backend;
        Self::with_codec_factory(
            config,
            connector,
            Arc::new(move |settings: CodecSettings| open_codec(backend, settings)),
        )
    }

    /// Like [`new`](Self::new), with video sessions opened by `codec_factory`
    /// instead of the configured backend.
    pub fn with_codec_factory(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        codec_factory: CodecFactory,
    ) -> Self {
        let video = VideoEncoder::with_codec_factory(codec_factory, config.video.bitrate);

        let audio = if config.audio.enabled {
            match AudioEncoder::new(config.audio.input, config.audio.output) {
                Ok(encoder) => Some(Mutex::new(encoder)),
                Err(e) => {
                    log::error!("StreamCoordinator: audio disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let transport = TransportClient::new(connector, config.transport.options());
        let encoding = config.transport.message_kind;
        let (snapshot, _) = watch::channel(EmotionSnapshot::default());

        let shared = Arc::new(Shared {
            config,
            video: Mutex::new(video),
            audio,
            transport,
            encoding,
            health: Arc::new(PipelineHealth::new()),
            snapshot,
            on_result: RwLock::new(None),
            lifecycle: Mutex::new(Lifecycle {
                state: PipelineState::Idle,
                video_source: None,
                audio_source: None,
                health_cancel: None,
            }),
        });

        let weak = Arc::downgrade(&shared);
        shared.video().set_on_encoded(with_shared(&weak, Shared::on_video_unit));
        shared
            .video()
            .set_on_dropped(with_shared(&weak, Shared::on_video_dropped));
        let w = weak.clone();
        shared.transport.set_on_connected(move || {
            if let Some(shared) = w.upgrade() {
                shared.on_connected();
            }
        });
        let w = weak.clone();
        shared.transport.set_on_disconnected(move |error| {
            if let Some(shared) = w.upgrade() {
                shared.on_disconnected(error);
            }
        });
        shared
            .transport
            .set_on_message_data(with_shared(&weak, Shared::on_message));

        Self { shared }
    }

    /// Attach the camera side. Only possible while idle.
    pub fn set_video_source(&self, source: Box<dyn VideoSource>) -> Result<()> {
        let mut lifecycle = self.shared.lifecycle();
        if lifecycle.state != PipelineState::Idle {
            return Err(Error::Configuration(
                "video source cannot change while running".into(),
            ));
        }
        lifecycle.video_source = Some(source);
        Ok(())
    }

    /// Attach the microphone side. Only possible while idle.
    pub fn set_audio_source(&self, source: Box<dyn AudioSource>) -> Result<()> {
        let mut lifecycle = self.shared.lifecycle();
        if lifecycle.state != PipelineState::Idle {
            return Err(Error::Configuration(
                "audio source cannot change while running".into(),
            ));
        }
        lifecycle.audio_source = Some(source);
        Ok(())
    }

    /// Register the result consumer. Replaces any previous one.
    pub fn set_on_result<F>(&self, callback: F)
    where
        F: Fn(&EmotionSnapshot) + Send + Sync + 'static,
    {
        let mut slot = self
            .shared
            .on_result
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(callback));
    }

    /// Configure the encoders and start the sources. A no-op while running.
    pub fn start(&self) {
        let mut lifecycle = self.shared.lifecycle();
        if lifecycle.state.is_running() {
            log::debug!("StreamCoordinator: start ignored, already running");
            return;
        }

        let video = &self.shared.config.video;
        let mut video_ready = false;
        if video.enabled {
            let (width, height, fps) = lifecycle
                .video_source
                .as_ref()
                .map(|source| source.format())
                .unwrap_or((video.width, video.height, video.fps));
            video_ready = self.shared.video().configure(width, height, fps);
            if !video_ready {
                log::error!("StreamCoordinator: video disabled, encoder configuration failed");
            }
        }

        let weak = Arc::downgrade(&self.shared);
        if video_ready {
            if let Some(source) = lifecycle.video_source.as_mut() {
                let w = weak.clone();
                source.set_on_frame(Arc::new(move |frame: &RawVideoFrame<'_>| {
                    if let Some(shared) = w.upgrade() {
                        shared.encode_frame(frame);
                    }
                }));
                if let Err(e) = source.start() {
                    log::error!("StreamCoordinator: video source failed to start: {}", e);
                }
            }
        }

        if self.shared.audio.is_some() {
            if let Some(source) = lifecycle.audio_source.as_mut() {
                let w = weak.clone();
                source.set_on_block(Arc::new(move |block: &RawAudioBlock<'_>| {
                    if let Some(shared) = w.upgrade() {
                        shared.encode_block(block);
                    }
                }));
                if let Err(e) = source.start() {
                    log::error!("StreamCoordinator: audio source failed to start: {}", e);
                }
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let cancel = CancellationToken::new();
                handle.spawn(report_periodically(
                    self.shared.health.clone(),
                    HEALTH_REPORT_INTERVAL,
                    cancel.clone(),
                ));
                lifecycle.health_cancel = Some(cancel);
            }
            Err(_) => log::debug!("StreamCoordinator: no runtime, health reports disabled"),
        }

        lifecycle.set_state(PipelineState::Running {
            started_at: Instant::now(),
        });
        log::info!("StreamCoordinator: started");
    }

    /// Stop the sources (audio, then video), then flush and close the video encoder.
    pub fn stop(&self) {
        let mut lifecycle = self.shared.lifecycle();
        if !lifecycle.state.is_running() {
            return;
        }
        let ran_for = lifecycle.state.running_duration();
        lifecycle.set_state(PipelineState::Stopping);

        if let Some(cancel) = lifecycle.health_cancel.take() {
            cancel.cancel();
        }
        if let Some(source) = lifecycle.audio_source.as_mut() {
            source.stop();
        }
        if let Some(source) = lifecycle.video_source.as_mut() {
            source.stop();
        }
        self.shared.video().stop();

        lifecycle.set_state(PipelineState::Idle);
        log::info!(
            "StreamCoordinator: stopped after {:?}. {}",
            ran_for.unwrap_or_default(),
            self.shared.health.summary()
        );
    }

    pub fn state(&self) -> PipelineState {
        self.shared.lifecycle().state
    }

    /// Feed one frame as if the video source had delivered it.
    pub fn inject_frame(&self, frame: &RawVideoFrame<'_>) {
        self.shared.encode_frame(frame);
    }

    /// Feed one block as if the audio source had delivered it.
    pub fn inject_audio_block(&self, block: &RawAudioBlock<'_>) {
        self.shared.encode_block(block);
    }

    /// Feed little-endian float32 mono samples at the configured input rate.
    pub fn inject_pcm_bytes(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let chunks = data.chunks_exact(4);
        if !chunks.remainder().is_empty() {
            log::warn!(
                "StreamCoordinator: ignoring {} trailing PCM bytes",
                chunks.remainder().len()
            );
        }
        let samples: Vec<f32> = chunks
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if samples.is_empty() {
            return;
        }
        let Some(audio) = &self.shared.audio else {
            return;
        };
        let rate = audio
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .input_format()
            .sample_rate;
        self.shared
            .encode_block(&RawAudioBlock::new(rate, 1, &samples));
    }

    /// Connect the transport to the configured server.
    pub async fn connect(&self) -> Result<()> {
        let config = &self.shared.config;
        let result = self
            .shared
            .transport
            .connect(&config.server_url, config.auth_token.as_deref())
            .await;
        if result.is_err() {
            self.shared.health.record_network_error();
        }
        result
    }

    pub fn disconnect(&self) {
        self.shared.transport.disconnect();
    }

    pub fn transport(&self) -> &TransportClient {
        &self.shared.transport
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        self.shared.health.clone()
    }

    pub fn snapshot(&self) -> EmotionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe_results(&self) -> watch::Receiver<EmotionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Connection state as the transport sees it, `Failing` included.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.shared.transport.subscribe_state()
    }
}

impl Drop for StreamCoordinator {
    fn drop(&mut self) {
        self.stop();
        self.shared.transport.disconnect();
    }
}

/// Wrap a `Shared` method as a callback holding only a weak reference.
fn with_shared<T, F>(weak: &Weak<Shared>, f: F) -> impl Fn(T) + Send + Sync + 'static
where
    T: 'static,
    F: Fn(&Shared, T) + Send + Sync + 'static,
{
    let weak = weak.clone();
    move |value| {
        if let Some(shared) = weak.upgrade() {
            f(&shared, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{BlockCallback, FrameCallback};
    use crate::encoder::{CodecPacket, VideoCodec};
    use crate::media::{PixelFormat, YuvPicture};
    use crate::transport::{ConnectRequest, DuplexChannel, WireMessage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeChannel {
        sent: Mutex<Vec<WireMessage>>,
        inbound: tokio::sync::Mutex<VecDeque<WireMessage>>,
        close_signal: tokio::sync::Notify,
    }

    impl FakeChannel {
        fn new(inbound: Vec<WireMessage>) -> Arc<Self> {
            Arc::new(Self {
                inbound: tokio::sync::Mutex::new(inbound.into()),
                ..Default::default()
            })
        }

        fn envelopes(&self) -> Vec<Envelope> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|message| {
                    let bytes = message.clone().into_bytes();
                    Envelope::from_json(std::str::from_utf8(&bytes).unwrap()).unwrap()
                })
                .collect()
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DuplexChannel for FakeChannel {
        async fn send(&self, message: WireMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&self) -> Result<WireMessage> {
            let next = self.inbound.lock().await.pop_front();
            match next {
                Some(message) => Ok(message),
                None => {
                    self.close_signal.notified().await;
                    Err(Error::TransportReceive("closed".into()))
                }
            }
        }

        async fn close(&self, _reason: &str) -> Result<()> {
            self.close_signal.notify_waiters();
            Ok(())
        }
    }

    struct FakeConnector {
        channels: Mutex<VecDeque<Arc<FakeChannel>>>,
        delay: Duration,
    }

    impl FakeConnector {
        fn new(channels: Vec<Arc<FakeChannel>>) -> Arc<Self> {
            Self::with_delay(channels, Duration::ZERO)
        }

        fn with_delay(channels: Vec<Arc<FakeChannel>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                channels: Mutex::new(channels.into()),
                delay,
            })
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open(&self, _request: &ConnectRequest) -> Result<Arc<dyn DuplexChannel>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.channels.lock().unwrap().pop_front() {
                Some(channel) => Ok(channel),
                None => Err(Error::TransportConnect("refused".into())),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Counters {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    struct CountingVideoSource(Counters);

    impl VideoSource for CountingVideoSource {
        fn format(&self) -> (u32, u32, u32) {
            (64, 48, 5)
        }

        fn set_on_frame(&mut self, _callback: FrameCallback) {}

        fn start(&mut self) -> anyhow::Result<()> {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingAudioSource(Counters);

    impl AudioSource for CountingAudioSource {
        fn set_on_block(&mut self, _callback: BlockCallback) {}

        fn start(&mut self) -> anyhow::Result<()> {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(kind: EnvelopeEncoding) -> StreamConfig {
        let mut config = StreamConfig::default();
        config.video.width = 64;
        config.video.height = 48;
        config.video.fps = 5;
        config.transport.message_kind = kind;
        config
    }

    fn frame_data() -> Vec<u8> {
        vec![128u8; PixelFormat::Bgra.frame_size(64, 48)]
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..300 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_video_frame_sent_as_keyframe_envelope() {
        let channel = FakeChannel::new(vec![]);
        let coordinator = StreamCoordinator::new(
            config(EnvelopeEncoding::Text),
            FakeConnector::new(vec![channel.clone()]),
        );
        coordinator.connect().await.unwrap();
        coordinator.start();

        let data = frame_data();
        coordinator.inject_frame(&RawVideoFrame::new(64, 48, PixelFormat::Bgra, &data, 0));

        assert!(wait_for(|| channel.sent_count() == 1).await);
        assert!(matches!(channel.sent.lock().unwrap()[0], WireMessage::Text(_)));
        match &channel.envelopes()[0] {
            Envelope::VideoFrame { is_keyframe, .. } => assert!(*is_keyframe),
            other => panic!("unexpected envelope {:?}", other),
        }
        assert!(wait_for(|| coordinator.health().summary().keyframes == 1).await);
        coordinator.stop();
    }

    #[tokio::test]
    async fn test_pcm_bytes_sent_as_audio_chunk() {
        let channel = FakeChannel::new(vec![]);
        let coordinator = StreamCoordinator::new(
            config(EnvelopeEncoding::Binary),
            FakeConnector::new(vec![channel.clone()]),
        );
        coordinator.connect().await.unwrap();

        let pcm: Vec<u8> = (0..4096)
            .flat_map(|i| ((i as f32 / 4096.0) - 0.5).to_le_bytes())
            .collect();
        coordinator.inject_pcm_bytes(&pcm);
        coordinator.inject_pcm_bytes(&[]);

        assert!(wait_for(|| channel.sent_count() == 1).await);
        assert!(matches!(channel.sent.lock().unwrap()[0], WireMessage::Binary(_)));
        let envelope = &channel.envelopes()[0];
        assert_eq!(envelope.type_name(), "audio_chunk");
        assert_eq!(envelope.payload().unwrap().len(), 16391);
        assert_eq!(coordinator.health().summary().audio_chunks, 1);
    }

    #[tokio::test]
    async fn test_disconnected_sends_count_as_drops() {
        let channel = FakeChannel::new(vec![]);
        let coordinator = StreamCoordinator::new(
            config(EnvelopeEncoding::Binary),
            FakeConnector::new(vec![channel.clone()]),
        );

        let samples = vec![0.25f32; 1024];
        coordinator.inject_audio_block(&RawAudioBlock::new(16_000, 1, &samples));
        // wrong rate for the configured input
        coordinator.inject_audio_block(&RawAudioBlock::new(44_100, 1, &samples));

        assert_eq!(coordinator.health().drops(), 2);
        assert_eq!(channel.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_inbound_results_update_snapshot() {
        let channel = FakeChannel::new(vec![
            WireMessage::Text("not json".into()),
            WireMessage::Text(
                r#"{"emotion_result":"calm","emotion_scores":{"happy":0.2,"sad":0.7}}"#.into(),
            ),
            WireMessage::Binary(Bytes::from_static(br#"{"emotion_result":"tired"}"#)),
        ]);
        let coordinator = StreamCoordinator::new(
            config(EnvelopeEncoding::Binary),
            FakeConnector::new(vec![channel]),
        );
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        coordinator.set_on_result(move |snapshot| {
            sink.lock().unwrap().push(snapshot.clone());
        });

        let results = coordinator.subscribe_results();
        assert_eq!(results.borrow().emotion_result, "waiting for analysis");
        assert_eq!(results.borrow().dominant_emotion, "neutral");

        coordinator.connect().await.unwrap();
        assert!(wait_for(|| delivered.lock().unwrap().len() == 2).await);

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.emotion_result, "tired");
        assert_eq!(snapshot.dominant_emotion, "sad");
        assert_eq!(snapshot.emotion_scores.len(), 2);
        assert_eq!(delivered.lock().unwrap()[0].emotion_result, "calm");

        let summary = coordinator.health().summary();
        assert_eq!(summary.malformed_messages, 1);
        assert_eq!(summary.results_received, 2);
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_order() {
        let video = Counters::default();
        let audio = Counters::default();
        let coordinator = StreamCoordinator::new(
            config(EnvelopeEncoding::Binary),
            FakeConnector::new(vec![]),
        );
        coordinator
            .set_video_source(Box::new(CountingVideoSource(video.clone())))
            .unwrap();
        coordinator
            .set_audio_source(Box::new(CountingAudioSource(audio.clone())))
            .unwrap();

        coordinator.start();
        coordinator.start();
        assert!(coordinator.state().is_running());
        assert_eq!(video.starts.load(Ordering::SeqCst), 1);
        assert_eq!(audio.starts.load(Ordering::SeqCst), 1);
        assert!(
            coordinator
                .set_video_source(Box::new(CountingVideoSource(video.clone())))
                .is_err()
        );

        coordinator.stop();
        coordinator.stop();
        assert_eq!(coordinator.state(), PipelineState::Idle);
        assert_eq!(video.stops.load(Ordering::SeqCst), 1);
        assert_eq!(audio.stops.load(Ordering::SeqCst), 1);

        coordinator.start();
        assert_eq!(video.starts.load(Ordering::SeqCst), 2);
        coordinator.stop();
    }

    #[tokio::test]
    async fn test_status_follows_transport() {
        let coordinator = StreamCoordinator::new(
            config(EnvelopeEncoding::Binary),
            FakeConnector::new(vec![FakeChannel::new(vec![])]),
        );
        let status = coordinator.subscribe_status();
        assert_eq!(*status.borrow(), ConnectionState::Disconnected);

        coordinator.connect().await.unwrap();
        assert_eq!(*status.borrow(), ConnectionState::Connected);

        coordinator.disconnect();
        assert_eq!(*status.borrow(), ConnectionState::Disconnected);

        // the connector has no channel left
        assert!(coordinator.connect().await.is_err());
        assert_eq!(*status.borrow(), ConnectionState::Disconnected);
        assert_eq!(coordinator.health().summary().network_errors, 1);
    }

    #[tokio::test]
    async fn test_keyframe_after_reconnect() {
        let first = FakeChannel::new(vec![]);
        let second = FakeChannel::new(vec![]);
        let coordinator = StreamCoordinator::new(
            config(EnvelopeEncoding::Text),
            FakeConnector::new(vec![first.clone(), second.clone()]),
        );
        coordinator.connect().await.unwrap();
        coordinator.start();

        let data = frame_data();
        for pts in 0..2 {
            coordinator.inject_frame(&RawVideoFrame::new(64, 48, PixelFormat::Bgra, &data, pts));
        }
        assert!(wait_for(|| first.sent_count() == 2).await);

        coordinator.disconnect();
        coordinator.connect().await.unwrap();
        coordinator.inject_frame(&RawVideoFrame::new(64, 48, PixelFormat::Bgra, &data, 2));

        assert!(wait_for(|| second.sent_count() == 1).await);
        match &second.envelopes()[0] {
            Envelope::VideoFrame { is_keyframe, .. } => assert!(*is_keyframe),
            other => panic!("unexpected envelope {:?}", other),
        }
        let keys: Vec<bool> = first
            .envelopes()
            .iter()
            .map(|e| matches!(e, Envelope::VideoFrame { is_keyframe: true, .. }))
            .collect();
        assert_eq!(keys, vec![true, false]);
        coordinator.stop();
    }

    struct RejectingCodec {
        reject: u64,
    }

    impl VideoCodec for RejectingCodec {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn encode(
            &mut self,
            _picture: &YuvPicture,
            pts: u64,
            force_keyframe: bool,
        ) -> Result<Vec<CodecPacket>> {
            if pts == self.reject {
                return Err(Error::Encode("rejected".into()));
            }
            Ok(vec![CodecPacket {
                data: Bytes::from_static(&[0, 0, 0, 1, 0x65]),
                is_keyframe: force_keyframe,
                pts,
            }])
        }

        fn flush(&mut self) -> Result<Vec<CodecPacket>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_codec_failures_count_as_drops() {
        let channel = FakeChannel::new(vec![]);
        let coordinator = StreamCoordinator::with_codec_factory(
            config(EnvelopeEncoding::Text),
            FakeConnector::new(vec![channel.clone()]),
            Arc::new(|_: CodecSettings| -> Result<Box<dyn VideoCodec>> {
                Ok(Box::new(RejectingCodec { reject: 1 }))
            }),
        );
        coordinator.connect().await.unwrap();
        coordinator.start();

        let data = frame_data();
        for pts in 0..3 {
            coordinator.inject_frame(&RawVideoFrame::new(64, 48, PixelFormat::Bgra, &data, pts));
        }

        assert!(wait_for(|| channel.sent_count() == 2).await);
        assert!(wait_for(|| coordinator.health().drops() == 1).await);
        assert_eq!(coordinator.health().summary().video_units, 2);
        coordinator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_failing_while_retrying() {
        let channel = FakeChannel::new(vec![]);
        let mut config = config(EnvelopeEncoding::Binary);
        config.transport.max_retries = 1;
        let coordinator = StreamCoordinator::new(
            config,
            FakeConnector::with_delay(vec![channel.clone()], Duration::from_secs(1)),
        );
        let status = coordinator.subscribe_status();

        coordinator.connect().await.unwrap();
        assert_eq!(*status.borrow(), ConnectionState::Connected);

        // let the receive loop park on the channel before it is closed
        tokio::time::sleep(Duration::from_millis(10)).await;
        channel.close("gone").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(*status.borrow(), ConnectionState::Failing);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*status.borrow(), ConnectionState::Disconnected);
    }
}
