//! Health counters for the streaming pipeline

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Health metrics for a running pipeline.
///
/// All fields use atomic operations so encoder workers, capture threads and
/// transport tasks can record without coordination.
pub struct PipelineHealth {
    /// Video units handed to the transport
    pub video_units: AtomicU64,

    /// Of which keyframes
    pub keyframes: AtomicU64,

    /// Audio chunks handed to the transport
    pub audio_chunks: AtomicU64,

    /// Serialized envelope bytes handed to the transport
    pub bytes_sent: AtomicU64,

    /// Frames, blocks or envelopes lost to encode failures or a closed connection
    pub drops: AtomicU64,

    /// Receive failures and failed connects
    pub network_errors: AtomicU64,

    /// Inbound results applied to the snapshot
    pub results_received: AtomicU64,

    /// Inbound messages that failed to decode
    pub malformed_messages: AtomicU64,

    /// Unix microseconds of the last envelope sent
    pub last_send_time: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            video_units: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            audio_chunks: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            network_errors: AtomicU64::new(0),
            results_received: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
            last_send_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_video_unit(&self, size: usize, is_keyframe: bool) {
        self.video_units.fetch_add(1, Ordering::Relaxed);
        if is_keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
        self.record_sent(size);
    }

    pub fn record_audio_chunk(&self, size: usize) {
        self.audio_chunks.fetch_add(1, Ordering::Relaxed);
        self.record_sent(size);
    }

    fn record_sent(&self, size: usize) {
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
        self.last_send_time.store(now_micros(), Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result(&self) {
        self.results_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Percentage of media items that never reached the transport
    pub fn drop_rate(&self) -> f64 {
        let drops = self.drops();
        let total = drops
            + self.video_units.load(Ordering::Relaxed)
            + self.audio_chunks.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (drops as f64 / total as f64) * 100.0
    }

    /// Whether nothing has been sent for longer than `threshold`
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last = self.last_send_time.load(Ordering::Relaxed);
        now_micros().saturating_sub(last) > threshold.as_micros() as u64
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            video_units: self.video_units.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            audio_chunks: self.audio_chunks.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            drops: self.drops(),
            drop_rate: self.drop_rate(),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            results_received: self.results_received.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub video_units: u64,
    pub keyframes: u64,
    pub audio_chunks: u64,
    pub bytes_sent: u64,
    pub drops: u64,
    pub drop_rate: f64,
    pub network_errors: u64,
    pub results_received: u64,
    pub malformed_messages: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} video units ({} keyframes), {} audio chunks, {} bytes, {} drops ({:.2}%), {} network errors, {} results, {} malformed",
            self.video_units,
            self.keyframes,
            self.audio_chunks,
            self.bytes_sent,
            self.drops,
            self.drop_rate,
            self.network_errors,
            self.results_received,
            self.malformed_messages
        )
    }
}

/// Log a health summary every `interval` until cancelled.
pub async fn report_periodically(
    health: Arc<PipelineHealth>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                log::info!("{}", health.summary());
                if health.is_stalled(interval) {
                    log::warn!("PipelineHealth: nothing sent for {:?}", interval);
                }
            }
        }
    }
}
