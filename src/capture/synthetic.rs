use crate::capture::traits::{AudioSource, BlockCallback, FrameCallback, VideoSource};
use crate::media::{PixelFormat, RawAudioBlock, RawVideoFrame};
use anyhow::{Result, anyhow};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn stop(self, name: &str) {
        self.cancel.cancel();
        if self.handle.join().is_err() {
            log::error!("{}: worker panicked", name);
        }
    }
}

/// Sleep until `deadline` in short steps so cancellation is noticed quickly.
fn wait_until(deadline: Instant, cancel: &CancellationToken) {
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
    }
}

/// Moving colour-bar pattern in BGRA.
pub struct SyntheticVideoSource {
    width: u32,
    height: u32,
    fps: u32,
    on_frame: Option<FrameCallback>,
    worker: Option<Worker>,
}

impl SyntheticVideoSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            on_frame: None,
            worker: None,
        }
    }

    fn render(buffer: &mut [u8], width: u32, height: u32, index: u64) {
        let columns = u64::from(width.max(1));
        let shift = index.wrapping_mul(4) % columns;
        for y in 0..height {
            for x in 0..width {
                let p = (y as usize * width as usize + x as usize) * 4;
                let band = (u64::from(x) + shift) * 8 / columns % 8;
                buffer[p] = if band & 1 != 0 { 235 } else { 16 };
                buffer[p + 1] = if band & 2 != 0 { 235 } else { 16 };
                buffer[p + 2] = if band & 4 != 0 { 235 } else { 16 };
                buffer[p + 3] = 255;
                if y * 8 / height.max(1) == 7 {
                    // bottom strip: luminance ramp
                    let level = (x * 255 / width.max(1)) as u8;
                    buffer[p..p + 3].fill(level);
                }
            }
        }
    }
}

impl VideoSource for SyntheticVideoSource {
    fn format(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.fps)
    }

    fn set_on_frame(&mut self, callback: FrameCallback) {
        self.on_frame = Some(callback);
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("SyntheticVideoSource already running"));
        }
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(anyhow!(
                "invalid synthetic video format {}x{}@{}",
                self.width,
                self.height,
                self.fps
            ));
        }
        let callback = self
            .on_frame
            .clone()
            .ok_or_else(|| anyhow!("no frame callback registered"))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (width, height, fps) = (self.width, self.height, self.fps);
        let handle = std::thread::Builder::new()
            .name("synthetic-video".into())
            .spawn(move || {
                let interval = Duration::from_secs_f64(1.0 / fps as f64);
                let mut buffer = vec![0u8; PixelFormat::Bgra.frame_size(width, height)];
                let mut deadline = Instant::now();
                let mut index = 0u64;
                while !token.is_cancelled() {
                    Self::render(&mut buffer, width, height, index);
                    callback(&RawVideoFrame::new(
                        width,
                        height,
                        PixelFormat::Bgra,
                        &buffer,
                        index,
                    ));
                    index += 1;
                    deadline += interval;
                    wait_until(deadline, &token);
                }
                log::debug!("SyntheticVideoSource: produced {} frames", index);
            })?;

        log::info!(
            "SyntheticVideoSource: started {}x{} @ {} fps",
            width,
            height,
            fps
        );
        self.worker = Some(Worker { cancel, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop("SyntheticVideoSource");
            log::info!("SyntheticVideoSource: stopped");
        }
    }
}

impl Drop for SyntheticVideoSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Mono sine tone in float blocks.
pub struct SyntheticAudioSource {
    sample_rate: u32,
    frequency: f32,
    block_frames: usize,
    on_block: Option<BlockCallback>,
    worker: Option<Worker>,
}

impl SyntheticAudioSource {
    /// 440 Hz at 16 kHz in 4096-sample blocks
    pub fn new() -> Self {
        Self::with_tone(16_000, 440.0, 4096)
    }

    pub fn with_tone(sample_rate: u32, frequency: f32, block_frames: usize) -> Self {
        Self {
            sample_rate,
            frequency,
            block_frames,
            on_block: None,
            worker: None,
        }
    }
}

impl Default for SyntheticAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for SyntheticAudioSource {
    fn set_on_block(&mut self, callback: BlockCallback) {
        self.on_block = Some(callback);
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("SyntheticAudioSource already running"));
        }
        if self.sample_rate == 0 || self.block_frames == 0 {
            return Err(anyhow!("invalid synthetic audio format"));
        }
        let callback = self
            .on_block
            .clone()
            .ok_or_else(|| anyhow!("no block callback registered"))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (sample_rate, frequency, block_frames) =
            (self.sample_rate, self.frequency, self.block_frames);
        let handle = std::thread::Builder::new()
            .name("synthetic-audio".into())
            .spawn(move || {
                let block_duration =
                    Duration::from_secs_f64(block_frames as f64 / sample_rate as f64);
                let step = std::f32::consts::TAU * frequency / sample_rate as f32;
                let mut samples = vec![0f32; block_frames];
                let mut phase = 0f32;
                let mut deadline = Instant::now();
                let mut blocks = 0u64;
                while !token.is_cancelled() {
                    for sample in samples.iter_mut() {
                        *sample = 0.5 * phase.sin();
                        phase = (phase + step) % std::f32::consts::TAU;
                    }
                    callback(&RawAudioBlock::new(sample_rate, 1, &samples));
                    blocks += 1;
                    deadline += block_duration;
                    wait_until(deadline, &token);
                }
                log::debug!("SyntheticAudioSource: produced {} blocks", blocks);
            })?;

        log::info!(
            "SyntheticAudioSource: started {} Hz tone at {} Hz",
            frequency,
            sample_rate
        );
        self.worker = Some(Worker { cancel, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop("SyntheticAudioSource");
            log::info!("SyntheticAudioSource: stopped");
        }
    }
}

impl Drop for SyntheticAudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_video_source_delivers_frames() {
        let mut source = SyntheticVideoSource::new(32, 16, 100);
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        source.set_on_frame(Arc::new(move |frame: &RawVideoFrame<'_>| {
            assert_eq!(frame.data.len(), 32 * 16 * 4);
            sink.lock().unwrap().push(frame.timestamp);
        }));

        source.start().unwrap();
        assert!(source.start().is_err());
        std::thread::sleep(Duration::from_millis(100));
        source.stop();

        let count = frames.lock().unwrap().len();
        assert!(count >= 2);
        std::thread::sleep(Duration::from_millis(50));
        // nothing arrives after stop
        assert_eq!(frames.lock().unwrap().len(), count);
        let stamps = frames.lock().unwrap().clone();
        assert!(stamps.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_audio_source_delivers_blocks() {
        let mut source = SyntheticAudioSource::with_tone(16_000, 440.0, 160);
        let blocks = Arc::new(AtomicUsize::new(0));
        let counter = blocks.clone();
        source.set_on_block(Arc::new(move |block: &RawAudioBlock<'_>| {
            assert_eq!(block.sample_rate, 16_000);
            assert_eq!(block.frame_count(), 160);
            assert!(block.samples.iter().all(|s| s.abs() <= 0.5));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        source.start().unwrap();
        std::thread::sleep(Duration::from_millis(80));
        source.stop();
        assert!(blocks.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_render_far_into_the_stream() {
        let mut early = vec![0u8; 16 * 8 * 4];
        let mut late = early.clone();
        SyntheticVideoSource::render(&mut early, 16, 8, 1);
        // shift wraps with the frame width, so frame 1 and frame 1 + 4k match
        SyntheticVideoSource::render(&mut late, 16, 8, 1 + 4 * (u64::MAX / 16));
        assert_eq!(early, late);
        SyntheticVideoSource::render(&mut late, 16, 8, u64::MAX);
        assert!(late.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_start_requires_callback() {
        assert!(SyntheticVideoSource::new(16, 16, 30).start().is_err());
        assert!(SyntheticAudioSource::new().start().is_err());
    }
}
