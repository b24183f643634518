use crate::encoder::VideoBackend;
use crate::error::{Error, Result};
use crate::media::{AudioFormat, SampleFormat};
use crate::protocol::EnvelopeEncoding;
use crate::transport::{RetryPolicy, TransportOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target bits per second
    pub bitrate: u32,
    pub backend: VideoBackend,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 640,
            height: 480,
            fps: 30,
            bitrate: 500_000,
            backend: VideoBackend::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    /// What the capture side delivers
    pub input: AudioFormat,
    /// What goes on the wire
    pub output: AudioFormat,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            input: AudioFormat::speech(),
            output: AudioFormat::new(16_000, 1, SampleFormat::F32),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Frame type carrying the JSON envelopes
    pub message_kind: EnvelopeEncoding,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            max_retries: 5,
            retry_delay_ms: 2000,
            message_kind: EnvelopeEncoding::default(),
        }
    }
}

impl TransportConfig {
    pub fn options(&self) -> TransportOptions {
        TransportOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                delay: Duration::from_millis(self.retry_delay_ms),
            },
        }
    }
}

/// Everything needed to build a [`StreamCoordinator`](crate::pipeline::StreamCoordinator).
///
/// Every field has a default, so a config file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub server_url: String,
    pub auth_token: Option<String>,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000/ws".to_string(),
            auth_token: None,
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        log::info!("StreamConfig: loaded {}", path.display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Configuration(e.to_string()))
    }
}
