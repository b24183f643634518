use crate::error::{Error, Result};
use crate::media::{EncodedAudioChunk, EncodedVideoUnit};
use base64::engine::general_purpose::PAD;
use base64::engine::GeneralPurpose;
use base64::{Engine, alphabet};
use serde::{Deserialize, Serialize};

const BASE64: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, PAD);

/// Outbound media message. `data` holds the base64 encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    VideoFrame { is_keyframe: bool, data: String },
    AudioChunk { data: String },
}

impl Envelope {
    pub fn video(unit: &EncodedVideoUnit) -> Self {
        Envelope::VideoFrame {
            is_keyframe: unit.is_keyframe,
            data: BASE64.encode(&unit.data),
        }
    }

    pub fn audio(chunk: &EncodedAudioChunk) -> Self {
        Envelope::AudioChunk {
            data: BASE64.encode(&chunk.data),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Envelope::VideoFrame { .. } => "video_frame",
            Envelope::AudioChunk { .. } => "audio_chunk",
        }
    }

    /// Decode the base64 payload back into raw bytes.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let data = match self {
            Envelope::VideoFrame { data, .. } | Envelope::AudioChunk { data } => data,
        };
        BASE64
            .decode(data)
            .map_err(|e| Error::MalformedMessage(format!("invalid base64 payload: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Send(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// WebSocket frame type used to carry serialized envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeEncoding {
    /// UTF-8 JSON in a text frame
    Text,
    /// UTF-8 JSON bytes in a binary frame
    #[default]
    Binary,
}
