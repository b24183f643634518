//! ADTS-style chunk headers.
//!
//! Each audio chunk starts with a 7-byte header modelled on the MPEG-4 ADTS
//! fixed and variable headers (sync word, no CRC, AAC LC profile, one raw data
//! block). The frame length field is widened to 17 bits by borrowing the four
//! originality/home/copyright bits that precede it; those bits are always zero
//! in standard streams, so chunks shorter than 8192 bytes are plain ADTS.

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 7;

/// Largest frame (header + payload) the widened length field can describe
pub const MAX_FRAME_LEN: usize = (1 << 17) - 1;

/// MPEG-4 audio object type for AAC LC.
///
/// Written into every header, but the payload behind it is raw PCM, so a
/// standard AAC decoder cannot play these chunks.
pub const AAC_LC: u8 = 2;

const SYNC_WORD: u16 = 0xFFF;
const BUFFER_FULLNESS_VBR: u16 = 0x7FF;

/// Sampling frequency table, indexed by `sampling_frequency_index`
pub const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

pub fn sample_rate_index(sample_rate: u32) -> Option<u8> {
    SAMPLE_RATES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|i| i as u8)
}

fn channel_configuration(channels: u16) -> Option<u8> {
    match channels {
        1..=6 => Some(channels as u8),
        8 => Some(7),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// Audio object type (2 = AAC LC)
    pub profile: u8,
    pub sample_rate_index: u8,
    pub channel_configuration: u8,
    /// Header plus payload, in bytes
    pub frame_len: usize,
    pub buffer_fullness: u16,
    pub raw_blocks: u8,
}

impl AdtsHeader {
    /// Describe a chunk carrying `payload_len` bytes.
    pub fn new(sample_rate: u32, channels: u16, payload_len: usize) -> Result<Self> {
        let sample_rate_index = sample_rate_index(sample_rate).ok_or_else(|| {
            Error::Configuration(format!("no ADTS frequency index for {} Hz", sample_rate))
        })?;
        let channel_configuration = channel_configuration(channels).ok_or_else(|| {
            Error::Configuration(format!("no ADTS channel configuration for {} channels", channels))
        })?;
        let frame_len = HEADER_LEN + payload_len;
        if frame_len > MAX_FRAME_LEN {
            return Err(Error::Encode(format!(
                "chunk of {} bytes exceeds the {} byte frame limit",
                frame_len, MAX_FRAME_LEN
            )));
        }
        Ok(Self {
            profile: AAC_LC,
            sample_rate_index,
            channel_configuration,
            frame_len,
            buffer_fullness: BUFFER_FULLNESS_VBR,
            raw_blocks: 1,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sample_rate_index as usize]
    }

    pub fn payload_len(&self) -> usize {
        self.frame_len - HEADER_LEN
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let len = self.frame_len as u32;
        let chan = self.channel_configuration;
        [
            0xFF,
            // sync low nibble, MPEG-4, layer 0, protection absent
            0xF1,
            ((self.profile - 1) & 0x03) << 6 | (self.sample_rate_index & 0x0F) << 2 | (chan >> 2) & 0x01,
            (chan & 0x03) << 6 | (((len >> 13) & 0x0F) as u8) << 2 | ((len >> 11) & 0x03) as u8,
            ((len >> 3) & 0xFF) as u8,
            ((len & 0x07) as u8) << 5 | ((self.buffer_fullness >> 6) & 0x1F) as u8,
            ((self.buffer_fullness & 0x3F) as u8) << 2 | (self.raw_blocks - 1) & 0x03,
        ]
    }

    /// Read a header from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::MalformedMessage(format!(
                "ADTS header needs {} bytes, got {}",
                HEADER_LEN,
                data.len()
            )));
        }
        let sync = (data[0] as u16) << 4 | (data[1] >> 4) as u16;
        if sync != SYNC_WORD {
            return Err(Error::MalformedMessage(format!("bad sync word {:#05x}", sync)));
        }
        if data[1] & 0x01 == 0 {
            return Err(Error::MalformedMessage("CRC-protected frames are not supported".into()));
        }

        let sample_rate_index = (data[2] >> 2) & 0x0F;
        if sample_rate_index as usize >= SAMPLE_RATES.len() {
            return Err(Error::MalformedMessage(format!(
                "reserved frequency index {}",
                sample_rate_index
            )));
        }
        let frame_len = (((data[3] >> 2) & 0x0F) as usize) << 13
            | ((data[3] & 0x03) as usize) << 11
            | (data[4] as usize) << 3
            | (data[5] as usize) >> 5;
        if frame_len < HEADER_LEN {
            return Err(Error::MalformedMessage(format!("frame length {} too short", frame_len)));
        }

        Ok(Self {
            profile: (data[2] >> 6) + 1,
            sample_rate_index,
            channel_configuration: (data[2] & 0x01) << 2 | data[3] >> 6,
            frame_len,
            buffer_fullness: ((data[5] & 0x1F) as u16) << 6 | (data[6] >> 2) as u16,
            raw_blocks: (data[6] & 0x03) + 1,
        })
    }
}

/// Split a concatenation of chunks into individual chunks (headers included).
pub fn split_chunks(mut data: &[u8]) -> Result<Vec<&[u8]>> {
    let mut chunks = Vec::new();
    while !data.is_empty() {
        let header = AdtsHeader::parse(data)?;
        if header.frame_len > data.len() {
            return Err(Error::MalformedMessage(format!(
                "truncated chunk: {} of {} bytes",
                data.len(),
                header.frame_len
            )));
        }
        let (chunk, rest) = data.split_at(header.frame_len);
        chunks.push(chunk);
        data = rest;
    }
    Ok(chunks)
}
