//! Audio encoder: converts raw PCM blocks into self-framed chunks.
//!
//! Encoding is synchronous and stateless across calls. Each accepted block
//! produces exactly one [`EncodedAudioChunk`]: a 7-byte ADTS-style header
//! followed by the converted samples.
//!
//! The payload is not AAC. It is raw interleaved PCM in the output sample
//! format (f32 or i16, little-endian), even though the header's profile field
//! reads AAC LC. A receiver must take the sample layout from configuration
//! and use the header only for framing.

use crate::encoder::adts::{AdtsHeader, HEADER_LEN};
use crate::encoder::resample::FormatConverter;
use crate::error::{Error, Result};
use crate::media::{AudioFormat, EncodedAudioChunk, RawAudioBlock};
use bytes::BytesMut;

pub struct AudioEncoder {
    converter: FormatConverter,
}

impl AudioEncoder {
    /// Build an encoder bridging two fixed formats.
    pub fn new(input: AudioFormat, output: AudioFormat) -> Result<Self> {
        let converter = FormatConverter::new(input, output)?;
        // validates the header fields once up front
        AdtsHeader::new(output.sample_rate, output.channels, 0)?;
        log::info!(
            "AudioEncoder: {} Hz x{} {:?} -> {} Hz x{} {:?}",
            input.sample_rate,
            input.channels,
            input.sample_format,
            output.sample_rate,
            output.channels,
            output.sample_format
        );
        Ok(Self { converter })
    }

    pub fn input_format(&self) -> AudioFormat {
        self.converter.input()
    }

    /// Encode one block into one chunk.
    pub fn encode(&self, block: &RawAudioBlock<'_>) -> Result<EncodedAudioChunk> {
        let input = self.converter.input();
        if block.sample_rate != input.sample_rate || block.channels != input.channels {
            return Err(Error::Encode(format!(
                "block is {} Hz x{}, encoder expects {} Hz x{}",
                block.sample_rate, block.channels, input.sample_rate, input.channels
            )));
        }
        if block.samples.is_empty() {
            return Err(Error::Encode("empty audio block".into()));
        }

        let output = self.converter.output();
        let capacity = self.converter.output_capacity(block.frame_count());
        let payload_hint =
            capacity * output.channels as usize * output.sample_format.bytes_per_sample();

        let mut data = BytesMut::with_capacity(HEADER_LEN + payload_hint);
        data.resize(HEADER_LEN, 0);
        self.converter.convert(block.samples, &mut data)?;

        let header = AdtsHeader::new(output.sample_rate, output.channels, data.len() - HEADER_LEN)?;
        data[..HEADER_LEN].copy_from_slice(&header.to_bytes());

        log::debug!(
            "AudioEncoder: {} frames -> {} byte chunk",
            block.frame_count(),
            data.len()
        );
        Ok(EncodedAudioChunk {
            data: data.freeze(),
        })
    }
}
