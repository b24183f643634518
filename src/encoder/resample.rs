//! PCM format converter: channel remix, rate conversion, sample representation.

use crate::encoder::adts::sample_rate_index;
use crate::error::{Error, Result};
use crate::media::{AudioFormat, SampleFormat};
use bytes::{BufMut, BytesMut};

/// Converts interleaved `f32` blocks from one fixed format into another.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    input: AudioFormat,
    output: AudioFormat,
}

impl FormatConverter {
    pub fn new(input: AudioFormat, output: AudioFormat) -> Result<Self> {
        if input.sample_format != SampleFormat::F32 {
            return Err(Error::Configuration(format!(
                "input must be f32 samples, got {:?}",
                input.sample_format
            )));
        }
        for (side, format) in [("input", &input), ("output", &output)] {
            if sample_rate_index(format.sample_rate).is_none() {
                return Err(Error::Configuration(format!(
                    "unsupported {} sample rate {} Hz",
                    side, format.sample_rate
                )));
            }
            if !(1..=2).contains(&format.channels) {
                return Err(Error::Configuration(format!(
                    "unsupported {} channel count {}",
                    side, format.channels
                )));
            }
        }
        Ok(Self { input, output })
    }

    pub fn input(&self) -> AudioFormat {
        self.input
    }

    pub fn output(&self) -> AudioFormat {
        self.output
    }

    /// Output frames produced for `input_frames` input frames.
    pub fn output_capacity(&self, input_frames: usize) -> usize {
        (input_frames as u64 * self.output.sample_rate as u64).div_ceil(self.input.sample_rate as u64)
            as usize
    }

    /// Convert one interleaved block and append the encoded samples to `out`.
    ///
    /// Returns the number of output frames written.
    pub fn convert(&self, samples: &[f32], out: &mut BytesMut) -> Result<usize> {
        let in_channels = self.input.channels as usize;
        if samples.len() % in_channels != 0 {
            return Err(Error::Encode(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                in_channels
            )));
        }
        let input_frames = samples.len() / in_channels;
        let capacity = self.output_capacity(input_frames);

        let remixed = self.remix(samples);
        let resampled = if self.input.sample_rate == self.output.sample_rate {
            remixed
        } else {
            self.resample(&remixed, input_frames, capacity)
        };

        let out_channels = self.output.channels as usize;
        let produced = resampled.len() / out_channels;
        if produced != capacity {
            return Err(Error::Encode(format!(
                "converter produced {} of {} frames",
                produced, capacity
            )));
        }

        out.reserve(resampled.len() * self.output.sample_format.bytes_per_sample());
        match self.output.sample_format {
            SampleFormat::F32 => {
                for sample in resampled {
                    out.put_f32_le(sample);
                }
            }
            SampleFormat::I16 => {
                for sample in resampled {
                    out.put_i16_le((sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16);
                }
            }
        }
        Ok(produced)
    }

    fn remix(&self, samples: &[f32]) -> Vec<f32> {
        match (self.input.channels, self.output.channels) {
            (1, 2) => samples.iter().flat_map(|&s| [s, s]).collect(),
            (2, 1) => samples
                .chunks_exact(2)
                .map(|pair| (pair[0] + pair[1]) * 0.5)
                .collect(),
            _ => samples.to_vec(),
        }
    }

    /// Linear interpolation between neighbouring input frames.
    fn resample(&self, interleaved: &[f32], input_frames: usize, output_frames: usize) -> Vec<f32> {
        let channels = self.output.channels as usize;
        let mut out = Vec::with_capacity(output_frames * channels);
        if input_frames == 0 {
            return out;
        }

        let step = self.input.sample_rate as f64 / self.output.sample_rate as f64;
        let last = input_frames - 1;
        for i in 0..output_frames {
            let position = i as f64 * step;
            let index = (position.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let frac = (position - index as f64).clamp(0.0, 1.0) as f32;
            for ch in 0..channels {
                let a = interleaved[index * channels + ch];
                let b = interleaved[next * channels + ch];
                out.push(a + (b - a) * frac);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter(input: AudioFormat, output: AudioFormat) -> FormatConverter {
        FormatConverter::new(input, output).unwrap()
    }

    #[test]
    fn test_identity() {
        let c = converter(AudioFormat::speech(), AudioFormat::speech());
        let mut out = BytesMut::new();
        assert_eq!(c.convert(&[0.5, -0.25], &mut out).unwrap(), 2);
        assert_eq!(&out[..4], &0.5f32.to_le_bytes());
        assert_eq!(&out[4..], &(-0.25f32).to_le_bytes());
    }

    #[test]
    fn test_capacity_rounds_up() {
        let c = converter(
            AudioFormat::new(44_100, 1, SampleFormat::F32),
            AudioFormat::speech(),
        );
        // 1000 * 16000 / 44100 = 362.8...
        assert_eq!(c.output_capacity(1000), 363);

        let samples = vec![0.1f32; 1000];
        let mut out = BytesMut::new();
        assert_eq!(c.convert(&samples, &mut out).unwrap(), 363);
        assert_eq!(out.len(), 363 * 4);
    }

    #[test]
    fn test_downmix_and_i16() {
        let c = converter(
            AudioFormat::new(48_000, 2, SampleFormat::F32),
            AudioFormat::new(48_000, 1, SampleFormat::I16),
        );
        let mut out = BytesMut::new();
        c.convert(&[1.0, 0.0, 2.0, 2.0, -1.0, -1.0], &mut out).unwrap();
        let values: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values, vec![16384, i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_upsample_interpolates() {
        let c = converter(
            AudioFormat::new(8_000, 1, SampleFormat::F32),
            AudioFormat::new(16_000, 2, SampleFormat::F32),
        );
        let mut out = BytesMut::new();
        assert_eq!(c.convert(&[0.0, 1.0], &mut out).unwrap(), 4);
        let values: Vec<f32> = out
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(values, vec![0.0, 0.0, 0.5, 0.5, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_partial_frame_rejected() {
        let c = converter(
            AudioFormat::new(16_000, 2, SampleFormat::F32),
            AudioFormat::speech(),
        );
        let mut out = BytesMut::new();
        assert!(matches!(c.convert(&[0.0; 3], &mut out), Err(Error::Encode(_))));
    }

    #[test]
    fn test_unsupported_bridges() {
        let speech = AudioFormat::speech();
        for input in [
            AudioFormat::new(16_000, 1, SampleFormat::I16),
            AudioFormat::new(17_000, 1, SampleFormat::F32),
            AudioFormat::new(16_000, 6, SampleFormat::F32),
        ] {
            assert!(matches!(
                FormatConverter::new(input, speech),
                Err(Error::Configuration(_))
            ));
        }
        assert!(FormatConverter::new(speech, AudioFormat::new(16_000, 0, SampleFormat::F32)).is_err());
    }
}
