use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::{engine::general_purpose, Engine as _};

/// Sample rate of the PCM both remote providers return.
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// Decoded mono audio for one paragraph. Cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Raw signed 16-bit little-endian mono PCM.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32) -> anyhow::Result<Self> {
        if sample_rate == 0 {
            bail!("sample rate must be positive");
        }
        if bytes.len() % 2 != 0 {
            tracing::warn!("PCM payload has an odd length ({} bytes), dropping last byte", bytes.len());
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        Ok(Self::new(samples, sample_rate))
    }

    /// RIFF/WAV, integer or float samples; channels are averaged to mono.
    pub fn from_wav(bytes: &[u8]) -> anyhow::Result<Self> {
        let reader = hound::WavReader::new(Cursor::new(bytes)).context("invalid WAV header")?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .context("failed to read WAV samples")?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .context("failed to read WAV samples")?
            }
        };

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Ok(Self::new(samples, spec.sample_rate))
    }

    /// Encode as 16-bit mono WAV and return Base64.
    pub fn to_wav_base64(&self) -> anyhow::Result<String> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).context("failed to start WAV")?;
            for &s in self.samples.iter() {
                let clamped = s.clamp(-1.0, 1.0);
                writer.write_sample((clamped * i16::MAX as f32) as i16)?;
            }
            writer.finalize().context("failed to finalize WAV")?;
        }
        Ok(general_purpose::STANDARD.encode(cursor.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_duration_follows_sample_rate() {
        let bytes = vec![0u8; PCM_SAMPLE_RATE as usize * 2];
        let clip = AudioClip::from_pcm16_le(&bytes, PCM_SAMPLE_RATE).unwrap();
        assert_eq!(clip.duration(), Duration::from_secs(1));
    }

    #[test]
    fn pcm_decodes_signed_little_endian() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0x01];
        let clip = AudioClip::from_pcm16_le(&bytes, 8_000).unwrap();
        assert_eq!(clip.samples(), &[0.5, -0.5]);
    }

    #[test]
    fn wav_encoding_is_readable_again() {
        let clip = AudioClip::new(vec![0.0, 0.25, -0.25, 0.5], 16_000);
        let b64 = clip.to_wav_base64().unwrap();
        let bytes = general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");

        let back = AudioClip::from_wav(&bytes).unwrap();
        assert_eq!(back.sample_rate(), 16_000);
        assert_eq!(back.samples().len(), 4);
        assert!((back.samples()[1] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn garbage_is_not_a_wav() {
        assert!(AudioClip::from_wav(b"not audio").is_err());
    }
}
