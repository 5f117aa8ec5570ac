//! PCM helpers shared by playback, segmentation and the speech clients.
//!
//! Audio moves through the agent as little-endian signed 16-bit PCM. WAV is
//! only used at the edges, when talking to the speech services.

use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

/// Raw PCM layout. `sample_width` is in bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
}

impl AudioFormat {
    /// What the OpenAI speech endpoint returns for `pcm` output.
    pub const PCM16_24K_MONO: AudioFormat = AudioFormat {
        sample_rate: 24_000,
        channels: 1,
        sample_width: 2,
    };

    /// The rate most WebRTC stacks hand inbound audio over at.
    pub const PCM16_48K_MONO: AudioFormat = AudioFormat {
        sample_rate: 48_000,
        channels: 1,
        sample_width: 2,
    };

    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_width: 2,
        }
    }

    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channels) * u64::from(self.sample_width)
    }

    /// Size of one frame (one sample for every channel).
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * usize::from(self.sample_width)
    }

    /// A format that cannot describe any audio.
    pub fn is_degenerate(&self) -> bool {
        self.bytes_per_second() == 0
    }

    /// Exact playback time of `len` bytes in this format.
    pub fn duration_of(&self, len: usize) -> Duration {
        match self.bytes_per_second() {
            0 => Duration::ZERO,
            rate => Duration::from_secs_f64(len as f64 / rate as f64),
        }
    }

    /// Byte length of `duration` worth of audio, rounded down to whole frames.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let bytes =
            (u128::from(self.bytes_per_second()) * duration.as_nanos() / 1_000_000_000) as usize;
        let frame = self.frame_bytes().max(1);
        bytes - bytes % frame
    }
}

/// Interprets little-endian bytes as i16 samples. A trailing odd byte is ignored.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Root-mean-square level of a block of samples, normalised to `0.0..=1.0`.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = convert_i16_to_f32(samples)
        .iter()
        .map(|&s| f64::from(s) * f64::from(s))
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Wraps 16-bit PCM in a WAV container.
pub fn encode_wav(pcm: &[u8], format: AudioFormat) -> Result<Vec<u8>, hound::Error> {
    if format.sample_width != 2 {
        return Err(hound::Error::Unsupported);
    }
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in pcm16_from_bytes(pcm) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Extracts 16-bit PCM and its format from a WAV container.
pub fn decode_wav(wav: &[u8]) -> Result<(Vec<u8>, AudioFormat), hound::Error> {
    let mut reader = hound::WavReader::new(Cursor::new(wav))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(hound::Error::Unsupported);
    }
    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<i16>, hound::Error>>()?;
    Ok((
        pcm16_to_bytes(&samples),
        AudioFormat::pcm16(spec.sample_rate, spec.channels),
    ))
}

/// True when the payload starts with a RIFF/WAVE header.
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}
