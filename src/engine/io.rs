//! Audio file I/O for Retrograde
//!
//! Handles importing and exporting WAV files. Imported audio keeps its native
//! sample rate; the render context compensates at playback time.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::AudioBuffer;
use crate::engine::context::MAX_CHANNELS;
use crate::error::{Result, RetrogradeError};

/// Export format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    /// Bit depth: 16, 24, or 32 (default: 24)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat { bit_depth: 24 }
    }
}

impl ExportFormat {
    /// Create a new export format with the given bit depth
    pub fn new(bit_depth: u16) -> Self {
        ExportFormat { bit_depth }
    }
}

/// Import a WAV file as an [`AudioBuffer`]
///
/// # Errors
/// * `FileNotFound` - If the file does not exist
/// * `InvalidAudio` - If the file is not a valid WAV file
/// * `UnsupportedFormat` - If the channel count or bit depth is unsupported
/// * `EmptyAudio` - If the file holds no samples
pub fn import_audio(path: &Path) -> Result<AudioBuffer> {
    if !path.exists() {
        return Err(RetrogradeError::FileNotFound {
            path: path.display().to_string(),
            source: None,
        });
    }

    let reader = WavReader::open(path).map_err(|e| RetrogradeError::InvalidAudio {
        reason: format!("Failed to open WAV file: {}", e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;

    // One slot is reserved for the position channel
    if channels == 0 || channels >= MAX_CHANNELS {
        return Err(RetrogradeError::UnsupportedFormat {
            format: format!(
                "{}-channel audio (1 to {} channels supported)",
                channels,
                MAX_CHANNELS - 1
            ),
        });
    }

    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    if samples.is_empty() {
        return Err(RetrogradeError::EmptyAudio);
    }

    tracing::debug!(
        path = %path.display(),
        channels,
        sample_rate = spec.sample_rate,
        frames = samples.len() / channels,
        "imported audio"
    );

    AudioBuffer::from_interleaved(&samples, channels, spec.sample_rate)
}

/// Export an [`AudioBuffer`] to a WAV file at the buffer's own sample rate
pub fn export_audio(buffer: &AudioBuffer, path: &Path, format: ExportFormat) -> Result<()> {
    if !matches!(format.bit_depth, 16 | 24 | 32) {
        return Err(RetrogradeError::UnsupportedFormat {
            format: format!("{}-bit audio (only 16, 24, 32 supported)", format.bit_depth),
        });
    }

    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let interleaved = buffer.to_interleaved();
    let mut writer = WavWriter::create(path, spec).map_err(hound_to_io)?;

    match format.bit_depth {
        16 => {
            for sample in interleaved {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled).map_err(hound_to_io)?;
            }
        }
        24 => {
            for sample in interleaved {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled).map_err(hound_to_io)?;
            }
        }
        _ => {
            for sample in interleaved {
                writer.write_sample(sample).map_err(hound_to_io)?;
            }
        }
    }

    writer.finalize().map_err(hound_to_io)?;

    tracing::debug!(path = %path.display(), bit_depth = format.bit_depth, "exported audio");
    Ok(())
}

/// Generate a mono sine tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> Result<AudioBuffer> {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;

    let samples = (0..num_samples)
        .map(|i| (angular_freq * i as f32).sin())
        .collect();

    AudioBuffer::from_channels(vec![samples], sample_rate)
}

/// Generate a stereo tone with different frequencies per channel
pub fn generate_stereo_test_tone(
    freq_left: f32,
    freq_right: f32,
    duration_secs: f32,
    sample_rate: u32,
) -> Result<AudioBuffer> {
    let left = generate_test_tone(freq_left, duration_secs, sample_rate)?;
    let right = generate_test_tone(freq_right, duration_secs, sample_rate)?;

    let mut channels = left.into_channels();
    channels.extend(right.into_channels());
    AudioBuffer::from_channels(channels, sample_rate)
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn hound_to_io(e: hound::Error) -> RetrogradeError {
    match e {
        hound::Error::IoError(io) => RetrogradeError::Io(io),
        other => RetrogradeError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            other.to_string(),
        )),
    }
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let scale = match (sample_format, bits_per_sample) {
        (SampleFormat::Float, _) => {
            return reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| RetrogradeError::InvalidAudio {
                    reason: format!("Failed to read float samples: {}", e),
                    source: Some(Box::new(e)),
                });
        }
        (SampleFormat::Int, 8) => 128.0,
        (SampleFormat::Int, 16) => 32768.0,
        (SampleFormat::Int, 24) => 8388608.0,
        (SampleFormat::Int, 32) => 2147483648.0,
        (SampleFormat::Int, bits) => {
            return Err(RetrogradeError::UnsupportedFormat {
                format: format!("{}-bit integer audio", bits),
            });
        }
    };

    reader
        .samples::<i32>()
        .map(|s| s.map(|v| v as f32 / scale))
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(|e| RetrogradeError::InvalidAudio {
            reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
            source: Some(Box::new(e)),
        })
}

// ============================================================================
// Tests
// ============================================================================
