//! Audio Buffer
//!
//! The immutable multi-channel signal every other component plays, reverses
//! or augments. A buffer is never mutated after construction: reversal and
//! position-channel augmentation always produce a new buffer.

use crate::error::{Result, RetrogradeError};

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert linear amplitude to decibels
///
/// Returns `-f32::INFINITY` for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Calculate the peak level of an audio buffer in dB
///
/// Returns `-f32::INFINITY` for empty or silent buffers.
pub fn calculate_peak(buffer: &AudioBuffer) -> f32 {
    let peak = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| s.abs())
        .fold(0.0_f32, f32::max);

    linear_to_db(peak)
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Fixed-length, multi-channel block of audio samples plus a sample rate
///
/// Stores audio as non-interleaved 32-bit floating point samples, one
/// `Vec<f32>` per channel. All channels have the same length.
///
/// # Example
/// ```
/// use retrograde::engine::AudioBuffer;
///
/// let buffer = AudioBuffer::from_channels(vec![vec![0.0, 0.5, 1.0]], 48000).unwrap();
/// let reversed = buffer.reversed();
/// assert_eq!(reversed.channel(0), &[1.0, 0.5, 0.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer
    ///
    /// # Errors
    /// `InvalidParameter` if `num_channels` or `sample_rate` is zero.
    pub fn silent(num_channels: usize, num_samples: usize, sample_rate: u32) -> Result<Self> {
        Self::from_channels(vec![vec![0.0_f32; num_samples]; num_channels], sample_rate)
    }

    /// Create a buffer from per-channel sample vectors
    ///
    /// # Errors
    /// * `InvalidParameter` - no channels, or a zero sample rate
    /// * `LengthMismatch` - channels of differing length
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(RetrogradeError::InvalidParameter {
                name: "channels",
                reason: "a buffer needs at least one channel".to_string(),
            });
        }

        if sample_rate == 0 {
            return Err(RetrogradeError::InvalidParameter {
                name: "sample_rate",
                reason: "sample rate must be positive".to_string(),
            });
        }

        let expected = samples[0].len();
        if let Some(bad) = samples.iter().find(|ch| ch.len() != expected) {
            return Err(RetrogradeError::LengthMismatch {
                expected,
                actual: bad.len(),
            });
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create a buffer from interleaved sample data (L, R, L, R, ...)
    pub fn from_interleaved(
        interleaved: &[f32],
        num_channels: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if num_channels == 0 {
            return Err(RetrogradeError::InvalidParameter {
                name: "channels",
                reason: "a buffer needs at least one channel".to_string(),
            });
        }

        if interleaved.len() % num_channels != 0 {
            return Err(RetrogradeError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    num_channels
                ),
                source: None,
            });
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Self::from_channels(samples, sample_rate)
    }

    /// Convert the buffer to interleaved format
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(self.num_channels() * self.len());

        for sample_idx in 0..self.len() {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }

        interleaved
    }

    /// New buffer of identical shape with every channel's sample order mirrored
    ///
    /// Linear in the number of samples. Prefer supplying a pre-reversed
    /// buffer for long material.
    pub fn reversed(&self) -> Self {
        let samples = self
            .samples
            .iter()
            .map(|channel| channel.iter().rev().copied().collect())
            .collect();

        Self {
            samples,
            sample_rate: self.sample_rate,
        }
    }

    /// Get the number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer holds no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Iterate over all channels in order
    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.samples.iter().map(|ch| ch.as_slice())
    }

    /// Get a sample, or None if either index is out of bounds
    #[inline]
    pub fn get_sample(&self, channel: usize, index: usize) -> Option<f32> {
        self.samples
            .get(channel)
            .and_then(|ch| ch.get(index))
            .copied()
    }

    /// Consume the buffer and return its channel vectors
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.samples
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
