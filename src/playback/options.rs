//! Playback configuration shared by position and reversible nodes

use serde::{Deserialize, Serialize};

use crate::engine::context::DEFAULT_FFT_SIZE;
use crate::error::{Result, RetrogradeError};

/// Source settings applied to every session a node starts
///
/// Missing fields fall back to their defaults when deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackOptions {
    /// Playback rate multiplier (default: 1.0). A reversible node reads a
    /// negative value as "start in reverse"; position nodes require >= 0.
    pub playback_rate: f32,
    /// Detune in cents (default: 0.0)
    pub detune: f32,
    /// Analyser window in frames (default: 2048)
    pub fft_size: usize,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            playback_rate: 1.0,
            detune: 0.0,
            fft_size: DEFAULT_FFT_SIZE,
        }
    }
}

impl PlaybackOptions {
    pub fn with_playback_rate(mut self, rate: f32) -> Self {
        self.playback_rate = rate;
        self
    }

    pub fn with_detune(mut self, cents: f32) -> Self {
        self.detune = cents;
        self
    }

    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }
}

pub(crate) fn ensure_finite(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(RetrogradeError::InvalidParameter {
            name,
            reason: format!("must be finite, got {}", value),
        })
    }
}
