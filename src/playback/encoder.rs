//! Position-Channel Encoder
//!
//! A buffer source cannot report how far it has played. Appending a channel
//! whose sample `i` equals `i / length` fixes that: whatever rate or detune
//! the source runs at, the instantaneous value of that channel is the
//! fraction of the buffer consumed so far.

use crate::engine::buffer::AudioBuffer;
use crate::engine::context::MAX_CHANNELS;
use crate::error::{Result, RetrogradeError};

/// Largest f32 below 1.0; very long buffers would otherwise round their
/// last ramp values up to exactly 1.0
const JUST_UNDER_ONE: f32 = 1.0 - f32::EPSILON / 2.0;

/// Build the normalized ramp `ramp[i] = i / length` for `i` in `[0, length)`
///
/// The last value is just under 1.0.
///
/// # Errors
/// `InvalidLength` for a zero length.
pub fn make_ramp(length: usize) -> Result<Vec<f32>> {
    if length == 0 {
        return Err(RetrogradeError::InvalidLength { length });
    }

    Ok((0..length)
        .map(|i| ((i as f64 / length as f64) as f32).min(JUST_UNDER_ONE))
        .collect())
}

/// Return a new buffer holding every channel of `signal` followed by `ramp`
///
/// # Errors
/// * `LengthMismatch` - `ramp` is not exactly as long as `signal`; a
///   truncated ramp would silently corrupt position recovery
/// * `UnsupportedFormat` - no channel slot left for the ramp
pub fn augment(signal: &AudioBuffer, ramp: &[f32]) -> Result<AudioBuffer> {
    if ramp.len() != signal.len() {
        return Err(RetrogradeError::LengthMismatch {
            expected: signal.len(),
            actual: ramp.len(),
        });
    }

    if signal.num_channels() >= MAX_CHANNELS {
        return Err(RetrogradeError::UnsupportedFormat {
            format: format!(
                "{}-channel audio leaves no room for a position channel",
                signal.num_channels()
            ),
        });
    }

    let mut channels: Vec<Vec<f32>> = signal.channels().map(<[f32]>::to_vec).collect();
    channels.push(ramp.to_vec());

    AudioBuffer::from_channels(channels, signal.sample_rate())
}

/// Build the ramp for `signal` and append it
pub fn encode_position_channel(signal: &AudioBuffer) -> Result<AudioBuffer> {
    let ramp = make_ramp(signal.len())?;
    augment(signal, &ramp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::generate_stereo_test_tone;
    use test_case::test_case;

    #[test_case(1 ; "single sample")]
    #[test_case(7 ; "odd length")]
    #[test_case(48000 ; "one second at 48k")]
    fn test_ramp_shape(length: usize) {
        let ramp = make_ramp(length).unwrap();

        assert_eq!(ramp.len(), length);
        assert_eq!(ramp[0], 0.0);
        assert!(ramp[length - 1] < 1.0);
        assert!(ramp.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_ramp_values() {
        assert_eq!(make_ramp(4).unwrap(), vec![0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn test_ramp_rejects_zero_length() {
        let err = make_ramp(0).unwrap_err();
        assert!(matches!(err, RetrogradeError::InvalidLength { length: 0 }));
    }

    #[test]
    fn test_augment_preserves_original_channels() {
        let signal = generate_stereo_test_tone(440.0, 660.0, 0.1, 44100).unwrap();
        let augmented = encode_position_channel(&signal).unwrap();

        assert_eq!(augmented.num_channels(), signal.num_channels() + 1);
        assert_eq!(augmented.len(), signal.len());
        assert_eq!(augmented.sample_rate(), signal.sample_rate());
        for ch in 0..signal.num_channels() {
            assert_eq!(augmented.channel(ch), signal.channel(ch));
        }

        let position = augmented.channel(signal.num_channels());
        assert_eq!(position[0], 0.0);
        assert!(position[signal.len() - 1] < 1.0);
    }

    #[test]
    fn test_augment_requires_matching_length() {
        let signal = AudioBuffer::silent(1, 10, 48000).unwrap();
        let ramp = make_ramp(9).unwrap();

        let err = augment(&signal, &ramp).unwrap_err();
        assert!(matches!(
            err,
            RetrogradeError::LengthMismatch {
                expected: 10,
                actual: 9
            }
        ));
    }

    #[test]
    fn test_augment_rejects_full_channel_count() {
        let signal = AudioBuffer::silent(MAX_CHANNELS, 4, 48000).unwrap();
        assert!(encode_position_channel(&signal).is_err());
    }
}
