//! Rate Automation
//!
//! Time-stamped playback-rate changes applied to a [`ReversibleSourceNode`]
//! while an [`OfflineContext`] renders. Negative rates play in reverse, so a
//! list of events describes a scrub through the track.
//!
//! ```json
//! { "events": [ { "at_secs": 1.5, "rate": -1.0 }, { "at_secs": 2.5, "rate": 0.5 } ] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::buffer::AudioBuffer;
use crate::engine::offline::OfflineContext;
use crate::error::{Result, RetrogradeError};
use crate::playback::ReversibleSourceNode;

/// Set the rate to `rate` once `at_secs` seconds have been rendered
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateEvent {
    pub at_secs: f64,
    pub rate: f32,
}

/// An ordered list of rate events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateAutomation {
    #[serde(default)]
    events: Vec<RateEvent>,
}

impl RateAutomation {
    /// Validate `events` and sort them by time (ties keep their order)
    pub fn new(mut events: Vec<RateEvent>) -> Result<Self> {
        for event in &events {
            if !event.at_secs.is_finite() || event.at_secs < 0.0 {
                return Err(RetrogradeError::InvalidParameter {
                    name: "at_secs",
                    reason: format!("event time must be non-negative, got {}", event.at_secs),
                });
            }
            if !event.rate.is_finite() {
                return Err(RetrogradeError::InvalidParameter {
                    name: "rate",
                    reason: format!("event rate must be finite, got {}", event.rate),
                });
            }
        }

        events.sort_by(|a, b| a.at_secs.total_cmp(&b.at_secs));
        Ok(Self { events })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: RateAutomation = serde_json::from_str(json)?;
        Self::new(parsed.events)
    }

    /// Load automation from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RetrogradeError::FileNotFound {
                    path: path.display().to_string(),
                    source: Some(e),
                }
            } else {
                RetrogradeError::Io(e)
            }
        })?;
        Self::from_json(&json)
    }

    pub fn events(&self) -> &[RateEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Render `duration_secs` seconds from `context`, applying each event to
    /// `node` as its time is reached
    ///
    /// Event times are relative to the start of this render and take effect
    /// on the first render quantum boundary at or after them. Events at or
    /// beyond `duration_secs` are ignored. The node must already be started
    /// and connected.
    pub fn render(
        &self,
        context: &OfflineContext,
        node: &mut ReversibleSourceNode,
        duration_secs: f64,
    ) -> Result<AudioBuffer> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(RetrogradeError::InvalidParameter {
                name: "duration",
                reason: format!("must be a positive number of seconds, got {}", duration_secs),
            });
        }

        let config = context.config();
        let sample_rate = config.sample_rate as f64;
        let total = (duration_secs * sample_rate).round() as usize;
        let mut channels: Vec<Vec<f32>> = vec![Vec::with_capacity(total); config.channels];
        let mut rendered = 0;

        for event in &self.events {
            let at = (event.at_secs * sample_rate).round() as usize;
            if at >= total {
                break;
            }
            if at > rendered {
                rendered += append(&mut channels, context.render(at - rendered)?);
            }

            node.set_playback_rate(event.rate)?;
            tracing::debug!(
                at_secs = event.at_secs,
                rate = event.rate,
                direction = %node.direction(),
                "applied rate automation event"
            );
        }

        if rendered < total {
            append(&mut channels, context.render(total - rendered)?);
        }
        for channel in &mut channels {
            channel.truncate(total);
        }

        AudioBuffer::from_channels(channels, config.sample_rate)
    }
}

/// Append `block` to `channels`, returning the frames added
fn append(channels: &mut [Vec<f32>], block: AudioBuffer) -> usize {
    let frames = block.len();
    for (dst, src) in channels.iter_mut().zip(block.into_channels()) {
        dst.extend(src);
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::RenderContext;
    use crate::engine::offline::RenderConfig;
    use crate::playback::{Direction, PlaybackOptions};
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    fn timestamp_track() -> AudioBuffer {
        let samples = (0..1000).map(|i| i as f32 / 1000.0).collect();
        AudioBuffer::from_channels(vec![samples], 1000).unwrap()
    }

    #[test]
    fn test_events_are_sorted() {
        let automation = RateAutomation::from_json(
            r#"{"events": [{"at_secs": 2.0, "rate": 1.0}, {"at_secs": 0.5, "rate": -1.0}]}"#,
        )
        .unwrap();

        assert_eq!(
            automation.events(),
            &[
                RateEvent {
                    at_secs: 0.5,
                    rate: -1.0
                },
                RateEvent {
                    at_secs: 2.0,
                    rate: 1.0
                },
            ]
        );
    }

    #[test]
    fn test_rejects_bad_events() {
        let negative = RateEvent {
            at_secs: -1.0,
            rate: 1.0,
        };
        assert!(RateAutomation::new(vec![negative]).is_err());
        assert!(RateAutomation::from_json(r#"{"events": [{"at_secs": 1.0}]}"#).is_err());
        assert!(RateAutomation::from_json("{}").unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = RateAutomation::load(Path::new("/nonexistent/automation.json")).unwrap_err();
        assert_eq!(err.error_code(), "FILE_NOT_FOUND");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrub.json");
        std::fs::write(&path, r#"{"events": [{"at_secs": 0.25, "rate": -2.0}]}"#).unwrap();

        let automation = RateAutomation::load(&path).unwrap();
        assert_eq!(automation.events().len(), 1);
    }

    #[test]
    fn test_render_applies_reverse_event() {
        let ctx = OfflineContext::shared(RenderConfig::new(1000, 1)).unwrap();
        let mut node = ReversibleSourceNode::new(ctx.clone(), PlaybackOptions::default()).unwrap();
        node.connect(ctx.destination(), 0).unwrap();
        node.set_buffer(&timestamp_track()).unwrap();
        node.start().unwrap();

        let automation = RateAutomation::new(vec![RateEvent {
            at_secs: 0.256,
            rate: -1.0,
        }])
        .unwrap();
        let out = automation.render(&ctx, &mut node, 0.5).unwrap();

        assert_eq!(out.len(), 500);
        assert_eq!(node.direction(), Direction::Reverse);

        let samples = out.channel(0);
        assert_abs_diff_eq!(samples[255], 0.255, epsilon = 1e-6);
        // Reverse resumes one sample below the last forward sample
        assert_abs_diff_eq!(samples[256], 0.254, epsilon = 1e-4);
        assert!(samples[300] < samples[256]);
    }

    #[test]
    fn test_render_handles_events_in_one_quantum() {
        let ctx = OfflineContext::shared(RenderConfig::new(1000, 1)).unwrap();
        let mut node = ReversibleSourceNode::new(ctx.clone(), PlaybackOptions::default()).unwrap();
        node.connect(ctx.destination(), 0).unwrap();
        node.set_buffer(&timestamp_track()).unwrap();
        node.start().unwrap();

        // Both events land before the same quantum boundary
        let automation = RateAutomation::new(vec![
            RateEvent {
                at_secs: 0.3,
                rate: -1.0,
            },
            RateEvent {
                at_secs: 0.31,
                rate: 1.0,
            },
        ])
        .unwrap();
        let out = automation.render(&ctx, &mut node, 0.6).unwrap();

        assert_eq!(out.len(), 600);
        assert_eq!(node.direction(), Direction::Forward);
        assert!(!node.forward().has_completed());

        // Forward play carries on where it was
        let samples = out.channel(0);
        assert_abs_diff_eq!(samples[383], 0.383, epsilon = 1e-6);
        assert_abs_diff_eq!(samples[384], 0.383, epsilon = 1e-4);
        assert_abs_diff_eq!(samples[599], 0.598, epsilon = 1e-4);
    }

    #[test]
    fn test_render_rejects_zero_duration() {
        let ctx = OfflineContext::shared(RenderConfig::new(1000, 1)).unwrap();
        let mut node = ReversibleSourceNode::new(ctx.clone(), PlaybackOptions::default()).unwrap();
        assert!(RateAutomation::default().render(&ctx, &mut node, 0.0).is_err());
    }
}
