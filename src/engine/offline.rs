//! Offline Render Context
//!
//! A deterministic, in-process [`RenderContext`]: audio only advances when
//! the caller asks for more frames. Used by the CLI to render files and by
//! tests to observe playback frame by frame.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::buffer::AudioBuffer;
use crate::engine::context::{EndedHandler, NodeId, RenderContext, RENDER_QUANTUM_SIZE};
use crate::engine::graph::{validate_channel_count, validate_fft_size, NodeKind, RenderGraph};
use crate::error::{Result, RetrogradeError};

/// Offline renderer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Output sample rate in Hz (default: 48000)
    pub sample_rate: u32,
    /// Destination channel count (default: 2)
    pub channels: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

impl RenderConfig {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// Block-based renderer driven by explicit `render` calls
pub struct OfflineContext {
    config: RenderConfig,
    graph: Mutex<RenderGraph>,
}

impl OfflineContext {
    /// Create a context, validating the configuration
    pub fn new(config: RenderConfig) -> Result<Self> {
        if config.sample_rate == 0 {
            return Err(RetrogradeError::InvalidParameter {
                name: "sample_rate",
                reason: "sample rate must be positive".to_string(),
            });
        }
        validate_channel_count("channels", config.channels)?;

        Ok(Self {
            config,
            graph: Mutex::new(RenderGraph::new(config.sample_rate, config.channels)),
        })
    }

    /// Create a context already wrapped for sharing with playback nodes
    pub fn shared(config: RenderConfig) -> Result<Arc<Self>> {
        Self::new(config).map(Arc::new)
    }

    pub fn config(&self) -> RenderConfig {
        self.config
    }

    /// Total frames rendered since creation
    pub fn frames_rendered(&self) -> u64 {
        self.graph.lock().frames_rendered()
    }

    /// Render `quanta` render quanta and return the destination output
    ///
    /// Ended handlers fire after the quantum in which their source ended,
    /// with the graph unlocked.
    pub fn render_quanta(&self, quanta: usize) -> Result<AudioBuffer> {
        let mut channels: Vec<Vec<f32>> =
            vec![Vec::with_capacity(quanta * RENDER_QUANTUM_SIZE); self.config.channels];

        for _ in 0..quanta {
            let mut ended: Vec<EndedHandler> = Vec::new();
            let bus = self.graph.lock().process_quantum(&mut ended);

            for (dst, src) in channels.iter_mut().zip(bus) {
                dst.extend(src);
            }

            if !ended.is_empty() {
                tracing::trace!(count = ended.len(), "dispatching ended handlers");
            }
            for handler in ended {
                handler();
            }
        }

        AudioBuffer::from_channels(channels, self.config.sample_rate)
    }

    /// Render at least `frames` frames, rounded up to whole quanta
    pub fn render(&self, frames: usize) -> Result<AudioBuffer> {
        self.render_quanta(frames.div_ceil(RENDER_QUANTUM_SIZE))
    }

    /// Render at least `secs` seconds, rounded up to whole quanta
    pub fn render_seconds(&self, secs: f64) -> Result<AudioBuffer> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(RetrogradeError::InvalidParameter {
                name: "secs",
                reason: format!("must be a non-negative duration, got {}", secs),
            });
        }
        self.render((secs * self.config.sample_rate as f64).round() as usize)
    }
}

impl RenderContext for OfflineContext {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.graph.lock().current_time()
    }

    fn destination(&self) -> NodeId {
        self.graph.lock().destination()
    }

    fn create_buffer_source(&self, buffer: Arc<AudioBuffer>) -> NodeId {
        self.graph.lock().add(NodeKind::source(buffer))
    }

    fn create_channel_splitter(&self, outputs: usize) -> Result<NodeId> {
        validate_channel_count("outputs", outputs)?;
        Ok(self.graph.lock().add(NodeKind::Splitter { outputs }))
    }

    fn create_channel_merger(&self, inputs: usize) -> Result<NodeId> {
        validate_channel_count("inputs", inputs)?;
        Ok(self.graph.lock().add(NodeKind::Merger { inputs }))
    }

    fn create_mixer(&self) -> NodeId {
        self.graph.lock().add(NodeKind::Mixer)
    }

    fn create_analyser(&self, fft_size: usize) -> Result<NodeId> {
        validate_fft_size(fft_size)?;
        Ok(self.graph.lock().add(NodeKind::analyser(fft_size)))
    }

    fn connect(&self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<()> {
        self.graph.lock().connect(from, output, to, input)
    }

    fn disconnect(&self, node: NodeId) -> Result<()> {
        self.graph.lock().disconnect(node)
    }

    fn start_source(
        &self,
        source: NodeId,
        when: f64,
        offset: f64,
        duration: Option<f64>,
    ) -> Result<()> {
        self.graph.lock().source_mut(source)?.start(when, offset, duration)
    }

    fn stop_source(&self, source: NodeId) -> Result<()> {
        self.graph.lock().source_mut(source)?.stop()
    }

    fn set_playback_rate(&self, source: NodeId, rate: f32) -> Result<()> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(RetrogradeError::InvalidParameter {
                name: "playback_rate",
                reason: format!("engine sources cannot play at rate {}", rate),
            });
        }
        self.graph.lock().source_mut(source)?.set_playback_rate(rate);
        Ok(())
    }

    fn set_detune(&self, source: NodeId, cents: f32) -> Result<()> {
        if !cents.is_finite() {
            return Err(RetrogradeError::InvalidParameter {
                name: "detune",
                reason: format!("must be finite, got {}", cents),
            });
        }
        self.graph.lock().source_mut(source)?.set_detune(cents);
        Ok(())
    }

    fn set_onended(&self, source: NodeId, handler: Option<EndedHandler>) -> Result<()> {
        self.graph.lock().source_mut(source)?.set_onended(handler);
        Ok(())
    }

    fn get_float_time_domain_data(&self, analyser: NodeId, out: &mut [f32]) -> Result<()> {
        self.graph.lock().analyser(analyser)?.copy_recent(out);
        Ok(())
    }

    fn release(&self, node: NodeId) -> Result<()> {
        self.graph.lock().remove(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mono_ramp(len: usize, sample_rate: u32) -> Arc<AudioBuffer> {
        let ramp = (0..len).map(|i| i as f32 / len as f32).collect();
        Arc::new(AudioBuffer::from_channels(vec![ramp], sample_rate).unwrap())
    }

    #[test]
    fn test_config_defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 2);

        let parsed: RenderConfig = serde_json::from_str(r#"{"sample_rate": 8000}"#).unwrap();
        assert_eq!(parsed, RenderConfig::new(8000, 2));
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(OfflineContext::new(RenderConfig::new(0, 2)).is_err());
        assert!(OfflineContext::new(RenderConfig::new(48000, 0)).is_err());
    }

    #[test]
    fn test_render_rounds_up_to_quanta() {
        let ctx = OfflineContext::new(RenderConfig::new(8000, 2)).unwrap();
        let out = ctx.render(200).unwrap();
        assert_eq!(out.len(), 256);
        assert_eq!(out.num_channels(), 2);
        assert_eq!(ctx.frames_rendered(), 256);
        assert_abs_diff_eq!(ctx.current_time(), 256.0 / 8000.0);
    }

    #[test]
    fn test_mono_source_is_upmixed_to_destination() {
        let ctx = OfflineContext::new(RenderConfig::new(1000, 2)).unwrap();
        let source = ctx.create_buffer_source(mono_ramp(1000, 1000));
        ctx.connect(source, 0, ctx.destination(), 0).unwrap();
        ctx.start_source(source, 0.0, 0.0, None).unwrap();

        let out = ctx.render_quanta(1).unwrap();
        assert_abs_diff_eq!(out.channel(0)[10], 0.01);
        assert_abs_diff_eq!(out.channel(1)[10], 0.01);
    }

    #[test]
    fn test_source_at_other_sample_rate_is_rate_compensated() {
        let ctx = OfflineContext::new(RenderConfig::new(1000, 1)).unwrap();
        let source = ctx.create_buffer_source(mono_ramp(2000, 2000));
        ctx.connect(source, 0, ctx.destination(), 0).unwrap();
        ctx.start_source(source, 0.0, 0.0, None).unwrap();

        let out = ctx.render_quanta(1).unwrap();
        // One context frame consumes two buffer frames
        assert_abs_diff_eq!(out.channel(0)[10], 20.0 / 2000.0);
    }

    #[test]
    fn test_ended_handler_may_reenter_context() {
        let ctx = OfflineContext::shared(RenderConfig::new(1000, 1)).unwrap();
        let source = ctx.create_buffer_source(mono_ramp(64, 1000));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let inner = Arc::clone(&ctx);
        ctx.set_onended(
            source,
            Some(Box::new(move || {
                // Would deadlock if the graph were still locked
                let _ = inner.current_time();
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
        ctx.start_source(source, 0.0, 0.0, None).unwrap();

        ctx.render_quanta(3).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rate_validation() {
        let ctx = OfflineContext::new(RenderConfig::default()).unwrap();
        let source = ctx.create_buffer_source(mono_ramp(16, 48000));
        assert!(ctx.set_playback_rate(source, -1.0).is_err());
        assert!(ctx.set_playback_rate(source, f32::NAN).is_err());
        assert!(ctx.set_detune(source, f32::INFINITY).is_err());
        assert!(ctx.set_playback_rate(source, 0.5).is_ok());
    }

    #[test]
    fn test_wrong_node_kind_and_released_nodes() {
        let ctx = OfflineContext::new(RenderConfig::default()).unwrap();
        let mixer = ctx.create_mixer();
        assert!(ctx.start_source(mixer, 0.0, 0.0, None).is_err());

        let mut holder = [0.0_f32];
        assert!(ctx.get_float_time_domain_data(mixer, &mut holder).is_err());

        ctx.release(mixer).unwrap();
        let err = ctx.connect(mixer, 0, ctx.destination(), 0).unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_NODE");
    }

    #[test]
    fn test_analyser_sees_latest_sample() {
        let ctx = OfflineContext::new(RenderConfig::new(1000, 1)).unwrap();
        let source = ctx.create_buffer_source(mono_ramp(1000, 1000));
        let analyser = ctx.create_analyser(256).unwrap();
        ctx.connect(source, 0, analyser, 0).unwrap();
        ctx.start_source(source, 0.0, 0.0, None).unwrap();

        ctx.render_quanta(2).unwrap();
        let mut holder = [0.0_f32; 1];
        ctx.get_float_time_domain_data(analyser, &mut holder).unwrap();
        assert_abs_diff_eq!(holder[0], 255.0 / 1000.0);
    }
}
