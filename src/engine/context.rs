//! Render Context
//!
//! The capabilities Retrograde consumes from a real-time audio rendering
//! engine: forward-only, non-seekable buffer sources with no position query,
//! channel split/merge, a summing mixer, an analyser tap that exposes recent
//! samples, and node wiring.
//!
//! [`OfflineContext`](crate::engine::OfflineContext) is the in-process
//! implementation; other engines plug in by implementing [`RenderContext`].

use std::sync::Arc;

use slotmap::new_key_type;

use crate::engine::buffer::AudioBuffer;
use crate::error::Result;

/// Frames processed per render quantum
pub const RENDER_QUANTUM_SIZE: usize = 128;

/// Maximum channel count for splitters, mergers and buffers
pub const MAX_CHANNELS: usize = 32;

/// Default analyser window in frames
pub const DEFAULT_FFT_SIZE: usize = 2048;

new_key_type! {
    /// Handle to a node owned by a render context
    pub struct NodeId;
}

/// Callback fired once when a buffer source ends, naturally or by `stop_source`
pub type EndedHandler = Box<dyn FnOnce() + Send>;

/// Host audio engine capabilities
///
/// All methods take `&self` and return immediately; sample production happens
/// on the engine's own schedule. Implementations must invoke ended handlers
/// without holding internal locks so a handler may call back into the context.
pub trait RenderContext: Send + Sync {
    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Seconds of audio rendered so far
    fn current_time(&self) -> f64;

    /// The final node whose output is heard
    fn destination(&self) -> NodeId;

    /// Create a one-shot source bound to `buffer`
    fn create_buffer_source(&self, buffer: Arc<AudioBuffer>) -> NodeId;

    /// Create a node whose output `k` carries input channel `k`
    fn create_channel_splitter(&self, outputs: usize) -> Result<NodeId>;

    /// Create a node whose input `k` becomes output channel `k`
    fn create_channel_merger(&self, inputs: usize) -> Result<NodeId>;

    /// Create a channel-preserving summing junction
    fn create_mixer(&self) -> NodeId;

    /// Create an analyser keeping the most recent `fft_size` frames
    fn create_analyser(&self, fft_size: usize) -> Result<NodeId>;

    /// Route `output` of `from` into `input` of `to`; repeated calls are no-ops
    fn connect(&self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<()>;

    /// Remove every outgoing connection of `node`
    fn disconnect(&self, node: NodeId) -> Result<()>;

    /// Schedule a source at context time `when`, reading from `offset` seconds
    /// into its buffer for at most `duration` seconds
    ///
    /// A source can only be started once.
    fn start_source(
        &self,
        source: NodeId,
        when: f64,
        offset: f64,
        duration: Option<f64>,
    ) -> Result<()>;

    /// Stop a started source immediately; no-op if it already ended
    fn stop_source(&self, source: NodeId) -> Result<()>;

    /// Set a source's playback rate (must be non-negative)
    fn set_playback_rate(&self, source: NodeId, rate: f32) -> Result<()>;

    /// Set a source's detune in cents
    fn set_detune(&self, source: NodeId, cents: f32) -> Result<()>;

    /// Replace a source's ended handler
    fn set_onended(&self, source: NodeId, handler: Option<EndedHandler>) -> Result<()>;

    /// Fill `out` with the analyser's most recent `out.len()` samples, oldest first
    fn get_float_time_domain_data(&self, analyser: NodeId, out: &mut [f32]) -> Result<()>;

    /// Destroy a node together with its connections and pending handler
    fn release(&self, node: NodeId) -> Result<()>;
}
