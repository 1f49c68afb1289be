//! Playback Position Node
//!
//! Wraps a one-shot buffer source so its playback position can be read back.
//! The assigned buffer is augmented with a ramp channel (see
//! [`encoder`](crate::playback::encoder)); while playing, the ramp is routed
//! to an analyser tap and never to the audible output:
//!
//! ```text
//! source ──► splitter ──┬─ ch 0..n ──► out (merger) ──► downstream
//!                       └─ ch n ─────► analyser (position tap)
//! ```
//!
//! Buffer sources rewind their bookkeeping when they finish, so the tap reads
//! zero after a completed play. Completion is therefore tracked explicitly
//! and reported as position `1.0`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::buffer::AudioBuffer;
use crate::engine::context::{EndedHandler, NodeId, RenderContext, MAX_CHANNELS};
use crate::error::{Result, RetrogradeError};
use crate::playback::encoder::encode_position_channel;
use crate::playback::options::{ensure_finite, PlaybackOptions};

/// Callback fired when a session plays to the end of its buffer
pub type CompletionHandler = Box<dyn FnMut() + Send>;

/// Bookkeeping shared with the engine's ended handler
#[derive(Debug, Default)]
struct SessionState {
    /// Incremented for every started session; stale handlers compare against it
    generation: u64,
    has_started: bool,
    is_playing: bool,
    has_completed: bool,
    /// Current session was ended by `stop`, not by reaching the end
    stopped: bool,
    /// Context time the current session begins at; the tap only reflects
    /// the session once rendering has passed it
    started_at: f64,
    /// Position the current session was started from
    start_position: f64,
}

/// A replaceable callback that can be fired without holding its lock
pub(crate) struct HandlerSlot<H> {
    handler: Option<H>,
    /// Bumped on every replacement so a running handler is not restored over a newer one
    version: u64,
}

impl<H> Default for HandlerSlot<H> {
    fn default() -> Self {
        Self {
            handler: None,
            version: 0,
        }
    }
}

impl<H> HandlerSlot<H> {
    pub(crate) fn replace(&mut self, handler: Option<H>) {
        self.handler = handler;
        self.version += 1;
    }
}

/// Take the handler out of `slot`, run `call` on it unlocked, then put it back
/// unless it was replaced in the meantime
pub(crate) fn fire_handler<H>(slot: &Mutex<HandlerSlot<H>>, call: impl FnOnce(&mut H)) {
    let (taken, version) = {
        let mut slot = slot.lock();
        (slot.handler.take(), slot.version)
    };
    if let Some(mut handler) = taken {
        call(&mut handler);
        let mut slot = slot.lock();
        if slot.version == version {
            slot.handler = Some(handler);
        }
    }
}

/// A buffer source whose normalized playback position can be recovered
pub struct PlaybackPositionNode {
    context: Arc<dyn RenderContext>,
    splitter: NodeId,
    out: NodeId,
    analyser: NodeId,
    /// Augmented buffer (original channels plus the ramp)
    buffer: Option<Arc<AudioBuffer>>,
    raw_channels: usize,
    source: Option<NodeId>,
    options: PlaybackOptions,
    session: Arc<Mutex<SessionState>>,
    onended: Arc<Mutex<HandlerSlot<CompletionHandler>>>,
}

impl PlaybackPositionNode {
    /// Create the node and its permanent splitter, output merger and analyser
    ///
    /// # Errors
    /// `InvalidParameter` for a negative or non-finite rate, a non-finite
    /// detune, or an analyser window the context rejects.
    pub fn new(context: Arc<dyn RenderContext>, options: PlaybackOptions) -> Result<Self> {
        validate_rate(options.playback_rate)?;
        ensure_finite("detune", options.detune)?;

        let analyser = context.create_analyser(options.fft_size)?;
        let splitter = match context.create_channel_splitter(MAX_CHANNELS) {
            Ok(node) => node,
            Err(e) => {
                release_all(context.as_ref(), &[analyser]);
                return Err(e);
            }
        };
        let out = match context.create_channel_merger(MAX_CHANNELS) {
            Ok(node) => node,
            Err(e) => {
                release_all(context.as_ref(), &[analyser, splitter]);
                return Err(e);
            }
        };

        Ok(Self {
            context,
            splitter,
            out,
            analyser,
            buffer: None,
            raw_channels: 0,
            source: None,
            options,
            session: Arc::new(Mutex::new(SessionState::default())),
            onended: Arc::new(Mutex::new(HandlerSlot::default())),
        })
    }

    /// Assign the buffer to play, replacing any previous one
    ///
    /// A running session is stopped first without firing the completion
    /// handler. Position reads `0.0` until the next start.
    pub fn set_signal(&mut self, signal: &AudioBuffer) -> Result<()> {
        let augmented = encode_position_channel(signal)?;
        self.assign_augmented(augmented)
    }

    /// Assign a buffer that already carries its trailing position channel
    ///
    /// Routing changes come first. If they fail, or the running session
    /// cannot be stopped, the previous routing, buffer and source are kept.
    pub(crate) fn assign_augmented(&mut self, augmented: AudioBuffer) -> Result<()> {
        let raw_channels = augmented.num_channels() - 1;
        let rewire = self.buffer.is_none() || raw_channels != self.raw_channels;
        if rewire {
            if let Err(e) = self.wire_channels(raw_channels) {
                self.restore_wiring();
                return Err(e);
            }
        }

        if let Err(e) = self.stop() {
            if rewire {
                self.restore_wiring();
            }
            return Err(e);
        }
        if let Some(previous) = self.source.take() {
            release_all(self.context.as_ref(), &[previous]);
        }

        tracing::debug!(
            channels = raw_channels,
            frames = augmented.len(),
            duration_secs = augmented.duration_secs(),
            "position node signal assigned"
        );

        self.buffer = Some(Arc::new(augmented));
        self.raw_channels = raw_channels;
        {
            let mut session = self.session.lock();
            session.has_started = false;
            session.has_completed = false;
        }
        Ok(())
    }

    /// Route audible channels to the output and the ramp to the analyser
    fn wire_channels(&self, raw_channels: usize) -> Result<()> {
        self.context.disconnect(self.splitter)?;
        for channel in 0..raw_channels {
            self.context
                .connect(self.splitter, channel, self.out, channel)?;
        }
        self.context
            .connect(self.splitter, raw_channels, self.analyser, 0)
    }

    /// Put back the routing of the current buffer after a failed rewire
    fn restore_wiring(&self) {
        if self.buffer.is_none() {
            return;
        }
        if let Err(e) = self.wire_channels(self.raw_channels) {
            tracing::warn!(error = %e, "failed to restore position node routing");
        }
    }

    /// Start playing from the beginning, now
    pub fn start(&mut self) -> Result<()> {
        self.start_at(0.0, 0.0, None)
    }

    /// Start a new session at context time `when`, `offset` seconds into the
    /// buffer, for at most `duration` seconds
    ///
    /// Only the latest session is tracked: a session that is still running is
    /// stopped once the new one has been scheduled.
    ///
    /// # Errors
    /// `NoSignal` if no buffer has been assigned. On any error the node's
    /// previous session is left untouched.
    pub fn start_at(&mut self, when: f64, offset: f64, duration: Option<f64>) -> Result<()> {
        let buffer = self.buffer.clone().ok_or(RetrogradeError::NoSignal {
            node: "PlaybackPositionNode",
        })?;

        let duration_secs = buffer.duration_secs();
        let source = self.context.create_buffer_source(buffer);
        let generation = self.session.lock().generation + 1;

        if let Err(e) = self.schedule(source, generation, when, offset, duration) {
            release_all(self.context.as_ref(), &[source]);
            return Err(e);
        }

        let started_at = self.context.current_time().max(when);
        let start_position = (offset / duration_secs).clamp(0.0, 1.0);

        let previous = self.source.replace(source);
        let was_playing = {
            let mut session = self.session.lock();
            let was_playing = session.is_playing;
            session.generation = generation;
            session.has_started = true;
            session.is_playing = true;
            session.has_completed = false;
            session.stopped = false;
            session.started_at = started_at;
            session.start_position = start_position;
            was_playing
        };

        if let Some(previous) = previous {
            if was_playing {
                if let Err(e) = self.context.stop_source(previous) {
                    tracing::warn!(error = %e, "failed to stop replaced session");
                }
            }
            release_all(self.context.as_ref(), &[previous]);
        }

        tracing::debug!(generation, when, offset, ?duration, "position node started");
        Ok(())
    }

    fn schedule(
        &self,
        source: NodeId,
        generation: u64,
        when: f64,
        offset: f64,
        duration: Option<f64>,
    ) -> Result<()> {
        self.context
            .set_playback_rate(source, self.options.playback_rate)?;
        self.context.set_detune(source, self.options.detune)?;
        self.context.connect(source, 0, self.splitter, 0)?;
        self.context
            .set_onended(source, Some(self.completion_hook(generation)))?;
        self.context.start_source(source, when, offset, duration)
    }

    /// Engine handler for one session: records natural completion and
    /// forwards it to the registered completion handler
    fn completion_hook(&self, generation: u64) -> EndedHandler {
        let session = Arc::clone(&self.session);
        let slot = Arc::clone(&self.onended);

        Box::new(move || {
            {
                let mut state = session.lock();
                if state.generation != generation || state.stopped {
                    return;
                }
                state.is_playing = false;
                state.has_completed = true;
            }
            tracing::debug!(generation, "position node played to completion");

            fire_handler(&slot, |handler| handler());
        })
    }

    /// Stop the running session
    ///
    /// Stopping a node that is not playing is a no-op. An explicit stop never
    /// fires the completion handler.
    pub fn stop(&mut self) -> Result<()> {
        if !self.session.lock().is_playing {
            return Ok(());
        }

        let source = self.source.ok_or(RetrogradeError::NoSession)?;
        {
            let mut session = self.session.lock();
            session.is_playing = false;
            session.stopped = true;
        }
        self.context.stop_source(source)?;

        tracing::debug!("position node stopped");
        Ok(())
    }

    /// Set the playback rate for the live session and every later one
    ///
    /// # Errors
    /// `InvalidParameter` for negative or non-finite rates.
    pub fn set_playback_rate(&mut self, rate: f32) -> Result<()> {
        validate_rate(rate)?;
        if let Some(source) = self.live_source() {
            self.context.set_playback_rate(source, rate)?;
        }
        self.options.playback_rate = rate;
        tracing::trace!(rate, "position node playback rate");
        Ok(())
    }

    /// Set the detune in cents for the live session and every later one
    pub fn set_detune(&mut self, cents: f32) -> Result<()> {
        ensure_finite("detune", cents)?;
        if let Some(source) = self.live_source() {
            self.context.set_detune(source, cents)?;
        }
        self.options.detune = cents;
        tracing::trace!(cents, "position node detune");
        Ok(())
    }

    /// Replace the handler fired on natural completion
    pub fn set_onended(&mut self, handler: Option<CompletionHandler>) {
        self.onended.lock().replace(handler);
    }

    /// Approximate fraction of the buffer played, in `[0, 1]`
    ///
    /// `0.0` before the first start and `1.0` once a session completed
    /// naturally. Until the context has rendered past the session's start,
    /// the start offset as a fraction of the buffer. Otherwise the newest
    /// ramp sample seen by the analyser, which lags real playback by up to
    /// one render quantum.
    pub fn playback_position(&self) -> Result<f64> {
        let now = self.context.current_time();
        {
            let session = self.session.lock();
            if session.has_completed {
                return Ok(1.0);
            }
            if !session.has_started {
                return Ok(0.0);
            }
            // The tap still holds the previous session's samples
            if now <= session.started_at {
                return Ok(session.start_position);
            }
        }

        let mut holder = [0.0_f32; 1];
        self.context
            .get_float_time_domain_data(self.analyser, &mut holder)?;
        Ok((holder[0] as f64).clamp(0.0, 1.0))
    }

    /// Route the audible output into `input` of `destination`
    pub fn connect(&self, destination: NodeId, input: usize) -> Result<()> {
        self.context.connect(self.out, 0, destination, input)
    }

    /// Remove every connection from the audible output
    pub fn disconnect(&self) -> Result<()> {
        self.context.disconnect(self.out)
    }

    pub fn is_playing(&self) -> bool {
        self.session.lock().is_playing
    }

    /// True once the latest session played to the end of its buffer
    pub fn has_completed(&self) -> bool {
        self.session.lock().has_completed
    }

    pub fn has_signal(&self) -> bool {
        self.buffer.is_some()
    }

    /// Duration of the assigned buffer in seconds
    pub fn duration_secs(&self) -> Option<f64> {
        self.buffer.as_ref().map(|b| b.duration_secs())
    }

    /// The augmented buffer, including the trailing position channel
    pub fn augmented_buffer(&self) -> Option<&AudioBuffer> {
        self.buffer.as_deref()
    }

    pub fn options(&self) -> PlaybackOptions {
        self.options
    }

    /// The output merger node
    pub fn output(&self) -> NodeId {
        self.out
    }

    fn live_source(&self) -> Option<NodeId> {
        if self.session.lock().is_playing {
            self.source
        } else {
            None
        }
    }
}

impl Drop for PlaybackPositionNode {
    fn drop(&mut self) {
        self.session.lock().stopped = true;

        let mut nodes = vec![self.splitter, self.out, self.analyser];
        nodes.extend(self.source.take());
        release_all(self.context.as_ref(), &nodes);
    }
}

fn validate_rate(rate: f32) -> Result<()> {
    ensure_finite("playback_rate", rate)?;
    if rate < 0.0 {
        return Err(RetrogradeError::InvalidParameter {
            name: "playback_rate",
            reason: format!("position nodes only play forward, got {}", rate),
        });
    }
    Ok(())
}

fn release_all(context: &dyn RenderContext, nodes: &[NodeId]) {
    for &node in nodes {
        if let Err(e) = context.release(node) {
            tracing::warn!(error = %e, ?node, "failed to release render node");
        }
    }
}
