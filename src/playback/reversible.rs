//! Reversible Source Node
//!
//! Simulates negative playback rates with two position nodes: one holding the
//! forward buffer, one holding its time-reversed twin. Both stay wired into a
//! shared mixer, so changing direction is a start/stop pair and never a
//! rewiring:
//!
//! ```text
//! forward unit ──┐
//!                ├──► out (mixer) ──► downstream
//! reverse unit ──┘
//! ```
//!
//! A switch reads the outgoing unit's recovered position `p` and starts the
//! incoming unit at the mirrored point `max(D - p * D, 0)`, where `D` is the
//! longer of the two buffer durations. The incoming unit is started before
//! the outgoing one is stopped, so the mixer is never left without a source.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::buffer::AudioBuffer;
use crate::engine::context::{NodeId, RenderContext};
use crate::error::{Result, RetrogradeError};
use crate::playback::encoder::encode_position_channel;
use crate::playback::options::{ensure_finite, PlaybackOptions};
use crate::playback::position::{fire_handler, HandlerSlot, PlaybackPositionNode};

/// Which buffer feeds the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// Direction requested by a signed playback rate
    pub fn from_rate(rate: f32) -> Self {
        if rate < 0.0 {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// Record of one hand-off between the two units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DirectionSwitch {
    pub from: Direction,
    pub to: Direction,
    /// Position recovered from the outgoing unit
    pub position: f64,
    /// Offset in seconds the incoming unit was started at
    pub offset: f64,
}

/// Offset into the opposite buffer equivalent to `position` in this one
///
/// ```
/// use retrograde::playback::mirrored_offset;
///
/// assert_eq!(mirrored_offset(10.0, 0.0), 10.0);
/// assert_eq!(mirrored_offset(10.0, 1.0), 0.0);
/// ```
pub fn mirrored_offset(max_duration: f64, position: f64) -> f64 {
    (max_duration - position * max_duration).max(0.0)
}

/// Callback fired when the active unit plays to its end, with the direction
/// that just finished
pub type DirectionEndedHandler = Box<dyn FnMut(Direction) + Send>;

/// A source whose playback rate may go negative
pub struct ReversibleSourceNode {
    context: Arc<dyn RenderContext>,
    forward: PlaybackPositionNode,
    reverse: PlaybackPositionNode,
    out: NodeId,
    max_duration: Option<f64>,
    direction: Direction,
    /// Between `start` and `stop`; switches only restart playback while set
    engaged: bool,
    onended: Arc<Mutex<HandlerSlot<DirectionEndedHandler>>>,
    last_switch: Option<DirectionSwitch>,
}

impl ReversibleSourceNode {
    /// Create both units and the shared output mixer
    ///
    /// A negative `options.playback_rate` selects reverse as the initial
    /// direction; the units receive its magnitude.
    pub fn new(context: Arc<dyn RenderContext>, options: PlaybackOptions) -> Result<Self> {
        ensure_finite("playback_rate", options.playback_rate)?;
        let direction = Direction::from_rate(options.playback_rate);
        let unit_options = options.with_playback_rate(options.playback_rate.abs());

        let forward = PlaybackPositionNode::new(Arc::clone(&context), unit_options)?;
        let reverse = PlaybackPositionNode::new(Arc::clone(&context), unit_options)?;

        let out = context.create_mixer();
        let wired = forward
            .connect(out, 0)
            .and_then(|()| reverse.connect(out, 0));
        if let Err(e) = wired {
            if let Err(release_err) = context.release(out) {
                tracing::warn!(error = %release_err, "failed to release output mixer");
            }
            return Err(e);
        }

        let mut node = Self {
            context,
            forward,
            reverse,
            out,
            max_duration: None,
            direction,
            engaged: false,
            onended: Arc::new(Mutex::new(HandlerSlot::default())),
            last_switch: None,
        };
        node.arm(direction);
        Ok(node)
    }

    /// Assign a track; its reverse is derived by mirroring every channel
    pub fn set_buffer(&mut self, buffer: &AudioBuffer) -> Result<()> {
        let reversed = buffer.reversed();
        self.set_buffers(buffer, &reversed)
    }

    /// Assign a forward track and a pre-reversed counterpart
    ///
    /// Both are encoded before either unit is touched, so an unusable buffer
    /// leaves the node as it was. Any running playback is stopped.
    pub fn set_buffers(&mut self, forward: &AudioBuffer, reverse: &AudioBuffer) -> Result<()> {
        let forward_augmented = encode_position_channel(forward)?;
        let reverse_augmented = encode_position_channel(reverse)?;

        self.forward.assign_augmented(forward_augmented)?;
        self.reverse.assign_augmented(reverse_augmented)?;

        let max_duration = forward.duration_secs().max(reverse.duration_secs());
        self.max_duration = Some(max_duration);
        self.engaged = false;
        self.last_switch = None;

        tracing::debug!(
            max_duration,
            forward_secs = forward.duration_secs(),
            reverse_secs = reverse.duration_secs(),
            "reversible node buffers assigned"
        );
        Ok(())
    }

    /// Set a signed playback rate
    ///
    /// The magnitude goes to both units. A sign that disagrees with the
    /// current direction triggers a switch.
    ///
    /// # Errors
    /// `NoSignal` before any buffer is assigned; `InvalidParameter` for
    /// non-finite rates.
    pub fn set_playback_rate(&mut self, rate: f32) -> Result<()> {
        ensure_finite("playback_rate", rate)?;
        let max_duration = self.require_buffers()?;

        let magnitude = rate.abs();
        self.forward.set_playback_rate(magnitude)?;
        self.reverse.set_playback_rate(magnitude)?;

        let requested = Direction::from_rate(rate);
        if requested != self.direction {
            self.switch_to(requested, max_duration)?;
        }
        Ok(())
    }

    /// Switch direction without changing the rate magnitude
    pub fn set_direction(&mut self, direction: Direction) -> Result<()> {
        let max_duration = self.require_buffers()?;
        if direction != self.direction {
            self.switch_to(direction, max_duration)?;
        }
        Ok(())
    }

    fn switch_to(&mut self, target: Direction, max_duration: f64) -> Result<()> {
        let from = self.direction;

        if !self.engaged {
            self.arm(target);
            self.direction = target;
            tracing::debug!(%from, to = %target, "direction changed while idle");
            return Ok(());
        }

        let position = self.unit(from).playback_position()?;
        let offset = mirrored_offset(max_duration, position);

        self.arm(target);
        if let Err(e) = self.unit_mut(target).start_at(0.0, offset, None) {
            self.arm(from);
            return Err(e);
        }

        self.direction = target;
        self.last_switch = Some(DirectionSwitch {
            from,
            to: target,
            position,
            offset,
        });

        // The outgoing unit is already marked stopped and its hook disarmed
        if let Err(e) = self.unit_mut(from).stop() {
            tracing::warn!(error = %e, %from, "failed to stop outgoing unit");
        }

        tracing::debug!(%from, to = %target, position, offset, "direction switched");
        Ok(())
    }

    /// Point the completion hook at `active` and clear it on the other unit
    fn arm(&mut self, active: Direction) {
        let slot = Arc::clone(&self.onended);
        self.unit_mut(active).set_onended(Some(Box::new(move || {
            fire_handler(&slot, |handler| handler(active));
        })));
        self.unit_mut(active.opposite()).set_onended(None);
    }

    /// Start the active unit from the beginning
    pub fn start(&mut self) -> Result<()> {
        self.require_buffers()?;
        let active = self.direction;

        self.unit_mut(active).start()?;
        self.unit_mut(active.opposite()).stop()?;
        self.engaged = true;

        tracing::debug!(direction = %active, "reversible node started");
        Ok(())
    }

    /// Stop whichever unit is active; a no-op when nothing plays
    pub fn stop(&mut self) -> Result<()> {
        let active = self.direction;
        self.unit_mut(active).stop()?;
        self.engaged = false;
        Ok(())
    }

    /// Set the detune of both units
    pub fn set_detune(&mut self, cents: f32) -> Result<()> {
        ensure_finite("detune", cents)?;
        self.forward.set_detune(cents)?;
        self.reverse.set_detune(cents)
    }

    /// Replace the end-of-playback handler
    pub fn set_onended(&mut self, handler: Option<DirectionEndedHandler>) {
        self.onended.lock().replace(handler);
    }

    /// Recovered position of the active unit on its own buffer
    pub fn playback_position(&self) -> Result<f64> {
        self.unit(self.direction).playback_position()
    }

    pub fn connect(&self, destination: NodeId, input: usize) -> Result<()> {
        self.context.connect(self.out, 0, destination, input)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.context.disconnect(self.out)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Longer of the two buffer durations, once assigned
    pub fn max_duration(&self) -> Option<f64> {
        self.max_duration
    }

    pub fn is_playing(&self) -> bool {
        self.unit(self.direction).is_playing()
    }

    pub fn last_switch(&self) -> Option<DirectionSwitch> {
        self.last_switch
    }

    pub fn forward(&self) -> &PlaybackPositionNode {
        &self.forward
    }

    pub fn reverse(&self) -> &PlaybackPositionNode {
        &self.reverse
    }

    /// The shared output mixer node
    pub fn output(&self) -> NodeId {
        self.out
    }

    fn require_buffers(&self) -> Result<f64> {
        self.max_duration.ok_or(RetrogradeError::NoSignal {
            node: "ReversibleSourceNode",
        })
    }

    fn unit(&self, direction: Direction) -> &PlaybackPositionNode {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Reverse => &self.reverse,
        }
    }

    fn unit_mut(&mut self, direction: Direction) -> &mut PlaybackPositionNode {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Reverse => &mut self.reverse,
        }
    }
}

impl Drop for ReversibleSourceNode {
    fn drop(&mut self) {
        if let Err(e) = self.context.release(self.out) {
            tracing::warn!(error = %e, "failed to release output mixer");
        }
    }
}
