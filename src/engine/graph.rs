//! Render graph for the offline context
//!
//! Nodes are processed once per render quantum in topological order. Each
//! node output is a bus: one `Vec<f32>` of [`RENDER_QUANTUM_SIZE`] frames per
//! channel. Multiple connections into the same input are summed.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use slotmap::{SecondaryMap, SlotMap};

use crate::engine::buffer::AudioBuffer;
use crate::engine::context::{EndedHandler, NodeId, MAX_CHANNELS, RENDER_QUANTUM_SIZE};
use crate::error::{Result, RetrogradeError};

/// One quantum of multi-channel audio
pub(crate) type Bus = Vec<Vec<f32>>;

fn silent_bus(channels: usize) -> Bus {
    vec![vec![0.0; RENDER_QUANTUM_SIZE]; channels]
}

/// Sum `from` into `into`, widening `into` to the larger channel count.
/// Mono signals are spread across every channel.
fn accumulate(into: &mut Bus, from: &Bus) {
    if into.is_empty() {
        into.extend(from.iter().cloned());
        return;
    }

    if from.len() > into.len() {
        let fill = if into.len() == 1 { into[0].clone() } else { vec![0.0; RENDER_QUANTUM_SIZE] };
        into.resize(from.len(), fill);
    }

    if from.len() == 1 {
        for channel in into.iter_mut() {
            for (dst, src) in channel.iter_mut().zip(&from[0]) {
                *dst += src;
            }
        }
    } else {
        for (channel, src_channel) in into.iter_mut().zip(from) {
            for (dst, src) in channel.iter_mut().zip(src_channel) {
                *dst += src;
            }
        }
    }
}

/// Average all channels of a bus into one
fn downmix(bus: &Bus) -> Vec<f32> {
    let mut mono = vec![0.0; RENDER_QUANTUM_SIZE];
    if bus.is_empty() {
        return mono;
    }

    let scale = 1.0 / bus.len() as f32;
    for channel in bus {
        for (dst, src) in mono.iter_mut().zip(channel) {
            *dst += src * scale;
        }
    }
    mono
}

// ============================================================================
// Connections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Connection {
    pub from: NodeId,
    pub output: usize,
    pub to: NodeId,
    pub input: usize,
}

// ============================================================================
// Buffer Source
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum SourcePhase {
    Unscheduled,
    Scheduled { when: f64 },
    Playing,
    Ended,
}

/// One-shot buffer playback with rate and detune
pub(crate) struct BufferSource {
    buffer: Arc<AudioBuffer>,
    playback_rate: f32,
    detune: f32,
    phase: SourcePhase,
    /// Read position in buffer frames
    playhead: f64,
    /// Frame at which playback ends naturally
    end_frame: f64,
    stop_requested: bool,
    onended: Option<EndedHandler>,
}

impl fmt::Debug for BufferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSource")
            .field("channels", &self.buffer.num_channels())
            .field("frames", &self.buffer.len())
            .field("playback_rate", &self.playback_rate)
            .field("detune", &self.detune)
            .field("phase", &self.phase)
            .field("playhead", &self.playhead)
            .finish_non_exhaustive()
    }
}

impl BufferSource {
    fn new(buffer: Arc<AudioBuffer>) -> Self {
        Self {
            buffer,
            playback_rate: 1.0,
            detune: 0.0,
            phase: SourcePhase::Unscheduled,
            playhead: 0.0,
            end_frame: 0.0,
            stop_requested: false,
            onended: None,
        }
    }

    pub(crate) fn start(&mut self, when: f64, offset: f64, duration: Option<f64>) -> Result<()> {
        if self.phase != SourcePhase::Unscheduled {
            return Err(RetrogradeError::InvalidNodeState {
                reason: "buffer source can only be started once".to_string(),
            });
        }

        if !when.is_finite() || when < 0.0 {
            return Err(invalid("when", format!("must be a non-negative time, got {}", when)));
        }
        if !offset.is_finite() || offset < 0.0 {
            return Err(invalid("offset", format!("must be non-negative, got {}", offset)));
        }
        if let Some(d) = duration {
            if !d.is_finite() || d < 0.0 {
                return Err(invalid("duration", format!("must be non-negative, got {}", d)));
            }
        }

        let rate = self.buffer.sample_rate() as f64;
        let len = self.buffer.len() as f64;
        self.playhead = (offset * rate).min(len);
        self.end_frame = match duration {
            Some(d) => ((offset + d) * rate).min(len),
            None => len,
        };
        self.phase = SourcePhase::Scheduled { when };
        Ok(())
    }

    pub(crate) fn stop(&mut self) -> Result<()> {
        match self.phase {
            SourcePhase::Unscheduled => Err(RetrogradeError::InvalidNodeState {
                reason: "cannot stop a buffer source that was never started".to_string(),
            }),
            SourcePhase::Ended => Ok(()),
            _ => {
                self.stop_requested = true;
                Ok(())
            }
        }
    }

    pub(crate) fn set_playback_rate(&mut self, rate: f32) {
        self.playback_rate = rate;
    }

    pub(crate) fn set_detune(&mut self, cents: f32) {
        self.detune = cents;
    }

    pub(crate) fn set_onended(&mut self, handler: Option<EndedHandler>) {
        self.onended = handler;
    }

    fn finish(&mut self, ended: &mut Vec<EndedHandler>) {
        self.phase = SourcePhase::Ended;
        if let Some(handler) = self.onended.take() {
            ended.push(handler);
        }
    }

    fn render(&mut self, start_frame: u64, sample_rate: u32, ended: &mut Vec<EndedHandler>) -> Bus {
        let mut out = silent_bus(self.buffer.num_channels());

        if self.stop_requested
            && matches!(self.phase, SourcePhase::Scheduled { .. } | SourcePhase::Playing)
        {
            self.finish(ended);
            return out;
        }

        let step = self.playback_rate as f64
            * 2f64.powf(self.detune as f64 / 1200.0)
            * self.buffer.sample_rate() as f64
            / sample_rate as f64;

        for i in 0..RENDER_QUANTUM_SIZE {
            match self.phase {
                SourcePhase::Unscheduled | SourcePhase::Ended => break,
                SourcePhase::Scheduled { when } => {
                    let t = (start_frame + i as u64) as f64 / sample_rate as f64;
                    if t < when {
                        continue;
                    }
                    self.phase = SourcePhase::Playing;
                }
                SourcePhase::Playing => {}
            }

            if self.playhead >= self.end_frame {
                self.finish(ended);
                break;
            }

            let index = self.playhead.floor() as usize;
            let frac = (self.playhead - index as f64) as f32;
            for (ch, data) in self.buffer.channels().enumerate() {
                let s0 = data[index];
                let s1 = data.get(index + 1).copied().unwrap_or(s0);
                out[ch][i] = s0 + (s1 - s0) * frac;
            }

            self.playhead += step;
        }

        out
    }
}

// ============================================================================
// Analyser
// ============================================================================

/// Keeps the most recent `fft_size` mono frames of its input
#[derive(Debug)]
pub(crate) struct Analyser {
    history: VecDeque<f32>,
}

impl Analyser {
    fn new(fft_size: usize) -> Self {
        Self {
            history: std::iter::repeat(0.0).take(fft_size).collect(),
        }
    }

    fn push(&mut self, samples: &[f32]) {
        for &s in samples {
            self.history.pop_front();
            self.history.push_back(s);
        }
    }

    pub(crate) fn copy_recent(&self, out: &mut [f32]) {
        let len = self.history.len();
        let start = len as isize - out.len() as isize;
        for (j, slot) in out.iter_mut().enumerate() {
            let idx = start + j as isize;
            *slot = if idx < 0 { 0.0 } else { self.history[idx as usize] };
        }
    }
}

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug)]
pub(crate) enum NodeKind {
    Destination { channels: usize },
    BufferSource(BufferSource),
    Splitter { outputs: usize },
    Merger { inputs: usize },
    Mixer,
    Analyser(Analyser),
}

impl NodeKind {
    pub(crate) fn source(buffer: Arc<AudioBuffer>) -> Self {
        NodeKind::BufferSource(BufferSource::new(buffer))
    }

    pub(crate) fn analyser(fft_size: usize) -> Self {
        NodeKind::Analyser(Analyser::new(fft_size))
    }

    fn num_inputs(&self) -> usize {
        match self {
            NodeKind::BufferSource(_) => 0,
            NodeKind::Merger { inputs } => *inputs,
            _ => 1,
        }
    }

    fn num_outputs(&self) -> usize {
        match self {
            NodeKind::Destination { .. } => 0,
            NodeKind::Splitter { outputs } => *outputs,
            _ => 1,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            NodeKind::Destination { .. } => "destination",
            NodeKind::BufferSource(_) => "buffer source",
            NodeKind::Splitter { .. } => "channel splitter",
            NodeKind::Merger { .. } => "channel merger",
            NodeKind::Mixer => "mixer",
            NodeKind::Analyser(_) => "analyser",
        }
    }
}

fn invalid(name: &'static str, reason: String) -> RetrogradeError {
    RetrogradeError::InvalidParameter { name, reason }
}

pub(crate) fn validate_channel_count(name: &'static str, count: usize) -> Result<()> {
    if count == 0 || count > MAX_CHANNELS {
        return Err(invalid(
            name,
            format!("must be between 1 and {}, got {}", MAX_CHANNELS, count),
        ));
    }
    Ok(())
}

pub(crate) fn validate_fft_size(fft_size: usize) -> Result<()> {
    if !fft_size.is_power_of_two() || !(32..=32768).contains(&fft_size) {
        return Err(invalid(
            "fft_size",
            format!("must be a power of two between 32 and 32768, got {}", fft_size),
        ));
    }
    Ok(())
}

// ============================================================================
// Render Graph
// ============================================================================

pub(crate) struct RenderGraph {
    sample_rate: u32,
    nodes: SlotMap<NodeId, NodeKind>,
    connections: Vec<Connection>,
    processing_order: Vec<NodeId>,
    outputs: SecondaryMap<NodeId, Vec<Bus>>,
    destination: NodeId,
    frames_rendered: u64,
    dirty: bool,
}

impl RenderGraph {
    pub(crate) fn new(sample_rate: u32, channels: usize) -> Self {
        let mut nodes = SlotMap::with_key();
        let destination = nodes.insert(NodeKind::Destination { channels });

        Self {
            sample_rate,
            nodes,
            connections: Vec::new(),
            processing_order: Vec::new(),
            outputs: SecondaryMap::new(),
            destination,
            frames_rendered: 0,
            dirty: true,
        }
    }

    pub(crate) fn destination(&self) -> NodeId {
        self.destination
    }

    pub(crate) fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub(crate) fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub(crate) fn add(&mut self, kind: NodeKind) -> NodeId {
        self.dirty = true;
        self.nodes.insert(kind)
    }

    fn node(&self, id: NodeId) -> Result<&NodeKind> {
        self.nodes.get(id).ok_or_else(|| unknown(id))
    }

    pub(crate) fn source_mut(&mut self, id: NodeId) -> Result<&mut BufferSource> {
        match self.nodes.get_mut(id) {
            Some(NodeKind::BufferSource(source)) => Ok(source),
            Some(other) => Err(RetrogradeError::InvalidNodeState {
                reason: format!("{:?} is a {}, not a buffer source", id, other.label()),
            }),
            None => Err(unknown(id)),
        }
    }

    pub(crate) fn analyser(&self, id: NodeId) -> Result<&Analyser> {
        match self.node(id)? {
            NodeKind::Analyser(analyser) => Ok(analyser),
            other => Err(RetrogradeError::InvalidNodeState {
                reason: format!("{:?} is a {}, not an analyser", id, other.label()),
            }),
        }
    }

    pub(crate) fn connect(&mut self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<()> {
        if from == to {
            return Err(RetrogradeError::InvalidConnection {
                reason: format!("{:?} cannot feed itself", from),
            });
        }

        let source = self.node(from)?;
        if output >= source.num_outputs() {
            return Err(RetrogradeError::InvalidConnection {
                reason: format!("{} has no output {}", source.label(), output),
            });
        }

        let target = self.node(to)?;
        if input >= target.num_inputs() {
            return Err(RetrogradeError::InvalidConnection {
                reason: format!("{} has no input {}", target.label(), input),
            });
        }

        let connection = Connection {
            from,
            output,
            to,
            input,
        };
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
            self.dirty = true;
        }
        Ok(())
    }

    pub(crate) fn disconnect(&mut self, node: NodeId) -> Result<()> {
        self.node(node)?;
        self.connections.retain(|c| c.from != node);
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn remove(&mut self, node: NodeId) -> Result<()> {
        if node == self.destination {
            return Err(RetrogradeError::InvalidNodeState {
                reason: "the destination cannot be released".to_string(),
            });
        }

        self.nodes.remove(node).ok_or_else(|| unknown(node))?;
        self.connections.retain(|c| c.from != node && c.to != node);
        self.outputs.remove(node);
        self.dirty = true;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Recalculate processing order using a depth-first topological sort
    fn update_processing_order(&mut self) {
        if !self.dirty {
            return;
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut state: HashMap<NodeId, bool> = HashMap::new();

        for id in self.nodes.keys() {
            self.visit(id, &mut state, &mut order);
        }

        order.reverse();
        self.processing_order = order;
        self.dirty = false;
    }

    /// `state[id]` is false while `id` is on the DFS stack, true once finished
    fn visit(&self, id: NodeId, state: &mut HashMap<NodeId, bool>, order: &mut Vec<NodeId>) {
        if state.contains_key(&id) {
            // Finished, or a cycle back onto the stack
            return;
        }
        state.insert(id, false);

        for conn in self.connections.iter().filter(|c| c.from == id) {
            self.visit(conn.to, state, order);
        }

        state.insert(id, true);
        order.push(id);
    }

    /// Gather every input port of `id`; unconnected ports yield an empty bus
    fn gather_inputs(&self, id: NodeId, num_inputs: usize) -> Vec<Bus> {
        let mut inputs: Vec<Bus> = vec![Vec::new(); num_inputs];
        for conn in self.connections.iter().filter(|c| c.to == id) {
            if let Some(bus) = self
                .outputs
                .get(conn.from)
                .and_then(|outs| outs.get(conn.output))
            {
                accumulate(&mut inputs[conn.input], bus);
            }
        }
        inputs
    }

    /// Process one render quantum and return the destination's output.
    /// Handlers of sources that ended during the quantum are appended to `ended`.
    pub(crate) fn process_quantum(&mut self, ended: &mut Vec<EndedHandler>) -> Bus {
        self.update_processing_order();

        let start_frame = self.frames_rendered;
        let sample_rate = self.sample_rate;
        let mut rendered = Bus::new();

        for idx in 0..self.processing_order.len() {
            let id = self.processing_order[idx];
            let num_inputs = match self.nodes.get(id) {
                Some(node) => node.num_inputs(),
                None => continue,
            };

            let inputs = self.gather_inputs(id, num_inputs);
            let highest_connected = self
                .connections
                .iter()
                .filter(|c| c.to == id)
                .map(|c| c.input)
                .max();

            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };

            let outputs: Vec<Bus> = match node {
                NodeKind::Destination { channels } => {
                    let input = &inputs[0];
                    rendered = (0..*channels)
                        .map(|ch| match input.len() {
                            0 => vec![0.0; RENDER_QUANTUM_SIZE],
                            1 => input[0].clone(),
                            _ => input
                                .get(ch)
                                .cloned()
                                .unwrap_or_else(|| vec![0.0; RENDER_QUANTUM_SIZE]),
                        })
                        .collect();
                    Vec::new()
                }
                NodeKind::BufferSource(source) => {
                    vec![source.render(start_frame, sample_rate, ended)]
                }
                NodeKind::Splitter { outputs } => (0..*outputs)
                    .map(|k| {
                        vec![inputs[0]
                            .get(k)
                            .cloned()
                            .unwrap_or_else(|| vec![0.0; RENDER_QUANTUM_SIZE])]
                    })
                    .collect(),
                NodeKind::Merger { .. } => {
                    let width = highest_connected.map_or(1, |k| k + 1);
                    vec![inputs.iter().take(width).map(downmix).collect()]
                }
                NodeKind::Mixer => {
                    let input = inputs.into_iter().next().unwrap_or_default();
                    if input.is_empty() {
                        vec![silent_bus(1)]
                    } else {
                        vec![input]
                    }
                }
                NodeKind::Analyser(analyser) => {
                    let mono = downmix(&inputs[0]);
                    analyser.push(&mono);
                    vec![vec![mono]]
                }
            };

            self.outputs.insert(id, outputs);
        }

        self.frames_rendered += RENDER_QUANTUM_SIZE as u64;
        rendered
    }
}

fn unknown(id: NodeId) -> RetrogradeError {
    RetrogradeError::UnknownNode {
        node: format!("{:?}", id),
    }
}
