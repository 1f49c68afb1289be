//! Shared test helpers
//!
//! `RecordingContext` is a [`RenderContext`] that produces no audio. It logs
//! every control call so tests can check exact offsets and call order, lets
//! tests choose what each analyser tap reads, and fires ended handlers on
//! demand. Time only moves when a test calls `advance`.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::SlotMap;

use retrograde::engine::{AudioBuffer, EndedHandler, NodeId, RenderContext};
use retrograde::error::{Result, RetrogradeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Destination,
    Source,
    Splitter,
    Merger,
    Mixer,
    Analyser,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create { id: NodeId, kind: Kind },
    Connect { from: NodeId, output: usize, to: NodeId, input: usize },
    Disconnect { node: NodeId },
    Start { source: NodeId, when: f64, offset: f64, duration: Option<f64> },
    Stop { source: NodeId },
    SetRate { source: NodeId, rate: f32 },
    SetDetune { source: NodeId, cents: f32 },
    Release { node: NodeId },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Started,
    Ended,
}

struct MockNode {
    kind: Kind,
    phase: Phase,
    tap: f32,
    onended: Option<EndedHandler>,
}

impl MockNode {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            phase: Phase::Idle,
            tap: 0.0,
            onended: None,
        }
    }
}

struct State {
    nodes: SlotMap<NodeId, MockNode>,
    destination: NodeId,
    calls: Vec<Call>,
    /// Handlers of stopped sources, waiting for `flush_stopped`
    pending: Vec<EndedHandler>,
    analysers: Vec<NodeId>,
    time: f64,
    fail_stops: bool,
    fail_next_connect: bool,
}

pub struct RecordingContext {
    sample_rate: u32,
    state: Mutex<State>,
}

impl RecordingContext {
    pub fn new(sample_rate: u32) -> Arc<Self> {
        let mut nodes = SlotMap::with_key();
        let destination = nodes.insert(MockNode::new(Kind::Destination));
        Arc::new(Self {
            sample_rate,
            state: Mutex::new(State {
                nodes,
                destination,
                calls: Vec::new(),
                pending: Vec::new(),
                analysers: Vec::new(),
                time: 0.0,
                fail_stops: false,
                fail_next_connect: false,
            }),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Analysers in creation order
    pub fn analysers(&self) -> Vec<NodeId> {
        self.state.lock().analysers.clone()
    }

    pub fn kind(&self, node: NodeId) -> Option<Kind> {
        self.state.lock().nodes.get(node).map(|n| n.kind)
    }

    pub fn is_live(&self, node: NodeId) -> bool {
        self.state.lock().nodes.contains_key(node)
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Move the context clock forward, as if `secs` had been rendered
    pub fn advance(&self, secs: f64) {
        self.state.lock().time += secs;
    }

    /// Make every `stop_source` call fail
    pub fn fail_stops(&self, fail: bool) {
        self.state.lock().fail_stops = fail;
    }

    /// Make the next `connect` call fail
    pub fn fail_next_connect(&self) {
        self.state.lock().fail_next_connect = true;
    }

    /// Value the analyser reports as its newest sample
    pub fn set_tap(&self, analyser: NodeId, value: f32) {
        if let Some(node) = self.state.lock().nodes.get_mut(analyser) {
            node.tap = value;
        }
    }

    /// Sources started so far, oldest first
    pub fn started_sources(&self) -> Vec<NodeId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Start { source, .. } => Some(source),
                _ => None,
            })
            .collect()
    }

    /// Start calls as `(source, offset)` pairs
    pub fn start_offsets(&self) -> Vec<(NodeId, f64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Start { source, offset, .. } => Some((source, offset)),
                _ => None,
            })
            .collect()
    }

    /// Index of the first call matching `pred`
    pub fn position_of(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(pred)
    }

    /// Simulate `source` reaching the end of its buffer
    pub fn finish(&self, source: NodeId) {
        let handler = {
            let mut state = self.state.lock();
            match state.nodes.get_mut(source) {
                Some(node) if node.phase == Phase::Started => {
                    node.phase = Phase::Ended;
                    node.onended.take()
                }
                _ => None,
            }
        };
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Deliver the ended handlers of stopped sources
    pub fn flush_stopped(&self) {
        let pending = std::mem::take(&mut self.state.lock().pending);
        for handler in pending {
            handler();
        }
    }

    fn create(&self, kind: Kind) -> NodeId {
        let mut state = self.state.lock();
        let id = state.nodes.insert(MockNode::new(kind));
        if kind == Kind::Analyser {
            state.analysers.push(id);
        }
        state.calls.push(Call::Create { id, kind });
        id
    }

    fn with_source<T>(&self, source: NodeId, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        match state.nodes.get(source).map(|n| n.kind) {
            Some(Kind::Source) => f(&mut *state),
            Some(_) => Err(RetrogradeError::InvalidNodeState {
                reason: "not a buffer source".to_string(),
            }),
            None => Err(RetrogradeError::UnknownNode {
                node: format!("{:?}", source),
            }),
        }
    }
}

impl RenderContext for RecordingContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.state.lock().time
    }

    fn destination(&self) -> NodeId {
        self.state.lock().destination
    }

    fn create_buffer_source(&self, _buffer: Arc<AudioBuffer>) -> NodeId {
        self.create(Kind::Source)
    }

    fn create_channel_splitter(&self, _outputs: usize) -> Result<NodeId> {
        Ok(self.create(Kind::Splitter))
    }

    fn create_channel_merger(&self, _inputs: usize) -> Result<NodeId> {
        Ok(self.create(Kind::Merger))
    }

    fn create_mixer(&self) -> NodeId {
        self.create(Kind::Mixer)
    }

    fn create_analyser(&self, _fft_size: usize) -> Result<NodeId> {
        Ok(self.create(Kind::Analyser))
    }

    fn connect(&self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_connect) {
            return Err(RetrogradeError::InvalidConnection {
                reason: "connection refused".to_string(),
            });
        }
        for node in [from, to] {
            if !state.nodes.contains_key(node) {
                return Err(RetrogradeError::UnknownNode {
                    node: format!("{:?}", node),
                });
            }
        }
        state.calls.push(Call::Connect {
            from,
            output,
            to,
            input,
        });
        Ok(())
    }

    fn disconnect(&self, node: NodeId) -> Result<()> {
        self.state.lock().calls.push(Call::Disconnect { node });
        Ok(())
    }

    fn start_source(
        &self,
        source: NodeId,
        when: f64,
        offset: f64,
        duration: Option<f64>,
    ) -> Result<()> {
        self.with_source(source, |state| {
            let node = &mut state.nodes[source];
            if node.phase != Phase::Idle {
                return Err(RetrogradeError::InvalidNodeState {
                    reason: "source started twice".to_string(),
                });
            }
            node.phase = Phase::Started;
            state.calls.push(Call::Start {
                source,
                when,
                offset,
                duration,
            });
            Ok(())
        })
    }

    fn stop_source(&self, source: NodeId) -> Result<()> {
        self.with_source(source, |state| {
            if state.fail_stops {
                return Err(RetrogradeError::InvalidNodeState {
                    reason: "stop rejected".to_string(),
                });
            }
            let node = &mut state.nodes[source];
            match node.phase {
                Phase::Idle => Err(RetrogradeError::InvalidNodeState {
                    reason: "source stopped before start".to_string(),
                }),
                Phase::Ended => Ok(()),
                Phase::Started => {
                    node.phase = Phase::Ended;
                    let handler = node.onended.take();
                    state.pending.extend(handler);
                    state.calls.push(Call::Stop { source });
                    Ok(())
                }
            }
        })
    }

    fn set_playback_rate(&self, source: NodeId, rate: f32) -> Result<()> {
        if rate < 0.0 {
            return Err(RetrogradeError::InvalidParameter {
                name: "playback_rate",
                reason: "engine sources only play forward".to_string(),
            });
        }
        self.with_source(source, |state| {
            state.calls.push(Call::SetRate { source, rate });
            Ok(())
        })
    }

    fn set_detune(&self, source: NodeId, cents: f32) -> Result<()> {
        self.with_source(source, |state| {
            state.calls.push(Call::SetDetune { source, cents });
            Ok(())
        })
    }

    fn set_onended(&self, source: NodeId, handler: Option<EndedHandler>) -> Result<()> {
        self.with_source(source, |state| {
            state.nodes[source].onended = handler;
            Ok(())
        })
    }

    fn get_float_time_domain_data(&self, analyser: NodeId, out: &mut [f32]) -> Result<()> {
        let state = self.state.lock();
        let tap = state
            .nodes
            .get(analyser)
            .filter(|n| n.kind == Kind::Analyser)
            .map(|n| n.tap)
            .ok_or_else(|| RetrogradeError::UnknownNode {
                node: format!("{:?}", analyser),
            })?;
        out.fill(tap);
        Ok(())
    }

    fn release(&self, node: NodeId) -> Result<()> {
        let mut state = self.state.lock();
        state
            .nodes
            .remove(node)
            .ok_or_else(|| RetrogradeError::UnknownNode {
                node: format!("{:?}", node),
            })?;
        state.calls.push(Call::Release { node });
        Ok(())
    }
}

/// One channel whose samples equal their own timestamp divided by the duration
pub fn timestamp_track(frames: usize, sample_rate: u32) -> AudioBuffer {
    let samples = (0..frames).map(|i| i as f32 / frames as f32).collect();
    AudioBuffer::from_channels(vec![samples], sample_rate).unwrap()
}
