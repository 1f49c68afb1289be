//! Retrograde - Direction-Reversible Audio Playback
//!
//! Render engines expose forward-only buffer sources with no way to ask how
//! far they have played. Retrograde works around both limits:
//! 1. Position recovery - a ramp channel appended to the buffer is sampled
//!    by an analyser tap to read back the fraction played
//! 2. Reversal - a forward and a pre-reversed source share one output, and a
//!    sign flip of the playback rate hands off between them at the mirrored
//!    position
//!
//! # Architecture
//!
//! - `engine`: audio buffers, WAV I/O, the [`RenderContext`] capabilities
//!   consumed from a host engine, and an offline implementation of them
//! - `playback`: the position node and the reversible composite
//! - `automation`: scripted rate changes for offline renders
//!
//! [`RenderContext`]: engine::RenderContext

pub mod automation;
pub mod cli;
pub mod engine;
pub mod error;
pub mod playback;

pub use automation::{RateAutomation, RateEvent};
pub use error::{Result, RetrogradeError};
pub use playback::{Direction, PlaybackOptions, PlaybackPositionNode, ReversibleSourceNode};
