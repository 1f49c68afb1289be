//! Position-tracked and reversible playback built on a [`RenderContext`]
//!
//! [`RenderContext`]: crate::engine::RenderContext

pub mod encoder;
pub mod options;
pub mod position;
pub mod reversible;

pub use encoder::{augment, encode_position_channel, make_ramp};
pub use options::PlaybackOptions;
pub use position::{CompletionHandler, PlaybackPositionNode};
pub use reversible::{
    mirrored_offset, Direction, DirectionEndedHandler, DirectionSwitch, ReversibleSourceNode,
};
