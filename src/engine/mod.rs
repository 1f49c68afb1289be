//! Audio Engine Module
//!
//! Everything below the playback layer:
//! - Immutable audio buffers and reversal
//! - WAV file I/O
//! - The render context capabilities and the offline implementation

pub mod buffer;
pub mod context;
mod graph;
pub mod io;
pub mod offline;

pub use buffer::{calculate_peak, linear_to_db, AudioBuffer};
pub use context::{
    EndedHandler, NodeId, RenderContext, DEFAULT_FFT_SIZE, MAX_CHANNELS, RENDER_QUANTUM_SIZE,
};
pub use io::{
    export_audio, generate_stereo_test_tone, generate_test_tone, import_audio, ExportFormat,
};
pub use offline::{OfflineContext, RenderConfig};
