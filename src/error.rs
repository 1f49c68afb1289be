//! Error handling for Retrograde
//!
//! Every fallible operation in the crate returns [`Result`]. Precondition
//! violations (no signal assigned, bad parameters) are raised synchronously
//! to the caller and never retried.

use thiserror::Error;

/// Result type alias for Retrograde operations
pub type Result<T> = std::result::Result<T, RetrogradeError>;

/// Main error type for Retrograde operations
#[derive(Error, Debug)]
pub enum RetrogradeError {
    // Playback Errors
    #[error("No audio buffer set on {node}")]
    NoSignal { node: &'static str },

    #[error("Playback is flagged as active but no source session exists")]
    NoSession,

    // Signal Errors
    #[error("Position ramp length must be positive, got {length}")]
    InvalidLength { length: usize },

    #[error("Length mismatch: expected {expected} samples, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    // Render Graph Errors
    #[error("Unknown render node: {node}")]
    UnknownNode { node: String },

    #[error("Invalid node state: {reason}")]
    InvalidNodeState { reason: String },

    #[error("Invalid connection: {reason}")]
    InvalidConnection { reason: String },

    // File Errors
    #[error("File not found: {path}")]
    FileNotFound {
        path: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio contains no samples")]
    EmptyAudio,

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RetrogradeError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            RetrogradeError::NoSignal { .. } => "NO_SIGNAL",
            RetrogradeError::NoSession => "NO_SESSION",
            RetrogradeError::InvalidLength { .. } => "INVALID_LENGTH",
            RetrogradeError::LengthMismatch { .. } => "LENGTH_MISMATCH",
            RetrogradeError::InvalidParameter { .. } => "INVALID_PARAMETER",
            RetrogradeError::UnknownNode { .. } => "UNKNOWN_NODE",
            RetrogradeError::InvalidNodeState { .. } => "INVALID_NODE_STATE",
            RetrogradeError::InvalidConnection { .. } => "INVALID_CONNECTION",
            RetrogradeError::FileNotFound { .. } => "FILE_NOT_FOUND",
            RetrogradeError::InvalidAudio { .. } => "INVALID_AUDIO",
            RetrogradeError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            RetrogradeError::EmptyAudio => "EMPTY_AUDIO",
            RetrogradeError::Io(_) => "IO_ERROR",
            RetrogradeError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the caller can fix this error and try again
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RetrogradeError::NoSignal { .. }
                | RetrogradeError::InvalidParameter { .. }
                | RetrogradeError::FileNotFound { .. }
                | RetrogradeError::InvalidAudio { .. }
                | RetrogradeError::UnsupportedFormat { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RetrogradeError::NoSignal { .. } => vec![
                "Assign a buffer before starting playback or changing direction",
            ],
            RetrogradeError::LengthMismatch { .. } => vec![
                "Build the position ramp from the same buffer it is appended to",
            ],
            RetrogradeError::InvalidParameter { .. } => vec![
                "Playback rate and detune must be finite numbers",
            ],
            RetrogradeError::FileNotFound { .. } => vec![
                "Check the file path is correct",
                "Verify the file hasn't been moved or deleted",
            ],
            RetrogradeError::InvalidAudio { .. } => vec![
                "Try converting the file to WAV format first",
                "The file may be corrupted - try re-exporting from source",
            ],
            RetrogradeError::UnsupportedFormat { .. } => vec![
                "Convert to a 16, 24 or 32-bit WAV file",
            ],
            _ => vec![],
        }
    }
}
