//! Error types for the waveform engine

use std::path::PathBuf;

use thiserror::Error;

/// Why a render handle resolved without an image
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Evicted, cleared, superseded or shut down before completion
    #[error("Render cancelled")]
    Cancelled,

    /// The render task itself failed
    #[error("Render failed: {0}")]
    Failed(String),
}

impl RenderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderError::Cancelled)
    }
}

/// Errors reading samples from an audio file
#[derive(Error, Debug)]
pub enum SampleReadError {
    /// Could not open or parse the file header
    #[error("Failed to open audio file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    /// Seek or decode failure part way through the file
    #[error("Failed to read samples at frame {frame}: {message}")]
    Read { frame: u64, message: String },

    /// Unsupported sample layout
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// The reader was closed (file switched or waveform shut down)
    #[error("Sample reader is closed")]
    Closed,
}

/// Errors from the waveform facade and its setup
#[derive(Error, Debug)]
pub enum WaveformError {
    /// Viewport violates its invariants
    #[error("Invalid viewport: {0}")]
    InvalidViewport(String),

    /// The render worker pool could not be built
    #[error("Failed to build render pool: {0}")]
    Pool(String),

    /// The stats reporter thread could not be started
    #[error("Failed to spawn thread: {0}")]
    Thread(#[from] std::io::Error),

    /// Opening the sample source failed
    #[error(transparent)]
    Source(#[from] SampleReadError),
}

/// Result type for waveform setup operations
pub type WaveformResult<T> = Result<T, WaveformError>;
