//! Error handling for the detection pipeline

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, DetectorError>;

/// Errors that can occur while ingesting, detecting or projecting
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Incoming frame does not match the expected pixel layout
    #[error("frame format mismatch: expected {expected}, got {actual}")]
    FrameFormat { expected: String, actual: String },
    /// Color and depth frames disagree on their dimensions
    #[error("dimension mismatch: color {color:?} vs depth {depth:?}")]
    DimensionMismatch {
        color: (usize, usize),
        depth: (usize, usize),
    },
    /// Pixel lies outside the depth frame
    #[error("point must be inside the image (x={x}, y={y}), image size=({width},{height})")]
    OutOfBounds {
        x: i64,
        y: i64,
        width: usize,
        height: usize,
    },
    /// Detection engine failed
    #[error("detection engine error: {0}")]
    Engine(String),
    /// A per-cycle worker thread panicked
    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl DetectorError {
    pub fn engine(msg: impl Into<String>) -> Self {
        DetectorError::Engine(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        DetectorError::InvalidConfiguration(msg.into())
    }

    /// Whether the pipeline must stop when this error surfaces mid-cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DetectorError::Engine(_) | DetectorError::WorkerPanicked(_) | DetectorError::Io(_)
        )
    }
}
