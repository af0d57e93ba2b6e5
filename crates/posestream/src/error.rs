//! Common error types for the pose pipeline.

use thiserror::Error;

use crate::camera::CameraError;
use crate::engine::EngineError;
use crate::frame::FrameError;

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error (config files, worker thread spawn)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera binding error
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    /// Inference engine error
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Frame conversion error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
