//! Pose inference engine
//!
//! [`EngineManager`] owns the one loaded model of the process. Loading goes
//! through a [`ModelLoader`], tried once per [`Delegate`] in configured order;
//! the first delegate that loads wins. A loaded [`LandmarkRunner`] runs on its
//! own inference thread and reports [`Completion`]s to the active listener.

use std::fmt;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::FrameInfo;
use crate::types::DetectionResult;

pub mod backends;
mod detector;
mod manager;

pub use manager::{DetectOutcome, EngineManager, EngineOptions, ListenerId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("{0} delegate not supported on this device")]
    DelegateUnsupported(Delegate),

    #[error("model asset not found: {0}")]
    AssetNotFound(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inference worker stopped")]
    WorkerStopped,
}

/// Hardware backend a model runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    Gpu,
    Cpu,
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delegate::Gpu => f.write_str("GPU"),
            Delegate::Cpu => f.write_str("CPU"),
        }
    }
}

/// Process-wide engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Initializing,
    Ready(Delegate),
    Failed,
}

impl EngineState {
    pub fn is_ready(self) -> bool {
        matches!(self, EngineState::Ready(_))
    }
}

/// Opaque model asset reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAsset {
    /// Path of the bundled model file
    pub path: String,
    /// Number of inference threads (0 = runtime default)
    pub num_threads: usize,
}

/// A loaded model bound to one delegate. Runs synchronously on the engine's
/// inference thread.
pub trait LandmarkRunner: Send {
    fn infer(&mut self, image: &RgbaImage) -> Result<DetectionResult, EngineError>;
}

/// Loads a model for one delegate. Failures are values, never panics; the
/// manager moves on to the next delegate.
pub trait ModelLoader: Send + Sync {
    fn load(
        &self,
        asset: &ModelAsset,
        delegate: Delegate,
    ) -> Result<Box<dyn LandmarkRunner>, EngineError>;
}

/// Outcome of one detection, routed to the active listener.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Capture context of the frame this result belongs to
    pub source: FrameInfo,
    /// Listener that submitted the frame, if it was submitted on behalf of one
    pub submitted_by: Option<ListenerId>,
    pub result: Result<DetectionResult, EngineError>,
}

/// Continuation queued by `preload`, invoked once with the final outcome.
pub type PreloadCallback = Box<dyn FnOnce(bool) + Send>;
