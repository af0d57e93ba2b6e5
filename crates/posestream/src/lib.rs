//! Real-time pose landmark pipeline
//!
//! Camera frames go in, flat landmark sequences come out to the host, one
//! frame in flight per session, with a single pose model shared by every
//! session in the process.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ keep-latest ┌──────────────┐     ┌───────────────┐
//! │ CameraProvider│───────────▶│ Analyzer      │────▶│ EngineManager │
//! │ (FrameSink)  │    slot     │ FramePreparer │     │ (shared model)│
//! └──────────────┘             └──────────────┘     └───────┬───────┘
//!                                      ▲ gate cleared        │ Completion
//!                                      │                     ▼
//! ┌──────────────┐  pose-delivery ┌──────────┐      ┌───────────────┐
//! │ EventStream  │◀───────────────│Dispatcher│◀─────│ Results/encode│
//! │ (host sink)  │                └──────────┘      └───────────────┘
//! └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use posestream::{PipelineConfig, PoseHost, SyntheticLoader};
//! # fn camera() -> Arc<dyn posestream::CameraProvider> { unimplemented!() }
//!
//! # fn main() -> posestream::Result<()> {
//! let config = PipelineConfig::default();
//! let host = PoseHost::new(&config, Arc::new(SyntheticLoader::new()), camera())?;
//!
//! host.events().listen(|landmarks: posestream::FlatLandmarkSequence| {
//!     println!("{} landmarks", landmarks.landmark_count());
//! });
//!
//! host.commands().invoke("preloadModel");
//! let mut session = host.create_session(1)?;
//! host.commands().invoke("switchCamera");
//! session.dispose();
//! # Ok(())
//! # }
//! ```

pub mod camera;
pub mod config;
pub mod delivery;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod frame;
pub mod host;
pub mod preparer;
pub mod session;
pub mod stats;
pub mod tracing;
pub mod types;

pub use camera::{BindOwner, BindRequest, CameraError, CameraProvider, FrameSink, SharedCamera};
pub use config::{CaptureConfig, PipelineConfig};
pub use delivery::{Dispatcher, EventSink, EventStream};
pub use encoder::encode;
pub use engine::backends::SyntheticLoader;
pub use engine::{
    Completion, Delegate, DetectOutcome, EngineError, EngineManager, EngineOptions, EngineState,
    LandmarkRunner, ListenerId, ModelAsset, ModelLoader,
};
pub use error::{Error, Result};
pub use frame::{CameraFrame, FrameError, FrameInfo, Rotation};
pub use host::{Command, CommandChannel, CommandHandler, CommandReply, PoseHost, SessionFactory};
pub use preparer::FramePreparer;
pub use session::{SessionContext, SessionController};
pub use stats::StatsSnapshot;
pub use types::{BodyLandmark, CameraFacing, DetectionResult, FlatLandmarkSequence, Landmark};

#[cfg(feature = "onnx")]
pub use engine::backends::OnnxLoader;
