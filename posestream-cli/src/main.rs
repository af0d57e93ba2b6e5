//! posestream - run a pose session against a synthetic camera
//!
//! Prints one JSON array of `x, y, z, visibility` values per processed frame.
//!
//! Usage:
//!     posestream --frames 90
//!     posestream --backend onnx --model models/pose_landmark_full.onnx --facing back

mod shutdown;
mod synthetic_camera;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use posestream::{
    CameraFacing, CommandReply, Delegate, FlatLandmarkSequence, ModelLoader, PipelineConfig,
    PoseHost, SyntheticLoader,
};
use thiserror::Error;
use tracing::{error, info};

use shutdown::shutdown_signal;
use synthetic_camera::SyntheticCamera;

#[derive(Error, Debug)]
enum CliError {
    #[error("backend {0} is not compiled in (rebuild with --features onnx)")]
    BackendUnavailable(&'static str),

    #[error("model failed to load on every delegate")]
    PreloadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Fixed standing skeleton, no model file needed
    Synthetic,
    /// ONNX Runtime landmark model
    Onnx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Facing {
    Front,
    Back,
}

impl From<Facing> for CameraFacing {
    fn from(facing: Facing) -> Self {
        match facing {
            Facing::Front => CameraFacing::Front,
            Facing::Back => CameraFacing::Back,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "posestream")]
#[command(about = "Stream pose landmarks from a synthetic camera")]
#[command(version)]
struct Args {
    /// JSON pipeline configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model asset path (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Landmark backend
    #[arg(short, long, value_enum, default_value = "synthetic")]
    backend: Backend,

    /// Starting camera facing (overrides config)
    #[arg(long, value_enum)]
    facing: Option<Facing>,

    /// Only try the CPU delegate
    #[arg(long)]
    cpu_only: bool,

    /// Stop after this many camera frames (0 = run until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    frames: u64,

    /// Camera frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Log level filter when RUST_LOG is unset (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> posestream::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model_asset = model.clone();
    }
    if let Some(facing) = args.facing {
        config.capture.facing = facing.into();
    }
    if args.cpu_only {
        config.delegates = vec![Delegate::Cpu];
    }
    config.validate()?;
    Ok(config)
}

fn loader_for(backend: Backend) -> Result<Arc<dyn ModelLoader>, CliError> {
    match backend {
        Backend::Synthetic => Ok(Arc::new(SyntheticLoader::new())),
        #[cfg(feature = "onnx")]
        Backend::Onnx => Ok(Arc::new(posestream::OnnxLoader::default())),
        #[cfg(not(feature = "onnx"))]
        Backend::Onnx => Err(CliError::BackendUnavailable("onnx")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    posestream::tracing::init_with_filter(&args.log_level);

    info!("Starting posestream v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    let loader = loader_for(args.backend)?;
    let camera = Arc::new(SyntheticCamera::new(args.fps, args.frames));
    let finished = camera.finished();

    let host = PoseHost::new(&config, loader, camera.clone())?;
    host.events().listen(|landmarks: FlatLandmarkSequence| {
        match serde_json::to_string(&landmarks) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to encode landmarks: {}", e),
        }
    });

    // Warm the model up before the view exists
    let commands = host.commands().clone();
    let reply = tokio::task::spawn_blocking(move || commands.invoke("preloadModel")).await?;
    if reply != CommandReply::Success(true.into()) {
        return Err(CliError::PreloadFailed.into());
    }
    info!("Model ready: {:?}", host.engine().state());

    let mut session = host.create_session(1)?;

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = finished.notified() => {
            info!("Frame limit reached");
        }
    }

    session.dispose();
    info!(
        "Camera produced {} frames; session stats {}",
        camera.produced(),
        serde_json::to_string(&session.stats())?
    );

    Ok(())
}
