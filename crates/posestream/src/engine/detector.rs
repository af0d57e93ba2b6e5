//! Inference thread for a loaded model
//!
//! Submissions never block; results are reported from the inference thread
//! through the completion route.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use image::RgbaImage;
use tracing::{debug, warn};

use super::{Completion, Delegate, EngineError, LandmarkRunner, ListenerId};
use crate::frame::FrameInfo;
use crate::tracing::prefix;

pub(crate) type CompletionRoute = Arc<dyn Fn(Completion) + Send + Sync>;

struct Job {
    image: RgbaImage,
    source: FrameInfo,
    submitted_by: Option<ListenerId>,
}

/// Handle to a model running on its own thread.
pub(crate) struct AsyncDetector {
    jobs: Sender<Job>,
    delegate: Delegate,
}

impl AsyncDetector {
    pub(crate) fn spawn(
        mut runner: Box<dyn LandmarkRunner>,
        delegate: Delegate,
        route: CompletionRoute,
    ) -> Result<Self, EngineError> {
        let (jobs, rx) = unbounded::<Job>();

        thread::Builder::new()
            .name("pose-inference".to_string())
            .spawn(move || {
                for job in rx {
                    let result = runner.infer(&job.image);
                    if let Err(e) = &result {
                        warn!(
                            "{} Detection failed for frame {}: {}",
                            prefix::ENGINE,
                            job.source.timestamp_ms,
                            e
                        );
                    }
                    route(Completion {
                        source: job.source,
                        submitted_by: job.submitted_by,
                        result,
                    });
                }
                debug!("{} Inference thread stopped", prefix::ENGINE);
            })
            .map_err(|e| EngineError::ModelLoad(format!("failed to start inference thread: {}", e)))?;

        Ok(Self { jobs, delegate })
    }

    pub(crate) fn submit(
        &self,
        image: RgbaImage,
        source: FrameInfo,
        submitted_by: Option<ListenerId>,
    ) -> Result<(), EngineError> {
        self.jobs
            .send(Job {
                image,
                source,
                submitted_by,
            })
            .map_err(|_| EngineError::WorkerStopped)
    }

    pub(crate) fn delegate(&self) -> Delegate {
        self.delegate
    }
}
