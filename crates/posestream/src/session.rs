//! Session controller
//!
//! One session per hosted camera view. A session owns its capture path (the
//! keep-latest frame slot, the frame preparer and the facing selection) and
//! two threads:
//!
//! - `pose-analyzer-{view}` takes the newest frame once the previous detection
//!   is done, prepares it and submits it to the shared engine
//! - `pose-results-{view}` receives the engine's completions, encodes them
//!   and hands them to the dispatcher
//!
//! Disposal detaches the session from the engine but leaves the model loaded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::camera::{BindOwner, BindRequest, CameraError, FrameSink, LatestFrameSlot, SharedCamera};
use crate::config::CaptureConfig;
use crate::delivery::Dispatcher;
use crate::encoder::encode;
use crate::engine::{Completion, DetectOutcome, EngineManager, ListenerId};
use crate::error::Result;
use crate::frame::FrameInfo;
use crate::host::{Command, CommandChannel, CommandHandler, CommandReply, HandlerId};
use crate::preparer::FramePreparer;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::tracing::prefix;
use crate::types::CameraFacing;

/// Shared collaborators a session is built from.
#[derive(Clone)]
pub struct SessionContext {
    pub engine: Arc<EngineManager>,
    pub camera: SharedCamera,
    pub dispatcher: Dispatcher,
    pub commands: CommandChannel,
    pub capture: CaptureConfig,
    /// Landmarks per subject the model is expected to report
    pub landmark_count: usize,
}

/// Camera binding and facing selection for one session.
struct CameraControl {
    shared: SharedCamera,
    owner: BindOwner,
    facing: Mutex<CameraFacing>,
    slot: Arc<LatestFrameSlot>,
    stats: Arc<PipelineStats>,
    capture: CaptureConfig,
    view_id: i64,
}

impl CameraControl {
    /// Unbind everything, then bind preview and analysis for `facing`.
    fn bind(&self, facing: CameraFacing) -> std::result::Result<(), CameraError> {
        self.shared.bind(
            self.owner,
            BindRequest {
                facing,
                target_width: self.capture.width,
                target_height: self.capture.height,
                sink: FrameSink::new(self.slot.clone(), facing, self.stats.clone()),
            },
        )
    }

    fn bind_logged(&self, facing: CameraFacing) {
        match self.bind(facing) {
            Ok(()) => debug!(
                "{} View {} bound to {} camera",
                prefix::CAMERA,
                self.view_id,
                facing
            ),
            Err(e) => error!(
                "{} View {} failed to bind {} camera: {}",
                prefix::CAMERA,
                self.view_id,
                facing,
                e
            ),
        }
    }

    /// Toggle facing and rebind. The flag flips immediately; binding may
    /// complete later on the camera's own thread. A closed session keeps its
    /// facing and binds nothing.
    fn switch(&self) -> CameraFacing {
        if self.slot.is_closed() {
            debug!(
                "{} View {} is disposed, ignoring camera switch",
                prefix::CAMERA,
                self.view_id
            );
            return self.facing();
        }
        let facing = {
            let mut current = self.facing.lock();
            *current = current.toggled();
            *current
        };
        info!(
            "{} View {} switching to {} camera",
            prefix::CAMERA,
            self.view_id,
            facing
        );
        self.bind_logged(facing);
        facing
    }

    fn facing(&self) -> CameraFacing {
        *self.facing.lock()
    }

    fn release(&self) -> bool {
        self.shared.release(self.owner)
    }
}

/// Command handler registered by a live session.
struct SessionCommands {
    engine: Arc<EngineManager>,
    camera: Arc<CameraControl>,
}

impl CommandHandler for SessionCommands {
    fn handle(&self, command: Command) -> CommandReply {
        match command {
            Command::PreloadModel => CommandReply::Success(self.engine.preload_and_wait().into()),
            Command::SwitchCamera => {
                self.camera.switch();
                CommandReply::Success(serde_json::Value::Null)
            }
        }
    }
}

/// A live camera session bound to one hosted view.
pub struct SessionController {
    view_id: i64,
    engine: Arc<EngineManager>,
    camera: Arc<CameraControl>,
    commands: CommandChannel,
    handler_id: Option<HandlerId>,
    listener_id: ListenerId,
    cancelled: Arc<AtomicBool>,
    analyzer: Option<JoinHandle<()>>,
    disposed: bool,
}

impl SessionController {
    /// Attach to the engine, start preloading, start the session threads,
    /// bind the camera and register the command handler.
    ///
    /// A camera bind failure is logged and does not fail creation; a later
    /// `switch_camera` retries the bind.
    pub fn start(view_id: i64, ctx: SessionContext) -> Result<Self> {
        let stats = Arc::new(PipelineStats::default());
        let slot = Arc::new(LatestFrameSlot::new());
        let camera = Arc::new(CameraControl {
            owner: ctx.camera.register(),
            shared: ctx.camera.clone(),
            facing: Mutex::new(ctx.capture.facing),
            slot: slot.clone(),
            stats: stats.clone(),
            capture: ctx.capture,
            view_id,
        });
        let cancelled = Arc::new(AtomicBool::new(false));

        let (completions_tx, completions_rx) = unbounded::<Completion>();
        let listener_id = ctx.engine.attach_listener(completions_tx);
        ctx.engine.preload();

        let results = ResultsWorker {
            view_id,
            listener_id,
            slot: slot.clone(),
            stats: stats.clone(),
            cancelled: cancelled.clone(),
            dispatcher: ctx.dispatcher.clone(),
            landmark_count: ctx.landmark_count,
        };
        let spawned = thread::Builder::new()
            .name(format!("pose-results-{}", view_id))
            .spawn(move || results.run(completions_rx));
        if let Err(e) = spawned {
            ctx.engine.detach_listener_if(listener_id);
            return Err(e.into());
        }

        let analyzer = Analyzer {
            view_id,
            listener_id,
            slot: slot.clone(),
            stats,
            engine: ctx.engine.clone(),
            preparer: FramePreparer::new(),
        };
        let analyzer = match thread::Builder::new()
            .name(format!("pose-analyzer-{}", view_id))
            .spawn(move || analyzer.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                slot.close();
                ctx.engine.detach_listener_if(listener_id);
                return Err(e.into());
            }
        };

        camera.bind_logged(ctx.capture.facing);

        let handler_id = ctx.commands.set_handler(SessionCommands {
            engine: ctx.engine.clone(),
            camera: camera.clone(),
        });

        info!(
            "{} Session {} started ({} camera)",
            prefix::SESSION,
            view_id,
            ctx.capture.facing
        );

        Ok(Self {
            view_id,
            engine: ctx.engine,
            camera,
            commands: ctx.commands,
            handler_id: Some(handler_id),
            listener_id,
            cancelled,
            analyzer: Some(analyzer),
            disposed: false,
        })
    }

    pub fn view_id(&self) -> i64 {
        self.view_id
    }

    /// Toggle between front and back camera. Returns the new facing, or the
    /// current one once disposed.
    pub fn switch_camera(&self) -> CameraFacing {
        if self.disposed {
            return self.camera.facing();
        }
        self.camera.switch()
    }

    pub fn facing(&self) -> CameraFacing {
        self.camera.facing()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.camera.stats.snapshot()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Unregister commands, stop capture and analysis, detach from the
    /// engine. The camera is only unbound if no newer session has bound it
    /// since. The shared model stays loaded. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(id) = self.handler_id.take() {
            self.commands.clear_handler_if(id);
        }

        self.camera.slot.close();
        if !self.camera.release() {
            debug!(
                "{} Session {} no longer owns the camera, leaving it bound",
                prefix::SESSION,
                self.view_id
            );
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.engine.detach_listener_if(self.listener_id);

        if let Some(analyzer) = self.analyzer.take() {
            if analyzer.join().is_err() {
                error!(
                    "{} Analyzer thread of session {} panicked",
                    prefix::SESSION,
                    self.view_id
                );
            }
        }

        info!("{} Session {} disposed", prefix::SESSION, self.view_id);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Frame preparation and submission loop.
struct Analyzer {
    view_id: i64,
    listener_id: ListenerId,
    slot: Arc<LatestFrameSlot>,
    stats: Arc<PipelineStats>,
    engine: Arc<EngineManager>,
    preparer: FramePreparer,
}

impl Analyzer {
    fn run(mut self) {
        while let Some(captured) = self.slot.next_frame() {
            let timestamp_ms = Utc::now().timestamp_millis();
            let rotation = captured.frame.rotation();

            let image = match self.preparer.prepare(captured.frame) {
                Ok(image) => image,
                Err(e) => {
                    warn!(
                        "{} View {} dropped frame {}: {}",
                        prefix::CAMERA,
                        self.view_id,
                        timestamp_ms,
                        e
                    );
                    self.skip();
                    continue;
                }
            };

            let source = FrameInfo {
                timestamp_ms,
                width: image.width(),
                height: image.height(),
                rotation,
                facing: captured.facing,
            };

            match self.engine.detect_as(self.listener_id, image, source) {
                DetectOutcome::Submitted => self.stats.record_submitted(),
                DetectOutcome::NotReady | DetectOutcome::NoListener | DetectOutcome::Dropped => {
                    self.skip()
                }
            }
        }
        debug!("{} Analyzer {} stopped", prefix::SESSION, self.view_id);
    }

    /// Frame never reached the engine, so no completion will clear the gate.
    fn skip(&self) {
        self.stats.record_skipped();
        self.slot.finish();
    }
}

/// Completion handling loop. Exits once the engine drops this session's
/// listener.
struct ResultsWorker {
    view_id: i64,
    listener_id: ListenerId,
    slot: Arc<LatestFrameSlot>,
    stats: Arc<PipelineStats>,
    cancelled: Arc<AtomicBool>,
    dispatcher: Dispatcher,
    landmark_count: usize,
}

impl ResultsWorker {
    fn run(self, completions: Receiver<Completion>) {
        for completion in completions {
            // Frames submitted by a session this one replaced do not hold our gate
            if completion.submitted_by != Some(self.listener_id) {
                debug!(
                    "{} Session {} ignoring frame {} from {:?}",
                    prefix::SESSION,
                    self.view_id,
                    completion.source.timestamp_ms,
                    completion.submitted_by
                );
                continue;
            }
            self.slot.finish();

            if self.cancelled.load(Ordering::SeqCst) {
                debug!(
                    "{} Session {} disposed, ignoring frame {}",
                    prefix::SESSION,
                    self.view_id,
                    completion.source.timestamp_ms
                );
                continue;
            }

            match completion.result {
                Ok(result) => {
                    if let Some(subject) = result.first_subject() {
                        if subject.len() != self.landmark_count {
                            warn!(
                                "{} Model reported {} landmarks, expected {}",
                                prefix::ENGINE,
                                subject.len(),
                                self.landmark_count
                            );
                        }
                    }
                    let landmarks = encode(&result, completion.source.facing);
                    self.stats.record_delivered(landmarks.is_empty());
                    self.dispatcher.deliver(landmarks);
                }
                Err(_) => self.stats.record_failed(),
            }
        }
        debug!("{} Results {} stopped", prefix::SESSION, self.view_id);
    }
}
